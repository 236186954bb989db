use clap::Parser;
use client::network::{Client, StartCommand};
use client::session::SessionStore;
use log::info;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Origin reported during handshake
    #[arg(short = 'o', long, default_value = "http://localhost")]
    origin: String,

    /// Path of the persisted session record
    #[arg(long, default_value = "rally-session.bin")]
    session_file: PathBuf,

    /// Create a new room
    #[arg(short = 'c', long, conflicts_with = "join")]
    create: bool,

    /// Join an existing room by code
    #[arg(short = 'j', long)]
    join: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let store = SessionStore::new(Some(args.session_file));

    let command = if args.create {
        StartCommand::Create
    } else if let Some(code) = args.join {
        StartCommand::Join(code.to_uppercase())
    } else if store.current().is_some() {
        info!("Resuming persisted session");
        StartCommand::Resume
    } else {
        return Err("nothing to do: pass --create or --join CODE".into());
    };

    info!("Connecting to {}", args.server);
    let mut client = Client::new(&args.server, &args.origin, store);
    client.run(command).await?;

    info!("Session ended");
    Ok(())
}
