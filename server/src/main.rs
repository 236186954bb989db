use clap::Parser;
use log::info;
use server::network::Server;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Comma-separated list of allowed origins; empty allows any
    #[arg(short = 'o', long, value_delimiter = ',', default_value = "")]
    allowed_origins: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let origins: Vec<String> = args
        .allowed_origins
        .into_iter()
        .filter(|o| !o.is_empty())
        .collect();

    if origins.is_empty() {
        info!("No origin allow-list configured; accepting any origin");
    } else {
        info!("Allowed origins: {:?}", origins);
    }

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::bind(&address, origins).await?;
    server.run().await?;

    Ok(())
}
