//! Server network layer: TCP accept loop and central event loop
//!
//! Each accepted connection gets a reader task (decodes frames, forwards
//! them into one mpsc queue) and a writer task (drains the connection's
//! outbound queue). The central loop is the single consumer of that queue
//! and the sole owner of the room registry and connection table, so every
//! inbound event is handled to completion before the next; room mutations
//! are atomic with respect to each other without any locking.

use crate::connections::ConnectionTable;
use crate::session::SessionRouter;
use log::{debug, error, info, warn};
use shared::codec;
use shared::{ClientEvent, ConnId};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::interval;

/// How often the idle sweeper runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Connections silent for longer than this are dropped. Clients ping every
/// 30 seconds, so a healthy connection never comes close.
const IDLE_TIMEOUT: Duration = Duration::from_secs(75);

/// Messages sent from connection tasks to the central loop
#[derive(Debug)]
pub enum ServerMessage {
    EventReceived { conn: ConnId, event: ClientEvent },
    ConnectionClosed { conn: ConnId },
}

/// The relay server: accept loop, connection tasks, and the central event
/// loop that owns all mutable state.
pub struct Server {
    listener: TcpListener,
    router: SessionRouter,
    conns: ConnectionTable,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn bind(addr: &str, allowed_origins: Vec<String>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            router: SessionRouter::new(allowed_origins),
            conns: ConnectionTable::new(),
            server_tx,
            server_rx,
        })
    }

    /// The actual bound address; useful when binding port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Registers an accepted stream and spawns its reader/writer tasks.
    fn spawn_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let conn = self.conns.add(outbound_tx);
        info!("Connection {} accepted from {}", conn, addr);

        let (mut read_half, mut write_half) = stream.into_split();

        // Writer: drains the outbound queue until the table drops the sender.
        tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                if let Err(e) = codec::write_frame(&mut write_half, &event).await {
                    debug!("Writer for connection {} stopped: {}", conn, e);
                    break;
                }
            }
        });

        // Reader: forwards decoded frames; any error is a disconnect.
        let server_tx = self.server_tx.clone();
        tokio::spawn(async move {
            loop {
                match codec::read_frame::<_, ClientEvent>(&mut read_half).await {
                    Ok(event) => {
                        if server_tx
                            .send(ServerMessage::EventReceived { conn, event })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("Connection {} read ended: {}", conn, e);
                        let _ = server_tx.send(ServerMessage::ConnectionClosed { conn });
                        break;
                    }
                }
            }
        });
    }

    /// Main loop: accepts connections, consumes inbound events, sweeps
    /// idle connections.
    pub async fn run(mut self) -> io::Result<()> {
        let mut sweep = interval(SWEEP_INTERVAL);
        info!("Server started successfully");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.spawn_connection(stream, addr),
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                },

                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::EventReceived { conn, event }) => {
                            self.conns.touch(conn);
                            self.router.handle_event(conn, event, &mut self.conns);
                        }
                        Some(ServerMessage::ConnectionClosed { conn }) => {
                            self.router.handle_disconnect(conn, &mut self.conns);
                        }
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = sweep.tick() => {
                    for conn in self.conns.idle_connections(IDLE_TIMEOUT) {
                        warn!("Connection {} idle for over {:?}; dropping", conn, IDLE_TIMEOUT);
                        self.router.handle_disconnect(conn, &mut self.conns);
                    }
                },
            }
        }

        Ok(())
    }
}
