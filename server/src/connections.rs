//! Connection roster and outbound delivery for the relay server
//!
//! This module tracks every live connection, including:
//! - Ephemeral connection-id assignment on accept
//! - The per-connection outbound channel drained by its writer task
//! - Handshake status (events before a successful handshake are ignored)
//! - Last-seen timestamps for idle-connection sweeping
//!
//! Sends are fire-and-forget: a closed channel means the writer task is
//! already gone and the disconnect path will clean the entry up.

use log::{info, warn};
use shared::{ConnId, ServerEvent};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// A live connection and its delivery handle.
#[derive(Debug)]
pub struct Connection {
    /// Unique connection identifier assigned on accept
    pub id: ConnId,
    /// Outbound queue drained by this connection's writer task
    pub tx: mpsc::UnboundedSender<ServerEvent>,
    /// Last time any frame arrived from this connection
    pub last_seen: Instant,
    /// Whether the handshake completed (origin accepted)
    pub handshaken: bool,
}

/// Roster of all live connections.
///
/// Owned exclusively by the server's central event loop, so mutations are
/// serialized with respect to each other without locking.
pub struct ConnectionTable {
    conns: HashMap<ConnId, Connection>,
    next_id: ConnId,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            conns: HashMap::new(),
            next_id: 1,
        }
    }

    /// Registers a freshly accepted connection and assigns its id.
    pub fn add(&mut self, tx: mpsc::UnboundedSender<ServerEvent>) -> ConnId {
        let id = self.next_id;
        self.next_id += 1;

        self.conns.insert(
            id,
            Connection {
                id,
                tx,
                last_seen: Instant::now(),
                handshaken: false,
            },
        );
        info!("Connection {} registered", id);
        id
    }

    /// Removes a connection. Returns false if it was already gone, which
    /// makes repeated disconnect cleanup a no-op.
    pub fn remove(&mut self, id: ConnId) -> bool {
        if self.conns.remove(&id).is_some() {
            info!("Connection {} removed", id);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.conns.contains_key(&id)
    }

    /// Refreshes the last-seen timestamp after any inbound frame.
    pub fn touch(&mut self, id: ConnId) {
        if let Some(conn) = self.conns.get_mut(&id) {
            conn.last_seen = Instant::now();
        }
    }

    pub fn mark_handshaken(&mut self, id: ConnId) {
        if let Some(conn) = self.conns.get_mut(&id) {
            conn.handshaken = true;
        }
    }

    pub fn is_handshaken(&self, id: ConnId) -> bool {
        self.conns.get(&id).map(|c| c.handshaken).unwrap_or(false)
    }

    /// Queues an event for one connection.
    pub fn send(&self, id: ConnId, event: ServerEvent) {
        if let Some(conn) = self.conns.get(&id) {
            if conn.tx.send(event).is_err() {
                warn!("Dropping event for connection {}: writer gone", id);
            }
        }
    }

    /// Queues an event for several connections.
    pub fn send_to_all<'a, I>(&self, ids: I, event: &ServerEvent)
    where
        I: IntoIterator<Item = &'a ConnId>,
    {
        for id in ids {
            self.send(*id, event.clone());
        }
    }

    /// Collects connections that have been silent longer than `timeout`.
    /// The caller routes them through the regular disconnect cleanup.
    pub fn idle_connections(&self, timeout: Duration) -> Vec<ConnId> {
        self.conns
            .values()
            .filter(|conn| conn.last_seen.elapsed() > timeout)
            .map(|conn| conn.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}
