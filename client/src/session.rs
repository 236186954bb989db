//! Durable client session record for reconnection
//!
//! The room id, session token and role are persisted under a fixed path so
//! a restarted client can silently rejoin a game in progress. Storage
//! failures never block gameplay: the store logs one warning and degrades
//! to memory-only for the rest of the run.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use shared::Role;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub room_id: String,
    pub session_token: String,
    pub role: Role,
}

pub struct SessionStore {
    path: Option<PathBuf>,
    cached: Option<SessionRecord>,
    storage_warned: bool,
}

impl SessionStore {
    /// Opens the store, loading any previously persisted record. `None`
    /// disables persistence entirely (memory-only).
    pub fn new(path: Option<PathBuf>) -> Self {
        let cached = path.as_ref().and_then(|p| match fs::read(p) {
            Ok(bytes) => match bincode::deserialize::<SessionRecord>(&bytes) {
                Ok(record) => {
                    info!("Restored session for room {}", record.room_id);
                    Some(record)
                }
                Err(e) => {
                    warn!("Discarding unreadable session record: {}", e);
                    None
                }
            },
            Err(_) => None,
        });

        Self {
            path,
            cached,
            storage_warned: false,
        }
    }

    pub fn current(&self) -> Option<&SessionRecord> {
        self.cached.as_ref()
    }

    pub fn save(&mut self, record: SessionRecord) {
        self.cached = Some(record.clone());

        let Some(path) = &self.path else {
            return;
        };
        let result = bincode::serialize(&record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            .and_then(|bytes| fs::write(path, bytes));
        if let Err(e) = result {
            if !self.storage_warned {
                warn!(
                    "Session storage unavailable ({}); continuing in memory only",
                    e
                );
                self.storage_warned = true;
            }
        }
    }

    /// Forgets the session, in memory and on disk. Called on explicit exit
    /// and when the server reports the room gone.
    pub fn clear(&mut self) {
        self.cached = None;
        if let Some(path) = &self.path {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound && !self.storage_warned {
                    warn!("Failed to remove session record: {}", e);
                    self.storage_warned = true;
                }
            }
        }
    }
}
