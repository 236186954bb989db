//! Room registry: pairing table for two-player match sessions
//!
//! This module owns the in-memory table of active rooms, including:
//! - Room creation with short, human-enterable join codes
//! - Membership (at most two, insertion-ordered: index 0 is the host)
//! - Per-member ready flags and ordered ready snapshots
//! - Session tokens for reconnection, retained after a member departs
//! - Empty-room reclamation and defensive whole-table removal scans
//!
//! The registry is an explicitly constructed service object owned by the
//! server's event loop; tests build as many independent instances as they
//! need.

use log::info;
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::{ConnId, ReadyState, Role, MAX_ROOM_MEMBERS, ROOM_CODE_LEN};
use std::collections::HashMap;
use std::fmt;

/// Join-code alphabet: uppercase alphanumeric only, so codes survive being
/// read out loud or typed from a phone screen.
const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const SESSION_TOKEN_LEN: usize = 32;

/// Room-scoped failures surfaced to the requesting connection only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomError {
    NotFound,
    Full,
    JoinFailed,
}

impl RoomError {
    /// The human-readable message relayed to the client.
    pub fn message(&self) -> &'static str {
        match self {
            RoomError::NotFound => "Room not found",
            RoomError::Full => "Room is full",
            RoomError::JoinFailed => "Failed to join room",
        }
    }
}

impl fmt::Display for RoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for RoomError {}

/// One seat in a room.
#[derive(Debug)]
pub struct RoomMember {
    /// Connection currently occupying the seat
    pub conn: ConnId,
    /// Opaque reconnection credential issued when the seat was taken
    pub token: String,
    /// Ready-check flag, reset on rematch
    pub ready: bool,
}

/// An active session between up to two members.
///
/// Member order is meaningful: `members[0]` is the host and is the only
/// member whose ball and score messages the relay accepts. When the host
/// departs a surviving room, the remaining member shifts to index 0 and is
/// thereby promoted.
#[derive(Debug)]
pub struct Room {
    pub code: String,
    members: Vec<RoomMember>,
    /// Tokens of departed members, kept so their connections can rejoin
    /// while the room still exists.
    orphan_tokens: Vec<String>,
}

impl Room {
    fn new(code: String) -> Self {
        Self {
            code,
            members: Vec::new(),
            orphan_tokens: Vec::new(),
        }
    }

    /// Ordered snapshot of `(connection, ready)` pairs, host first.
    pub fn ready_state(&self) -> ReadyState {
        self.members.iter().map(|m| (m.conn, m.ready)).collect()
    }

    pub fn member_conns(&self) -> Vec<ConnId> {
        self.members.iter().map(|m| m.conn).collect()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= MAX_ROOM_MEMBERS
    }

    /// True only when the room is full and every member is ready; a lone
    /// ready member can never trigger a start.
    pub fn all_ready(&self) -> bool {
        self.is_full() && self.members.iter().all(|m| m.ready)
    }

    pub fn member_index(&self, conn: ConnId) -> Option<usize> {
        self.members.iter().position(|m| m.conn == conn)
    }

    /// Role derived from seat order.
    pub fn role_of(&self, conn: ConnId) -> Option<Role> {
        self.member_index(conn).map(|idx| match idx {
            0 => Role::Host,
            _ => Role::Guest,
        })
    }

    /// The other member of the pairing, if present.
    pub fn other_member(&self, conn: ConnId) -> Option<ConnId> {
        self.members
            .iter()
            .map(|m| m.conn)
            .find(|&other| other != conn)
    }
}

/// Result of a successful create/join/rejoin, ready to be answered to the
/// registering connection.
#[derive(Debug, Clone)]
pub struct Registration {
    pub room_id: String,
    pub session_token: String,
    pub role: Role,
    pub ready_state: ReadyState,
}

/// Result of removing a connection from its room.
#[derive(Debug, Clone)]
pub struct RoomDeparture {
    pub code: String,
    /// Members still seated after the removal; empty means the room was
    /// reclaimed.
    pub remaining: Vec<ConnId>,
    /// Snapshot after the removal, for the survivors.
    pub ready_state: ReadyState,
}

/// Table of all active rooms, keyed by join code.
///
/// Only the session handlers mutate the registry, always read-modify-write
/// within one synchronous handler invocation, so no internal locking is
/// needed.
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
        }
    }

    /// Creates a room with the given connection as host. Always succeeds;
    /// a code collision is resolved by regenerating.
    pub fn create_room(&mut self, conn: ConnId) -> Registration {
        let code = self.generate_code();
        let token = generate_token();

        let mut room = Room::new(code.clone());
        room.members.push(RoomMember {
            conn,
            token: token.clone(),
            ready: false,
        });

        info!("Room {} created by connection {}", code, conn);

        let ready_state = room.ready_state();
        self.rooms.insert(code.clone(), room);

        Registration {
            room_id: code,
            session_token: token,
            role: Role::Host,
            ready_state,
        }
    }

    /// Seats a connection as guest in an existing room.
    pub fn join_room(&mut self, conn: ConnId, code: &str) -> Result<Registration, RoomError> {
        let room = self.rooms.get_mut(code).ok_or(RoomError::NotFound)?;

        if room.is_full() {
            return Err(RoomError::Full);
        }
        if room.member_index(conn).is_some() {
            return Err(RoomError::JoinFailed);
        }

        let token = generate_token();
        room.members.push(RoomMember {
            conn,
            token: token.clone(),
            ready: false,
        });

        info!("Connection {} joined room {}", conn, code);

        Ok(Registration {
            room_id: room.code.clone(),
            session_token: token,
            // A guest seat is never index 0 on join: the host seat exists.
            role: Role::Guest,
            ready_state: room.ready_state(),
        })
    }

    /// Re-seats a reconnecting player holding a token issued by this room.
    ///
    /// The token is consumed from the orphan list; the rejoiner is told its
    /// *current* role, which may differ from the original one if the
    /// remaining member was promoted in the meantime.
    pub fn rejoin_room(
        &mut self,
        conn: ConnId,
        code: &str,
        token: &str,
    ) -> Result<Registration, RoomError> {
        let room = self.rooms.get_mut(code).ok_or(RoomError::NotFound)?;

        if room.is_full() {
            return Err(RoomError::Full);
        }

        let slot = room
            .orphan_tokens
            .iter()
            .position(|t| t == token)
            .ok_or(RoomError::JoinFailed)?;
        room.orphan_tokens.remove(slot);

        room.members.push(RoomMember {
            conn,
            token: token.to_string(),
            ready: false,
        });

        let role = room.role_of(conn).unwrap_or(Role::Guest);
        info!(
            "Connection {} rejoined room {} as {:?}",
            conn, code, role
        );

        Ok(Registration {
            room_id: room.code.clone(),
            session_token: token.to_string(),
            role,
            ready_state: room.ready_state(),
        })
    }

    /// Flips the caller's ready flag. Returns the room for snapshotting,
    /// or None when the room or the membership does not exist.
    pub fn toggle_ready(&mut self, conn: ConnId, code: &str) -> Option<&Room> {
        let room = self.rooms.get_mut(code)?;
        let idx = room.member_index(conn)?;
        room.members[idx].ready = !room.members[idx].ready;
        Some(&*room)
    }

    /// Resets every member's ready flag, as both rematch paths require.
    pub fn reset_ready(&mut self, code: &str) -> Option<&Room> {
        let room = self.rooms.get_mut(code)?;
        for member in &mut room.members {
            member.ready = false;
        }
        Some(&*room)
    }

    /// Removes a connection from whatever room contains it.
    ///
    /// A connection belongs to at most one room, but the scan covers the
    /// whole table anyway so a stale membership can never survive a
    /// disconnect. Empty rooms are reclaimed. Returns None when the
    /// connection was in no room, which makes repeated disconnect cleanup
    /// a no-op.
    pub fn remove_conn(&mut self, conn: ConnId) -> Option<RoomDeparture> {
        let codes: Vec<String> = self
            .rooms
            .values()
            .filter(|room| room.member_index(conn).is_some())
            .map(|room| room.code.clone())
            .collect();

        let mut departure = None;
        for code in codes {
            let room = self.rooms.get_mut(&code)?;
            let idx = room.member_index(conn)?;
            let member = room.members.remove(idx);
            room.orphan_tokens.push(member.token);

            let remaining = room.member_conns();
            let ready_state = room.ready_state();

            if remaining.is_empty() {
                self.rooms.remove(&code);
                info!("Room {} reclaimed (empty)", code);
            }

            departure = Some(RoomDeparture {
                code,
                remaining,
                ready_state,
            });
        }

        departure
    }

    pub fn room(&self, code: &str) -> Option<&Room> {
        self.rooms.get(code)
    }

    /// The room a connection is currently seated in, if any.
    pub fn room_of(&self, conn: ConnId) -> Option<&Room> {
        self.rooms
            .values()
            .find(|room| room.member_index(conn).is_some())
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..ROOM_CODE_LEN)
                .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
                .collect();
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_room_registers_host() {
        let mut registry = RoomRegistry::new();
        let reg = registry.create_room(1);

        assert_eq!(reg.role, Role::Host);
        assert_eq!(reg.ready_state, vec![(1, false)]);
        assert_eq!(reg.room_id.len(), ROOM_CODE_LEN);
        assert!(reg
            .room_id
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_codes_are_unique() {
        let mut registry = RoomRegistry::new();
        let mut codes = std::collections::HashSet::new();
        for conn in 0..100 {
            assert!(codes.insert(registry.create_room(conn).room_id));
        }
    }

    #[test]
    fn test_join_assigns_guest() {
        let mut registry = RoomRegistry::new();
        let created = registry.create_room(1);
        let joined = registry.join_room(2, &created.room_id).unwrap();

        assert_eq!(joined.role, Role::Guest);
        assert_eq!(joined.ready_state, vec![(1, false), (2, false)]);
        assert_ne!(joined.session_token, created.session_token);
    }

    #[test]
    fn test_join_unknown_room() {
        let mut registry = RoomRegistry::new();
        assert_eq!(
            registry.join_room(2, "NOROOM").unwrap_err(),
            RoomError::NotFound
        );
    }

    #[test]
    fn test_third_join_rejected_and_room_unchanged() {
        let mut registry = RoomRegistry::new();
        let created = registry.create_room(1);
        registry.join_room(2, &created.room_id).unwrap();

        assert_eq!(
            registry.join_room(3, &created.room_id).unwrap_err(),
            RoomError::Full
        );

        let room = registry.room(&created.room_id).unwrap();
        assert_eq!(room.member_conns(), vec![1, 2]);
        assert_eq!(room.ready_state().len(), 2);
    }

    #[test]
    fn test_ready_state_keys_track_members() {
        let mut registry = RoomRegistry::new();
        let created = registry.create_room(1);
        registry.join_room(2, &created.room_id).unwrap();
        registry.remove_conn(1);

        let room = registry.room(&created.room_id).unwrap();
        assert_eq!(room.ready_state(), vec![(2, false)]);
        assert_eq!(room.member_conns(), vec![2]);
    }

    #[test]
    fn test_toggle_ready_round_trip() {
        let mut registry = RoomRegistry::new();
        let created = registry.create_room(1);

        registry.toggle_ready(1, &created.room_id).unwrap();
        assert_eq!(
            registry.room(&created.room_id).unwrap().ready_state(),
            vec![(1, true)]
        );

        registry.toggle_ready(1, &created.room_id).unwrap();
        assert_eq!(
            registry.room(&created.room_id).unwrap().ready_state(),
            vec![(1, false)]
        );
    }

    #[test]
    fn test_lone_ready_member_cannot_start() {
        let mut registry = RoomRegistry::new();
        let created = registry.create_room(1);
        registry.toggle_ready(1, &created.room_id).unwrap();

        assert!(!registry.room(&created.room_id).unwrap().all_ready());
    }

    #[test]
    fn test_all_ready_when_both_toggle() {
        let mut registry = RoomRegistry::new();
        let created = registry.create_room(1);
        registry.join_room(2, &created.room_id).unwrap();

        registry.toggle_ready(1, &created.room_id).unwrap();
        assert!(!registry.room(&created.room_id).unwrap().all_ready());

        registry.toggle_ready(2, &created.room_id).unwrap();
        assert!(registry.room(&created.room_id).unwrap().all_ready());
    }

    #[test]
    fn test_leave_preserves_survivor_ready_flag() {
        let mut registry = RoomRegistry::new();
        let created = registry.create_room(1);
        registry.join_room(2, &created.room_id).unwrap();
        registry.toggle_ready(2, &created.room_id).unwrap();

        registry.remove_conn(1);

        let room = registry.room(&created.room_id).unwrap();
        assert_eq!(room.ready_state(), vec![(2, true)]);
        // Full-room readiness is gone even though the flag survived.
        assert!(!room.all_ready());
    }

    #[test]
    fn test_survivor_is_promoted_to_host() {
        let mut registry = RoomRegistry::new();
        let created = registry.create_room(1);
        registry.join_room(2, &created.room_id).unwrap();

        registry.remove_conn(1);

        let room = registry.room(&created.room_id).unwrap();
        assert_eq!(room.role_of(2), Some(Role::Host));
    }

    #[test]
    fn test_empty_room_is_reclaimed() {
        let mut registry = RoomRegistry::new();
        let created = registry.create_room(1);

        let departure = registry.remove_conn(1).unwrap();
        assert_eq!(departure.code, created.room_id);
        assert!(departure.remaining.is_empty());
        assert!(registry.room(&created.room_id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_conn_is_idempotent() {
        let mut registry = RoomRegistry::new();
        registry.create_room(1);

        assert!(registry.remove_conn(1).is_some());
        assert!(registry.remove_conn(1).is_none());
    }

    #[test]
    fn test_rejoin_with_orphan_token() {
        let mut registry = RoomRegistry::new();
        let created = registry.create_room(1);
        registry.join_room(2, &created.room_id).unwrap();

        registry.remove_conn(1);
        let rejoined = registry
            .rejoin_room(3, &created.room_id, &created.session_token)
            .unwrap();

        // The survivor took the host seat; the returning player is a guest.
        assert_eq!(rejoined.role, Role::Guest);
        assert_eq!(
            registry.room(&created.room_id).unwrap().member_conns(),
            vec![2, 3]
        );
    }

    #[test]
    fn test_rejoin_with_bogus_token() {
        let mut registry = RoomRegistry::new();
        let created = registry.create_room(1);
        registry.remove_conn(1);
        // Host left alone, so the room was reclaimed with it.
        assert_eq!(
            registry
                .rejoin_room(3, &created.room_id, &created.session_token)
                .unwrap_err(),
            RoomError::NotFound
        );

        let created = registry.create_room(4);
        registry.join_room(5, &created.room_id).unwrap();
        registry.remove_conn(5);
        assert_eq!(
            registry
                .rejoin_room(6, &created.room_id, "not-a-token")
                .unwrap_err(),
            RoomError::JoinFailed
        );
    }

    #[test]
    fn test_rejoin_after_room_deleted_fails_cleanly() {
        let mut registry = RoomRegistry::new();
        let created = registry.create_room(1);
        registry.remove_conn(1);

        assert_eq!(
            registry
                .rejoin_room(1, &created.room_id, &created.session_token)
                .unwrap_err(),
            RoomError::NotFound
        );
    }

    #[test]
    fn test_reset_ready_clears_all_flags() {
        let mut registry = RoomRegistry::new();
        let created = registry.create_room(1);
        registry.join_room(2, &created.room_id).unwrap();
        registry.toggle_ready(1, &created.room_id).unwrap();
        registry.toggle_ready(2, &created.room_id).unwrap();

        registry.reset_ready(&created.room_id).unwrap();
        assert_eq!(
            registry.room(&created.room_id).unwrap().ready_state(),
            vec![(1, false), (2, false)]
        );
    }

    #[test]
    fn test_room_of_finds_membership() {
        let mut registry = RoomRegistry::new();
        let created = registry.create_room(1);

        assert_eq!(registry.room_of(1).unwrap().code, created.room_id);
        assert!(registry.room_of(99).is_none());
    }
}
