//! Session protocol: validates and routes client events between room members
//!
//! One synchronous handler per event kind, dispatched from a closed enum so
//! the compiler checks coverage. Handlers mutate the registry and queue
//! outbound events; they run to completion before the next event is taken,
//! which keeps room mutations atomic without locks.
//!
//! Failure policy: everything here is room-scoped and non-fatal. Unknown
//! rooms and unauthorized senders are logged and dropped (or answered with a
//! scoped `RoomError`); nothing a single connection sends can disturb another
//! room or crash the process.

use crate::connections::ConnectionTable;
use crate::registry::{Registration, RoomRegistry};
use log::{debug, info, warn};
use shared::{now_ms, ClientEvent, ConnId, Role, ServerEvent, PROTOCOL_VERSION};

pub struct SessionRouter {
    registry: RoomRegistry,
    /// Origins accepted during handshake; empty means allow all.
    allowed_origins: Vec<String>,
}

impl SessionRouter {
    pub fn new(allowed_origins: Vec<String>) -> Self {
        Self {
            registry: RoomRegistry::new(),
            allowed_origins,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Entry point for every decoded inbound frame.
    pub fn handle_event(&mut self, conn: ConnId, event: ClientEvent, conns: &mut ConnectionTable) {
        match event {
            ClientEvent::Connect {
                client_version,
                origin,
            } => self.on_connect(conn, client_version, &origin, conns),
            ClientEvent::Disconnect => self.handle_disconnect(conn, conns),
            // Everything else requires a completed handshake.
            _ if !conns.is_handshaken(conn) => {
                warn!("Connection {} sent an event before handshake", conn);
            }
            ClientEvent::CreateRoom => self.on_create_room(conn, conns),
            ClientEvent::JoinRoom { room_id } => {
                let result = self.registry.join_room(conn, &room_id);
                self.answer_registration(conn, result, conns);
            }
            ClientEvent::RejoinRoom {
                room_id,
                session_token,
            } => {
                let result = self.registry.rejoin_room(conn, &room_id, &session_token);
                self.answer_registration(conn, result, conns);
            }
            ClientEvent::ToggleReady { room_id } => self.on_toggle_ready(conn, &room_id, conns),
            ClientEvent::PaddleMove {
                position,
                side,
                timestamp,
            } => self.on_paddle_move(conn, position, side, timestamp, conns),
            ClientEvent::BallMove {
                position,
                velocity,
                timestamp,
            } => self.on_ball_move(conn, position, velocity, timestamp, conns),
            ClientEvent::Score { score, scorer } => self.on_score(conn, score, scorer, conns),
            ClientEvent::PauseGame {
                is_paused,
                countdown_value,
            } => self.on_pause(conn, is_paused, countdown_value, conns),
            ClientEvent::PlayerExit { room_id: _ } => {
                self.depart(conn, ServerEvent::PlayerExited, conns);
            }
            ClientEvent::RematchRequest { room_id } => {
                self.on_rematch_request(conn, &room_id, conns)
            }
            ClientEvent::RematchResponse { room_id, accepted } => {
                self.on_rematch_response(conn, &room_id, accepted, conns)
            }
            ClientEvent::Ping { client_time } => {
                conns.send(
                    conn,
                    ServerEvent::Pong {
                        client_time,
                        server_time: now_ms(),
                    },
                );
            }
        }
    }

    /// Transport-level close or idle timeout. Safe to call more than once
    /// for the same connection.
    pub fn handle_disconnect(&mut self, conn: ConnId, conns: &mut ConnectionTable) {
        self.depart(conn, ServerEvent::PlayerDisconnected, conns);
        conns.remove(conn);
    }

    fn on_connect(
        &mut self,
        conn: ConnId,
        client_version: u32,
        origin: &str,
        conns: &mut ConnectionTable,
    ) {
        if conns.is_handshaken(conn) {
            warn!("Connection {} repeated its handshake", conn);
            return;
        }

        if client_version != PROTOCOL_VERSION {
            warn!(
                "Connection {} rejected: protocol version {} (want {})",
                conn, client_version, PROTOCOL_VERSION
            );
            conns.send(
                conn,
                ServerEvent::Rejected {
                    reason: "Protocol version mismatch".to_string(),
                },
            );
            conns.remove(conn);
            return;
        }

        let origin_ok =
            self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == origin);
        if !origin_ok {
            warn!("Connection {} rejected: origin {:?}", conn, origin);
            conns.send(
                conn,
                ServerEvent::Rejected {
                    reason: "Origin not allowed".to_string(),
                },
            );
            conns.remove(conn);
            return;
        }

        conns.mark_handshaken(conn);
        info!("Connection {} handshake complete (origin {:?})", conn, origin);
        conns.send(conn, ServerEvent::Connected { conn_id: conn });
    }

    fn on_create_room(&mut self, conn: ConnId, conns: &mut ConnectionTable) {
        // A connection opening a fresh room abandons any seat it still holds.
        if self.registry.room_of(conn).is_some() {
            debug!("Connection {} left its previous room to create a new one", conn);
            self.depart(conn, ServerEvent::PlayerExited, conns);
        }

        let reg = self.registry.create_room(conn);
        conns.send(
            conn,
            ServerEvent::RoomCreated {
                room_id: reg.room_id,
                session_token: reg.session_token,
                role: reg.role,
                ready_state: reg.ready_state,
            },
        );
    }

    /// Answers a join/rejoin outcome: the registration to the newcomer, a
    /// `PlayerJoined` to the incumbents, and a fresh snapshot to everyone.
    fn answer_registration(
        &mut self,
        conn: ConnId,
        result: Result<Registration, crate::registry::RoomError>,
        conns: &mut ConnectionTable,
    ) {
        let reg = match result {
            Ok(reg) => reg,
            Err(err) => {
                info!("Connection {} failed to join: {}", conn, err);
                conns.send(
                    conn,
                    ServerEvent::RoomError {
                        message: err.message().to_string(),
                    },
                );
                return;
            }
        };

        conns.send(
            conn,
            ServerEvent::RoomJoined {
                room_id: reg.room_id.clone(),
                session_token: reg.session_token,
                role: reg.role,
                ready_state: reg.ready_state.clone(),
            },
        );

        let members: Vec<ConnId> = reg.ready_state.iter().map(|(id, _)| *id).collect();
        let others: Vec<ConnId> = members.iter().copied().filter(|&id| id != conn).collect();

        conns.send_to_all(
            &others,
            &ServerEvent::PlayerJoined {
                player_id: conn,
                ready_state: reg.ready_state.clone(),
            },
        );
        conns.send_to_all(
            &members,
            &ServerEvent::ReadyStateUpdate {
                ready_state: reg.ready_state,
            },
        );
    }

    fn on_toggle_ready(&mut self, conn: ConnId, room_id: &str, conns: &mut ConnectionTable) {
        let Some(room) = self.registry.toggle_ready(conn, room_id) else {
            debug!(
                "Ignoring ready toggle from connection {} for room {:?}",
                conn, room_id
            );
            return;
        };

        let members = room.member_conns();
        let ready_state = room.ready_state();
        let all_ready = room.all_ready();

        conns.send_to_all(&members, &ServerEvent::ReadyStateUpdate { ready_state });
        if all_ready {
            info!("Room {} is ready to start", room_id);
            conns.send_to_all(&members, &ServerEvent::GameReady);
        }
    }

    fn on_paddle_move(
        &mut self,
        conn: ConnId,
        position: f32,
        side: shared::PaddleSide,
        timestamp: u64,
        conns: &mut ConnectionTable,
    ) {
        let Some(room) = self.registry.room_of(conn) else {
            debug!("Paddle update from connection {} outside any room", conn);
            return;
        };
        let Some(role) = room.role_of(conn) else {
            return;
        };

        // Side is bound to the seat, not to what the payload claims.
        if side != role.paddle_side() {
            warn!(
                "Dropping paddle update from connection {}: claims {:?} but is {:?}",
                conn, side, role
            );
            return;
        }

        if let Some(other) = room.other_member(conn) {
            conns.send(
                other,
                ServerEvent::PaddleUpdate {
                    position,
                    side,
                    timestamp,
                },
            );
        }
    }

    fn on_ball_move(
        &mut self,
        conn: ConnId,
        position: shared::Vec2,
        velocity: shared::Vec2,
        timestamp: u64,
        conns: &mut ConnectionTable,
    ) {
        let Some(room) = self.registry.room_of(conn) else {
            debug!("Ball update from connection {} outside any room", conn);
            return;
        };

        if room.role_of(conn) != Some(Role::Host) {
            warn!("Dropping ball update from non-host connection {}", conn);
            return;
        }

        if let Some(other) = room.other_member(conn) {
            conns.send(
                other,
                ServerEvent::BallUpdate {
                    position,
                    velocity,
                    timestamp,
                },
            );
        }
    }

    fn on_score(
        &mut self,
        conn: ConnId,
        score: shared::Score,
        scorer: shared::PaddleSide,
        conns: &mut ConnectionTable,
    ) {
        let Some(room) = self.registry.room_of(conn) else {
            debug!("Score update from connection {} outside any room", conn);
            return;
        };

        if room.role_of(conn) != Some(Role::Host) {
            warn!("Dropping score update from non-host connection {}", conn);
            return;
        }

        // Win evaluation stays with the clients; the relay only stamps time.
        conns.send_to_all(
            &room.member_conns(),
            &ServerEvent::ScoreUpdate {
                score,
                scorer,
                timestamp: now_ms(),
            },
        );
    }

    fn on_pause(
        &mut self,
        conn: ConnId,
        is_paused: bool,
        countdown_value: Option<u32>,
        conns: &mut ConnectionTable,
    ) {
        // Any member may pause or resume; the broadcast carries the origin
        // so clients can attribute it.
        let Some(room) = self.registry.room_of(conn) else {
            debug!("Pause request from connection {} outside any room", conn);
            return;
        };

        conns.send_to_all(
            &room.member_conns(),
            &ServerEvent::PauseUpdate {
                is_paused,
                countdown_value,
                timestamp: now_ms(),
                from: conn,
            },
        );
    }

    fn on_rematch_request(&mut self, conn: ConnId, room_id: &str, conns: &mut ConnectionTable) {
        let Some(room) = self.registry.room(room_id) else {
            debug!("Rematch request for unknown room {:?}", room_id);
            return;
        };
        if room.member_index(conn).is_none() {
            warn!(
                "Dropping rematch request from connection {} outside room {}",
                conn, room_id
            );
            return;
        }
        let other = room.other_member(conn);

        let Some(room) = self.registry.reset_ready(room_id) else {
            return;
        };
        let members = room.member_conns();
        let ready_state = room.ready_state();

        conns.send_to_all(&members, &ServerEvent::ReadyStateUpdate { ready_state });
        if let Some(other) = other {
            conns.send(other, ServerEvent::RematchRequested);
        }
    }

    fn on_rematch_response(
        &mut self,
        conn: ConnId,
        room_id: &str,
        accepted: bool,
        conns: &mut ConnectionTable,
    ) {
        let Some(room) = self.registry.room(room_id) else {
            debug!("Rematch response for unknown room {:?}", room_id);
            return;
        };
        if room.member_index(conn).is_none() {
            warn!(
                "Dropping rematch response from connection {} outside room {}",
                conn, room_id
            );
            return;
        }
        let requester = room.other_member(conn);

        if accepted {
            let Some(room) = self.registry.reset_ready(room_id) else {
                return;
            };
            let members = room.member_conns();
            let ready_state = room.ready_state();

            conns.send_to_all(&members, &ServerEvent::ReadyStateUpdate { ready_state });
            conns.send_to_all(&members, &ServerEvent::RematchAccepted);
        } else if let Some(requester) = requester {
            // Declines go to the requester only.
            conns.send(requester, ServerEvent::RematchDeclined);
        }
    }

    /// Shared removal path for exits and disconnects: survivors get the
    /// given notice plus a fresh ready snapshot. A connection with no seat
    /// produces no broadcast at all.
    fn depart(&mut self, conn: ConnId, notice: ServerEvent, conns: &mut ConnectionTable) {
        if let Some(departure) = self.registry.remove_conn(conn) {
            conns.send_to_all(&departure.remaining, &notice);
            conns.send_to_all(
                &departure.remaining,
                &ServerEvent::ReadyStateUpdate {
                    ready_state: departure.ready_state,
                },
            );
        }
    }
}
