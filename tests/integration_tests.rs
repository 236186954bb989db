//! Integration tests for the match relay and its client protocol
//!
//! These tests run a real server on loopback TCP and drive raw framed
//! connections through the full session protocol.

use client::game::MatchState;
use server::network::Server;
use shared::codec;
use shared::{
    now_ms, ClientEvent, ConnId, PaddleSide, Role, Score, ServerEvent, Vec2, PROTOCOL_VERSION,
    WINNING_SCORE,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

/// ROOM LIFECYCLE TESTS
mod room_tests {
    use super::*;

    /// Scenario: create, join, ready-up end to end.
    #[tokio::test]
    async fn create_join_ready_flow() {
        let addr = spawn_server().await;

        let mut host = TestClient::connect(addr).await;
        let (room_id, role, ready_state) = host.create_room().await;
        assert_eq!(role, Role::Host);
        assert_eq!(ready_state, vec![(host.conn_id, false)]);

        let mut guest = TestClient::connect(addr).await;
        guest
            .send(ClientEvent::JoinRoom {
                room_id: room_id.clone(),
            })
            .await;

        match guest.recv().await {
            ServerEvent::RoomJoined {
                role, ready_state, ..
            } => {
                assert_eq!(role, Role::Guest);
                assert_eq!(
                    ready_state,
                    vec![(host.conn_id, false), (guest.conn_id, false)]
                );
            }
            other => panic!("expected RoomJoined, got {:?}", other),
        }

        match host.recv().await {
            ServerEvent::PlayerJoined { player_id, .. } => {
                assert_eq!(player_id, guest.conn_id)
            }
            other => panic!("expected PlayerJoined, got {:?}", other),
        }
        match host.recv().await {
            ServerEvent::ReadyStateUpdate { ready_state } => {
                assert_eq!(ready_state.len(), 2)
            }
            other => panic!("expected ReadyStateUpdate, got {:?}", other),
        }

        host.send(ClientEvent::ToggleReady {
            room_id: room_id.clone(),
        })
        .await;
        guest
            .send(ClientEvent::ToggleReady {
                room_id: room_id.clone(),
            })
            .await;

        host.recv_until(|e| matches!(e, ServerEvent::GameReady)).await;
        guest
            .recv_until(|e| matches!(e, ServerEvent::GameReady))
            .await;
    }

    #[tokio::test]
    async fn third_join_is_rejected() {
        let addr = spawn_server().await;

        let mut host = TestClient::connect(addr).await;
        let (room_id, _, _) = host.create_room().await;

        let mut guest = TestClient::connect(addr).await;
        guest
            .send(ClientEvent::JoinRoom {
                room_id: room_id.clone(),
            })
        .await;
        guest
            .recv_until(|e| matches!(e, ServerEvent::RoomJoined { .. }))
            .await;

        let mut third = TestClient::connect(addr).await;
        third.send(ClientEvent::JoinRoom { room_id }).await;
        match third.recv().await {
            ServerEvent::RoomError { message } => assert_eq!(message, "Room is full"),
            other => panic!("expected RoomError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn join_unknown_room_reports_not_found() {
        let addr = spawn_server().await;

        let mut client = TestClient::connect(addr).await;
        client
            .send(ClientEvent::JoinRoom {
                room_id: "AAAAAA".to_string(),
            })
            .await;

        match client.recv().await {
            ServerEvent::RoomError { message } => assert_eq!(message, "Room not found"),
            other => panic!("expected RoomError, got {:?}", other),
        }
    }

    /// A departed member's token can rejoin while the room survives.
    #[tokio::test]
    async fn token_rejoin_after_drop() {
        let addr = spawn_server().await;

        let mut host = TestClient::connect(addr).await;
        let (room_id, _, _) = host.create_room().await;

        let mut guest = TestClient::connect(addr).await;
        guest
            .send(ClientEvent::JoinRoom {
                room_id: room_id.clone(),
            })
            .await;
        let guest_token = match guest.recv().await {
            ServerEvent::RoomJoined { session_token, .. } => session_token,
            other => panic!("expected RoomJoined, got {:?}", other),
        };

        guest.close().await;
        host.recv_until(|e| matches!(e, ServerEvent::PlayerDisconnected))
            .await;

        let mut returned = TestClient::connect(addr).await;
        returned
            .send(ClientEvent::RejoinRoom {
                room_id,
                session_token: guest_token,
            })
            .await;

        match returned.recv().await {
            ServerEvent::RoomJoined { role, .. } => assert_eq!(role, Role::Guest),
            other => panic!("expected RoomJoined, got {:?}", other),
        }
    }
}

/// RELAY AND AUTHORITY TESTS
mod relay_tests {
    use super::*;

    /// Scenario: host ball updates reach the guest verbatim, with no echo.
    #[tokio::test]
    async fn host_ball_reaches_guest_without_echo() {
        let addr = spawn_server().await;
        let (mut host, mut guest, _room_id) = paired_room(addr).await;

        let sent_at = now_ms();
        host.send(ClientEvent::BallMove {
            position: Vec2::new(10.0, 20.0),
            velocity: Vec2::new(1.0, 1.0),
            timestamp: sent_at,
        })
        .await;

        match guest.recv().await {
            ServerEvent::BallUpdate {
                position,
                velocity,
                timestamp,
            } => {
                assert_eq!(position, Vec2::new(10.0, 20.0));
                assert_eq!(velocity, Vec2::new(1.0, 1.0));
                assert_eq!(timestamp, sent_at);
            }
            other => panic!("expected BallUpdate, got {:?}", other),
        }

        host.expect_silence().await;
    }

    /// Scenario: guest ball updates are dropped entirely.
    #[tokio::test]
    async fn guest_ball_is_dropped() {
        let addr = spawn_server().await;
        let (mut host, mut guest, _room_id) = paired_room(addr).await;

        guest
            .send(ClientEvent::BallMove {
                position: Vec2::new(1.0, 2.0),
                velocity: Vec2::new(3.0, 4.0),
                timestamp: now_ms(),
            })
            .await;

        host.expect_silence().await;
        guest.expect_silence().await;
    }

    /// Scenario: a winning score relays to both sides and the client state
    /// machine declares the winner.
    #[tokio::test]
    async fn winning_score_ends_match_client_side() {
        let addr = spawn_server().await;
        let (mut host, mut guest, _room_id) = paired_room(addr).await;

        let final_score = Score {
            left: WINNING_SCORE,
            right: 3,
        };
        host.send(ClientEvent::Score {
            score: final_score,
            scorer: PaddleSide::Left,
        })
        .await;

        let mut guest_match = MatchState::new(Role::Guest);
        for peer in [&mut host, &mut guest] {
            match peer.recv().await {
                ServerEvent::ScoreUpdate { score, scorer, .. } => {
                    assert_eq!(score, final_score);
                    assert_eq!(scorer, PaddleSide::Left);
                }
                other => panic!("expected ScoreUpdate, got {:?}", other),
            }
        }

        guest_match.apply_score_update(final_score, PaddleSide::Left);
        assert_eq!(guest_match.winner, Some(PaddleSide::Left));
    }

    #[tokio::test]
    async fn paddle_side_is_bound_to_sender_role() {
        let addr = spawn_server().await;
        let (mut host, mut guest, _room_id) = paired_room(addr).await;

        // Spoofed side: dropped.
        guest
            .send(ClientEvent::PaddleMove {
                position: 50.0,
                side: PaddleSide::Left,
                timestamp: now_ms(),
            })
            .await;
        host.expect_silence().await;

        // Own side: relayed to the host only.
        guest
            .send(ClientEvent::PaddleMove {
                position: 220.0,
                side: PaddleSide::Right,
                timestamp: now_ms(),
            })
            .await;
        match host.recv().await {
            ServerEvent::PaddleUpdate { position, side, .. } => {
                assert_eq!(position, 220.0);
                assert_eq!(side, PaddleSide::Right);
            }
            other => panic!("expected PaddleUpdate, got {:?}", other),
        }
        guest.expect_silence().await;
    }

    #[tokio::test]
    async fn pause_relays_to_room_with_origin() {
        let addr = spawn_server().await;
        let (mut host, mut guest, _room_id) = paired_room(addr).await;

        guest
            .send(ClientEvent::PauseGame {
                is_paused: true,
                countdown_value: Some(3),
            })
            .await;

        let guest_conn_id = guest.conn_id;
        for peer in [&mut host, &mut guest] {
            match peer.recv().await {
                ServerEvent::PauseUpdate {
                    is_paused,
                    countdown_value,
                    from,
                    timestamp,
                } => {
                    assert!(is_paused);
                    assert_eq!(countdown_value, Some(3));
                    assert_eq!(from, guest_conn_id);
                    assert!(timestamp > 0);
                }
                other => panic!("expected PauseUpdate, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn clock_sync_round_trip() {
        let addr = spawn_server().await;
        let mut client = TestClient::connect(addr).await;

        let sent = now_ms();
        client.send(ClientEvent::Ping { client_time: sent }).await;

        match client.recv().await {
            ServerEvent::Pong {
                client_time,
                server_time,
            } => {
                assert_eq!(client_time, sent);
                assert!(server_time >= sent.saturating_sub(1_000));
            }
            other => panic!("expected Pong, got {:?}", other),
        }
    }
}

/// SESSION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// Scenario: the host drops mid-game; the guest is told, reacts by
    /// exiting (the documented client behavior), and the room is gone.
    #[tokio::test]
    async fn host_disconnect_tears_down_session() {
        let addr = spawn_server().await;
        let (host, mut guest, room_id) = paired_room(addr).await;

        host.close().await;

        guest
            .recv_until(|e| matches!(e, ServerEvent::PlayerDisconnected))
            .await;

        // The surviving client leaves the dead pairing, emptying the room.
        guest
            .send(ClientEvent::PlayerExit {
                room_id: room_id.clone(),
            })
            .await;
        sleep(Duration::from_millis(100)).await;

        let mut late = TestClient::connect(addr).await;
        late.send(ClientEvent::JoinRoom { room_id }).await;
        match late.recv().await {
            ServerEvent::RoomError { message } => assert_eq!(message, "Room not found"),
            other => panic!("expected RoomError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn exit_notifies_other_member() {
        let addr = spawn_server().await;
        let (mut host, mut guest, room_id) = paired_room(addr).await;

        guest.send(ClientEvent::PlayerExit { room_id }).await;

        host.recv_until(|e| matches!(e, ServerEvent::PlayerExited))
            .await;
        match host.recv().await {
            ServerEvent::ReadyStateUpdate { ready_state } => {
                assert_eq!(ready_state, vec![(host.conn_id, false)]);
            }
            other => panic!("expected ReadyStateUpdate, got {:?}", other),
        }
        guest.expect_silence().await;
    }

    #[tokio::test]
    async fn rematch_flow() {
        let addr = spawn_server().await;
        let (mut host, mut guest, room_id) = paired_room(addr).await;

        host.send(ClientEvent::RematchRequest {
            room_id: room_id.clone(),
        })
        .await;

        guest
            .recv_until(|e| matches!(e, ServerEvent::RematchRequested))
            .await;

        guest
            .send(ClientEvent::RematchResponse {
                room_id: room_id.clone(),
                accepted: true,
            })
            .await;

        host.recv_until(|e| matches!(e, ServerEvent::RematchAccepted))
            .await;
        guest
            .recv_until(|e| matches!(e, ServerEvent::RematchAccepted))
            .await;
    }

    #[tokio::test]
    async fn rematch_decline_reaches_requester_only() {
        let addr = spawn_server().await;
        let (mut host, mut guest, room_id) = paired_room(addr).await;

        host.send(ClientEvent::RematchRequest {
            room_id: room_id.clone(),
        })
        .await;
        guest
            .recv_until(|e| matches!(e, ServerEvent::RematchRequested))
            .await;

        guest
            .send(ClientEvent::RematchResponse {
                room_id,
                accepted: false,
            })
            .await;

        host.recv_until(|e| matches!(e, ServerEvent::RematchDeclined))
            .await;
        guest.expect_silence().await;
    }

    #[tokio::test]
    async fn origin_allow_list_is_enforced() {
        let server = Server::bind("127.0.0.1:0", vec!["https://game.example".to_string()])
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut reader, mut writer) = stream.into_split();
        codec::write_frame(
            &mut writer,
            &ClientEvent::Connect {
                client_version: PROTOCOL_VERSION,
                origin: "https://evil.example".to_string(),
            },
        )
        .await
        .unwrap();

        let event: ServerEvent = timeout(Duration::from_secs(2), codec::read_frame(&mut reader))
            .await
            .expect("timed out waiting for rejection")
            .unwrap();
        match event {
            ServerEvent::Rejected { reason } => assert_eq!(reason, "Origin not allowed"),
            other => panic!("expected Rejected, got {:?}", other),
        }
    }
}

// HELPERS

struct TestClient {
    conn_id: ConnId,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Connects and completes the handshake.
    async fn connect(addr: SocketAddr) -> TestClient {
        let stream = TcpStream::connect(addr).await.expect("connect failed");
        let (mut reader, mut writer) = stream.into_split();

        codec::write_frame(
            &mut writer,
            &ClientEvent::Connect {
                client_version: PROTOCOL_VERSION,
                origin: "http://localhost".to_string(),
            },
        )
        .await
        .expect("handshake send failed");

        let event: ServerEvent = timeout(Duration::from_secs(2), codec::read_frame(&mut reader))
            .await
            .expect("timed out waiting for handshake")
            .expect("handshake read failed");

        let conn_id = match event {
            ServerEvent::Connected { conn_id } => conn_id,
            other => panic!("expected Connected, got {:?}", other),
        };

        TestClient {
            conn_id,
            reader,
            writer,
        }
    }

    async fn send(&mut self, event: ClientEvent) {
        codec::write_frame(&mut self.writer, &event)
            .await
            .expect("send failed");
    }

    async fn recv(&mut self) -> ServerEvent {
        timeout(Duration::from_secs(2), codec::read_frame(&mut self.reader))
            .await
            .expect("timed out waiting for event")
            .expect("read failed")
    }

    /// Discards events until one matches the predicate.
    async fn recv_until<F: Fn(&ServerEvent) -> bool>(&mut self, predicate: F) -> ServerEvent {
        for _ in 0..16 {
            let event = self.recv().await;
            if predicate(&event) {
                return event;
            }
        }
        panic!("predicate never matched");
    }

    /// Asserts nothing arrives within a short window.
    async fn expect_silence(&mut self) {
        let result: Result<std::io::Result<ServerEvent>, _> =
            timeout(Duration::from_millis(150), codec::read_frame(&mut self.reader)).await;
        if let Ok(Ok(event)) = result {
            panic!("expected silence, got {:?}", event);
        }
    }

    async fn close(self) {
        drop(self.reader);
        drop(self.writer);
        // Give the server a moment to observe the close.
        sleep(Duration::from_millis(50)).await;
    }
}

async fn spawn_server() -> SocketAddr {
    let server = Server::bind("127.0.0.1:0", Vec::new())
        .await
        .expect("bind failed");
    let addr = server.local_addr().expect("no local addr");
    tokio::spawn(server.run());
    addr
}

/// A room with both seats taken and the join chatter drained.
async fn paired_room(addr: SocketAddr) -> (TestClient, TestClient, String) {
    let mut host = TestClient::connect(addr).await;
    let (room_id, _, _) = host.create_room().await;

    let mut guest = TestClient::connect(addr).await;
    guest
        .send(ClientEvent::JoinRoom {
            room_id: room_id.clone(),
        })
        .await;

    guest
        .recv_until(|e| matches!(e, ServerEvent::ReadyStateUpdate { .. }))
        .await;
    host.recv_until(|e| matches!(e, ServerEvent::ReadyStateUpdate { .. }))
        .await;

    (host, guest, room_id)
}

impl TestClient {
    /// Creates a room and returns its id, our role, and the snapshot.
    async fn create_room(&mut self) -> (String, Role, Vec<(ConnId, bool)>) {
        self.send(ClientEvent::CreateRoom).await;
        match self.recv().await {
            ServerEvent::RoomCreated {
                room_id,
                role,
                ready_state,
                ..
            } => (room_id, role, ready_state),
            other => panic!("expected RoomCreated, got {:?}", other),
        }
    }
}
