//! Client networking: session protocol state and the connection loop
//!
//! `ClientState` is the pure half: it applies server events to local state
//! (match state, sample buffers, clock, session record) and returns the
//! events to send back. `Client` is the transport half: it owns the TCP
//! stream, the fixed-step physics/render tick, the clock-sync cadence, and
//! the bounded reconnection machine
//! (Disconnected → Connecting → Connected ⇄ Reconnecting → Disconnected).

use crate::game::{MatchPhase, MatchState};
use crate::session::{SessionRecord, SessionStore};
use crate::sync::{ClockSync, SampleBuffer, CLOCK_SYNC_INTERVAL};
use log::{debug, error, info, warn};
use shared::codec;
use shared::{
    clamp_to_field, now_ms, ClientEvent, ConnId, ReadyState, Role, ServerEvent, Vec2,
    PROTOCOL_VERSION,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};

/// Fixed physics/render step.
const TICK: Duration = Duration::from_millis(16);

/// Cap on a single step so a stalled task cannot teleport the ball.
const MAX_DT: f32 = 0.05;

/// Transport-level connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Bounded retry schedule for mid-game reconnection.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_secs(2),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given (zero-based) attempt, or None once the
    /// budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt < self.max_attempts {
            Some(self.backoff)
        } else {
            None
        }
    }
}

/// How the driver wants the session to begin.
#[derive(Debug, Clone)]
pub enum StartCommand {
    Create,
    Join(String),
    /// Rejoin from the persisted session record.
    Resume,
}

/// Why a session loop returned without a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Clean end (room exited); no reconnection wanted.
    Finished,
    /// The room is gone server-side; terminal, never retried.
    SessionLost,
}

/// Protocol-level client state, independent of any socket.
pub struct ClientState {
    pub conn_id: Option<ConnId>,
    pub room_id: Option<String>,
    pub role: Option<Role>,
    pub ready_state: ReadyState,
    pub match_state: Option<MatchState>,
    pub clock: ClockSync,
    /// Set when the server reports the room gone during a rejoin; terminal.
    pub session_lost: bool,
    /// Set when the opponent left or dropped mid-game.
    pub opponent_left: bool,
    /// Set while a rematch offer from the opponent is unanswered.
    pub rematch_offered: bool,
    ball_samples: SampleBuffer<Vec2>,
    opponent_paddle: SampleBuffer<f32>,
    store: SessionStore,
}

impl ClientState {
    pub fn new(store: SessionStore) -> Self {
        Self {
            conn_id: None,
            room_id: None,
            role: None,
            ready_state: Vec::new(),
            match_state: None,
            clock: ClockSync::new(),
            session_lost: false,
            opponent_left: false,
            rematch_offered: false,
            ball_samples: SampleBuffer::new(),
            opponent_paddle: SampleBuffer::new(),
            store,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// True while a match is running (or counting down / paused), which is
    /// when an unexpected drop warrants automatic reconnection.
    pub fn game_active(&self) -> bool {
        self.match_state
            .as_ref()
            .map(|m| m.in_progress())
            .unwrap_or(false)
    }

    /// The rejoin event derived from the persisted session, if any.
    pub fn rejoin_event(&self) -> Option<ClientEvent> {
        self.store.current().map(|record| ClientEvent::RejoinRoom {
            room_id: record.room_id.clone(),
            session_token: record.session_token.clone(),
        })
    }

    /// Applies one server event; returns events to send in response.
    pub fn apply_server_event(&mut self, event: ServerEvent, now: u64) -> Vec<ClientEvent> {
        let mut out = Vec::new();

        match event {
            ServerEvent::Connected { conn_id } => {
                info!("Connected; assigned id {}", conn_id);
                self.conn_id = Some(conn_id);
            }
            ServerEvent::Rejected { reason } => {
                error!("Server rejected the connection: {}", reason);
                self.session_lost = true;
            }
            ServerEvent::RoomCreated {
                room_id,
                session_token,
                role,
                ready_state,
            }
            | ServerEvent::RoomJoined {
                room_id,
                session_token,
                role,
                ready_state,
            } => {
                self.enter_room(room_id, session_token, role, ready_state);
            }
            ServerEvent::RoomError { message } => {
                if self.room_id.is_none() && self.store.current().is_some() {
                    // The rejoin was refused: the room is gone for good.
                    error!("Session lost: {}", message);
                    self.store.clear();
                    self.session_lost = true;
                } else {
                    warn!("Room error: {}", message);
                }
            }
            ServerEvent::PlayerJoined {
                player_id,
                ready_state,
            } => {
                info!("Player {} joined the room", player_id);
                self.ready_state = ready_state;
                if let Some(ms) = &mut self.match_state {
                    if ms.phase == MatchPhase::Lobby {
                        ms.phase = MatchPhase::ReadyCheck;
                    }
                }
            }
            ServerEvent::ReadyStateUpdate { ready_state } => {
                self.ready_state = ready_state;
            }
            ServerEvent::GameReady => {
                info!("Both players ready; starting countdown");
                if let Some(ms) = &mut self.match_state {
                    ms.begin_countdown(now);
                }
            }
            ServerEvent::PaddleUpdate {
                position,
                side,
                timestamp,
            } => {
                if let Some(ms) = &self.match_state {
                    // The relay already binds sides; this guards against
                    // ever steering our own paddle from the network.
                    if side != ms.own_side() {
                        self.opponent_paddle.push(position, timestamp);
                    }
                }
            }
            ServerEvent::BallUpdate {
                position,
                velocity,
                timestamp,
            } => {
                if self.role == Some(Role::Guest) {
                    self.ball_samples.push(position, timestamp);
                    if let Some(ms) = &mut self.match_state {
                        ms.ball_velocity = velocity;
                        // Authoritative traffic while we still think we are
                        // in the lobby means we rejoined a running game.
                        if matches!(ms.phase, MatchPhase::Lobby | MatchPhase::ReadyCheck) {
                            ms.phase = MatchPhase::Playing;
                        }
                    }
                }
            }
            ServerEvent::ScoreUpdate { score, scorer, .. } => {
                if let Some(ms) = &mut self.match_state {
                    ms.apply_score_update(score, scorer);
                }
                // The ball teleported back to center; stale samples would
                // interpolate across the whole field.
                self.ball_samples.clear();
            }
            ServerEvent::PauseUpdate {
                is_paused,
                countdown_value,
                from,
                ..
            } => {
                debug!(
                    "Pause update from connection {}: paused={}",
                    from, is_paused
                );
                if let Some(ms) = &mut self.match_state {
                    ms.apply_pause(is_paused, countdown_value, now);
                }
            }
            ServerEvent::PlayerExited | ServerEvent::PlayerDisconnected => {
                let mid_game = self
                    .match_state
                    .as_ref()
                    .map(|ms| !matches!(ms.phase, MatchPhase::Lobby | MatchPhase::ReadyCheck))
                    .unwrap_or(false);

                if mid_game {
                    // The pairing is over; exit the room so the server can
                    // reclaim it, and forget the session.
                    warn!("Opponent left mid-game; leaving the room");
                    self.opponent_left = true;
                    if let Some(room_id) = self.room_id.clone() {
                        out.push(ClientEvent::PlayerExit { room_id });
                    }
                    self.store.clear();
                    self.leave_room_locally();
                } else {
                    info!("Opponent left the lobby");
                    if let Some(ms) = &mut self.match_state {
                        ms.phase = MatchPhase::Lobby;
                    }
                }
            }
            ServerEvent::RematchRequested => {
                info!("Opponent requested a rematch");
                self.rematch_offered = true;
                if let Some(ms) = &mut self.match_state {
                    ms.phase = MatchPhase::RematchPending;
                }
            }
            ServerEvent::RematchAccepted => {
                info!("Rematch accepted; resetting match");
                self.rematch_offered = false;
                self.ball_samples.clear();
                self.opponent_paddle.clear();
                if let Some(ms) = &mut self.match_state {
                    ms.reset_match();
                    ms.begin_countdown(now);
                }
            }
            ServerEvent::RematchDeclined => {
                info!("Rematch declined");
                if let Some(ms) = &mut self.match_state {
                    ms.phase = MatchPhase::Ended;
                }
            }
            ServerEvent::Pong {
                client_time,
                server_time,
            } => {
                self.clock.observe(client_time, server_time, now);
                debug!("Clock offset estimated at {} ms", self.clock.offset_ms());
            }
        }

        out
    }

    /// One fixed step: advances phase deadlines and, on the host, the
    /// authoritative ball. Returns events to relay.
    pub fn physics_tick(&mut self, dt: f32, now: u64) -> Vec<ClientEvent> {
        let Some(ms) = &mut self.match_state else {
            return Vec::new();
        };

        ms.tick_phase(now);

        let mut out = Vec::new();
        if self.role == Some(Role::Host) && ms.phase == MatchPhase::Playing {
            if let Some(scorer) = ms.step(dt, now) {
                let score = ms.record_goal(scorer, now);
                out.push(ClientEvent::Score { score, scorer });
            }
            out.push(ClientEvent::BallMove {
                position: ms.ball_position,
                velocity: ms.ball_velocity,
                timestamp: self.clock.server_now(now),
            });
        }
        out
    }

    /// Refreshes interpolated entities for rendering. Runs after network
    /// events have been applied for this tick.
    pub fn render_tick(&mut self, now: u64) {
        let server_now = self.clock.server_now(now);
        let Some(ms) = &mut self.match_state else {
            return;
        };

        if let Some(y) = self.opponent_paddle.sample(server_now) {
            ms.set_paddle(ms.own_side().opposite(), y);
        }
        if self.role == Some(Role::Guest) {
            if let Some(position) = self.ball_samples.sample(server_now) {
                ms.ball_position = clamp_to_field(position);
            }
        }
    }

    /// Moves the local paddle and produces the relay event.
    pub fn move_own_paddle(&mut self, y: f32, now: u64) -> Option<ClientEvent> {
        let ms = self.match_state.as_mut()?;
        let side = ms.own_side();
        ms.set_paddle(side, y);

        Some(ClientEvent::PaddleMove {
            position: ms.paddle_y(side),
            side,
            timestamp: self.clock.server_now(now),
        })
    }

    pub fn toggle_ready_event(&self) -> Option<ClientEvent> {
        self.room_id
            .clone()
            .map(|room_id| ClientEvent::ToggleReady { room_id })
    }

    /// Explicit exit: forgets the session and produces the exit event.
    pub fn exit_room(&mut self) -> Option<ClientEvent> {
        let room_id = self.room_id.clone()?;
        self.store.clear();
        self.leave_room_locally();
        Some(ClientEvent::PlayerExit { room_id })
    }

    fn enter_room(
        &mut self,
        room_id: String,
        session_token: String,
        role: Role,
        ready_state: ReadyState,
    ) {
        info!("Entered room {} as {:?}", room_id, role);
        self.store.save(SessionRecord {
            room_id: room_id.clone(),
            session_token,
            role,
        });

        let mut ms = MatchState::new(role);
        if ready_state.len() >= 2 {
            ms.phase = MatchPhase::ReadyCheck;
        }

        self.room_id = Some(room_id);
        self.role = Some(role);
        self.ready_state = ready_state;
        self.match_state = Some(ms);
        self.ball_samples.clear();
        self.opponent_paddle.clear();
        self.opponent_left = false;
    }

    fn leave_room_locally(&mut self) {
        self.room_id = None;
        self.role = None;
        self.ready_state.clear();
        self.match_state = None;
        self.ball_samples.clear();
        self.opponent_paddle.clear();
    }
}

/// The connected client: transport, tick cadence, reconnection.
pub struct Client {
    server_addr: String,
    origin: String,
    policy: ReconnectPolicy,
    phase: ConnectionPhase,
    pub state: ClientState,
}

impl Client {
    pub fn new(server_addr: &str, origin: &str, store: SessionStore) -> Self {
        Self {
            server_addr: server_addr.to_string(),
            origin: origin.to_string(),
            policy: ReconnectPolicy::default(),
            phase: ConnectionPhase::Disconnected,
            state: ClientState::new(store),
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Runs the client until the session ends. Unexpected drops while a
    /// game is active are retried within the reconnect budget; everything
    /// else is terminal.
    pub async fn run(&mut self, command: StartCommand) -> Result<(), Box<dyn std::error::Error>> {
        let mut initial = Some(command);
        let mut attempt: u32 = 0;

        loop {
            if !matches!(self.phase, ConnectionPhase::Reconnecting { .. }) {
                self.phase = ConnectionPhase::Connecting;
            }
            self.state.conn_id = None;

            let result = match TcpStream::connect(&self.server_addr).await {
                Ok(stream) => {
                    self.phase = ConnectionPhase::Connected;
                    self.session(stream, &mut initial).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(SessionEnd::Finished) => {
                    self.phase = ConnectionPhase::Disconnected;
                    return Ok(());
                }
                Ok(SessionEnd::SessionLost) => {
                    self.phase = ConnectionPhase::Disconnected;
                    return Err("session lost: the room no longer exists".into());
                }
                Err(e) => {
                    // A drop after a completed connection restarts the budget.
                    if self.state.conn_id.is_some() {
                        attempt = 0;
                    }

                    if !self.state.game_active() {
                        self.phase = ConnectionPhase::Disconnected;
                        return Err(Box::new(e));
                    }

                    match self.policy.delay_for(attempt) {
                        Some(delay) => {
                            attempt += 1;
                            self.phase = ConnectionPhase::Reconnecting { attempt };
                            warn!(
                                "Connection lost mid-game ({}); retry {} of {} in {:?}",
                                e, attempt, self.policy.max_attempts, delay
                            );
                            sleep(delay).await;
                        }
                        None => {
                            self.phase = ConnectionPhase::Disconnected;
                            return Err("reconnection attempts exhausted".into());
                        }
                    }
                }
            }
        }
    }

    /// One connected session: handshake, then the select loop over inbound
    /// frames, the fixed tick, and the clock-sync cadence.
    async fn session(
        &mut self,
        stream: TcpStream,
        initial: &mut Option<StartCommand>,
    ) -> std::io::Result<SessionEnd> {
        stream.set_nodelay(true).ok();
        let (mut reader, mut writer) = stream.into_split();

        codec::write_frame(
            &mut writer,
            &ClientEvent::Connect {
                client_version: PROTOCOL_VERSION,
                origin: self.origin.clone(),
            },
        )
        .await?;

        // Frames are decoded on a dedicated task; channel reads are safe to
        // race against the tick arms below, a partial frame read is not.
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        let read_task = tokio::spawn(async move {
            loop {
                match codec::read_frame::<_, ServerEvent>(&mut reader).await {
                    Ok(event) => {
                        if event_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let mut tick = interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut clock_sync = interval(CLOCK_SYNC_INTERVAL);
        let mut last_tick = Instant::now();

        let result = loop {
            tokio::select! {
                // Biased polling keeps ordering deterministic: queued
                // network updates are applied before a pending tick steps
                // the physics that consumes them.
                biased;

                received = event_rx.recv() => {
                    let Some(event) = received else {
                        break Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "server closed the connection",
                        ));
                    };
                    let was_handshake = matches!(event, ServerEvent::Connected { .. });

                    let responses = self.state.apply_server_event(event, now_ms());
                    if let Err(e) = send_all(&mut writer, responses).await {
                        break Err(e);
                    }

                    if was_handshake {
                        let opening: Vec<ClientEvent> =
                            self.opening_event(initial).into_iter().collect();
                        if let Err(e) = send_all(&mut writer, opening).await {
                            break Err(e);
                        }
                    }

                    if self.state.session_lost {
                        break Ok(SessionEnd::SessionLost);
                    }
                    if self.state.opponent_left {
                        break Ok(SessionEnd::Finished);
                    }
                },

                _ = tick.tick() => {
                    let now = Instant::now();
                    let dt = (now - last_tick).as_secs_f32().min(MAX_DT);
                    last_tick = now;

                    // Network state applied above feeds this tick's step.
                    let events = self.state.physics_tick(dt, now_ms());
                    if let Err(e) = send_all(&mut writer, events).await {
                        break Err(e);
                    }
                    self.state.render_tick(now_ms());
                },

                _ = clock_sync.tick() => {
                    let ping = vec![ClientEvent::Ping { client_time: now_ms() }];
                    if let Err(e) = send_all(&mut writer, ping).await {
                        break Err(e);
                    }
                },
            }
        };

        read_task.abort();
        result
    }

    /// The first room action after a handshake: the driver's command on the
    /// first connection, the persisted rejoin on later ones.
    fn opening_event(&mut self, initial: &mut Option<StartCommand>) -> Option<ClientEvent> {
        match initial.take() {
            Some(StartCommand::Create) => Some(ClientEvent::CreateRoom),
            Some(StartCommand::Join(room_id)) => Some(ClientEvent::JoinRoom { room_id }),
            Some(StartCommand::Resume) | None => {
                let rejoin = self.state.rejoin_event();
                if rejoin.is_none() {
                    warn!("No stored session to resume");
                }
                rejoin
            }
        }
    }
}

async fn send_all(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    events: Vec<ClientEvent>,
) -> std::io::Result<()> {
    for event in events {
        codec::write_frame(writer, &event).await?;
    }
    Ok(())
}
