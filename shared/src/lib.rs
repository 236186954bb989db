use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod codec;

pub const PROTOCOL_VERSION: u32 = 1;

pub const FIELD_WIDTH: f32 = 800.0;
pub const FIELD_HEIGHT: f32 = 600.0;
pub const PADDLE_WIDTH: f32 = 12.0;
pub const PADDLE_HEIGHT: f32 = 80.0;
pub const PADDLE_MARGIN: f32 = 24.0;
pub const BALL_SIZE: f32 = 12.0;
pub const BALL_BASE_SPEED: f32 = 300.0;
pub const BALL_SPEED_STEP: f32 = 0.125;
pub const BALL_MAX_SPEED: f32 = 600.0;
pub const WINNING_SCORE: u32 = 10;
pub const GOAL_COOLDOWN_MS: u64 = 500;

pub const MAX_ROOM_MEMBERS: usize = 2;
pub const ROOM_CODE_LEN: usize = 6;

/// Connection identifier assigned by the server on handshake.
pub type ConnId = u32;

/// Ordered ready snapshot: one `(connection, ready)` pair per room member,
/// host first. Broadcast in full on every membership or ready mutation so
/// clients can reconcile without prior state.
pub type ReadyState = Vec<(ConnId, bool)>;

// Get current wall-clock time in milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(&self, other: &Vec2) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Score {
    pub left: u32,
    pub right: u32,
}

impl Score {
    pub fn total(&self) -> u32 {
        self.left + self.right
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaddleSide {
    Left,
    Right,
}

impl PaddleSide {
    pub fn opposite(self) -> PaddleSide {
        match self {
            PaddleSide::Left => PaddleSide::Right,
            PaddleSide::Right => PaddleSide::Left,
        }
    }
}

/// Room role. The first member of a room is the host and is authoritative
/// for ball physics and score; the second member is the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    /// The paddle a role is allowed to drive. The server enforces this
    /// binding on incoming paddle updates.
    pub fn paddle_side(self) -> PaddleSide {
        match self {
            Role::Host => PaddleSide::Left,
            Role::Guest => PaddleSide::Right,
        }
    }
}

/// Horizontal position of a paddle's left edge.
pub fn paddle_x(side: PaddleSide) -> f32 {
    match side {
        PaddleSide::Left => PADDLE_MARGIN,
        PaddleSide::Right => FIELD_WIDTH - PADDLE_MARGIN - PADDLE_WIDTH,
    }
}

/// Clamps a paddle's top edge to the playfield.
pub fn clamp_paddle_y(y: f32) -> f32 {
    y.clamp(0.0, FIELD_HEIGHT - PADDLE_HEIGHT)
}

/// Clamps a ball position (top-left corner) to the playfield.
pub fn clamp_to_field(p: Vec2) -> Vec2 {
    Vec2 {
        x: p.x.clamp(0.0, FIELD_WIDTH - BALL_SIZE),
        y: p.y.clamp(0.0, FIELD_HEIGHT - BALL_SIZE),
    }
}

/// Messages sent from clients to the server.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum ClientEvent {
    /// Handshake; must be the first frame on a connection.
    Connect {
        client_version: u32,
        origin: String,
    },
    CreateRoom,
    JoinRoom {
        room_id: String,
    },
    /// Reconnection with a previously issued session token.
    RejoinRoom {
        room_id: String,
        session_token: String,
    },
    ToggleReady {
        room_id: String,
    },
    PaddleMove {
        position: f32,
        side: PaddleSide,
        timestamp: u64,
    },
    /// Host-only; enforced server-side.
    BallMove {
        position: Vec2,
        velocity: Vec2,
        timestamp: u64,
    },
    /// Host-only; enforced server-side.
    Score {
        score: Score,
        scorer: PaddleSide,
    },
    PauseGame {
        is_paused: bool,
        countdown_value: Option<u32>,
    },
    PlayerExit {
        room_id: String,
    },
    RematchRequest {
        room_id: String,
    },
    RematchResponse {
        room_id: String,
        accepted: bool,
    },
    /// Clock-sync round trip; also serves as keep-alive.
    Ping {
        client_time: u64,
    },
    Disconnect,
}

/// Messages sent from the server to clients.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum ServerEvent {
    Connected {
        conn_id: ConnId,
    },
    Rejected {
        reason: String,
    },
    RoomCreated {
        room_id: String,
        session_token: String,
        role: Role,
        ready_state: ReadyState,
    },
    RoomJoined {
        room_id: String,
        session_token: String,
        role: Role,
        ready_state: ReadyState,
    },
    RoomError {
        message: String,
    },
    PlayerJoined {
        player_id: ConnId,
        ready_state: ReadyState,
    },
    ReadyStateUpdate {
        ready_state: ReadyState,
    },
    GameReady,
    PaddleUpdate {
        position: f32,
        side: PaddleSide,
        timestamp: u64,
    },
    BallUpdate {
        position: Vec2,
        velocity: Vec2,
        timestamp: u64,
    },
    ScoreUpdate {
        score: Score,
        scorer: PaddleSide,
        timestamp: u64,
    },
    PauseUpdate {
        is_paused: bool,
        countdown_value: Option<u32>,
        timestamp: u64,
        from: ConnId,
    },
    PlayerExited,
    PlayerDisconnected,
    RematchRequested,
    RematchAccepted,
    RematchDeclined,
    Pong {
        client_time: u64,
        server_time: u64,
    },
}
