use log::info;
use shared::{
    clamp_paddle_y, clamp_to_field, paddle_x, PaddleSide, Role, Score, Vec2, BALL_BASE_SPEED,
    BALL_MAX_SPEED, BALL_SIZE, BALL_SPEED_STEP, FIELD_HEIGHT, FIELD_WIDTH, GOAL_COOLDOWN_MS,
    PADDLE_HEIGHT, PADDLE_WIDTH, WINNING_SCORE,
};

/// Countdown length before play starts or restarts.
pub const COUNTDOWN_MS: u64 = 3_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Alone in the room, waiting for an opponent
    Lobby,
    /// Room is full, not everyone has flagged ready
    ReadyCheck,
    /// Counting down to play; the ball serves when the deadline passes
    Starting { until_ms: u64 },
    Playing,
    Paused { countdown_value: Option<u32> },
    /// Winner declared; see `winner`
    Ended,
    /// A rematch offer is on the table
    RematchPending,
}

#[derive(Debug)]
pub struct MatchState {
    pub role: Role,
    pub phase: MatchPhase,
    pub ball_position: Vec2,
    pub ball_velocity: Vec2,
    pub left_paddle_y: f32,
    pub right_paddle_y: f32,
    pub score: Score,
    pub winner: Option<PaddleSide>,
    /// Goal re-entrancy guard: crossings are ignored until this deadline
    /// so several physics steps cannot count the same goal twice.
    goal_latched_until: u64,
}

impl MatchState {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            phase: MatchPhase::Lobby,
            ball_position: center_ball(),
            ball_velocity: Vec2::default(),
            left_paddle_y: center_paddle(),
            right_paddle_y: center_paddle(),
            score: Score::default(),
            winner: None,
            goal_latched_until: 0,
        }
    }

    pub fn own_side(&self) -> PaddleSide {
        self.role.paddle_side()
    }

    pub fn paddle_y(&self, side: PaddleSide) -> f32 {
        match side {
            PaddleSide::Left => self.left_paddle_y,
            PaddleSide::Right => self.right_paddle_y,
        }
    }

    pub fn set_paddle(&mut self, side: PaddleSide, y: f32) {
        let y = clamp_paddle_y(y);
        match side {
            PaddleSide::Left => self.left_paddle_y = y,
            PaddleSide::Right => self.right_paddle_y = y,
        }
    }

    /// Ball speed grows with every point scored, up to a cap.
    pub fn current_speed(&self) -> f32 {
        (BALL_BASE_SPEED * (1.0 + self.score.total() as f32 * BALL_SPEED_STEP)).min(BALL_MAX_SPEED)
    }

    pub fn begin_countdown(&mut self, now: u64) {
        self.phase = MatchPhase::Starting {
            until_ms: now + COUNTDOWN_MS,
        };
    }

    /// Advances phase deadlines. A countdown that expires moves to Playing;
    /// a stationary ball at that moment is served, a moving one (resume
    /// after pause) keeps its velocity.
    pub fn tick_phase(&mut self, now: u64) {
        if let MatchPhase::Starting { until_ms } = self.phase {
            if now >= until_ms {
                self.phase = MatchPhase::Playing;
                if self.ball_velocity == Vec2::default() {
                    self.serve();
                }
            }
        }
    }

    fn serve(&mut self) {
        // Serve direction alternates with the total point count so neither
        // side receives every serve.
        let dir = if self.score.total() % 2 == 0 { 1.0 } else { -1.0 };
        let speed = self.current_speed();
        self.ball_velocity = Vec2::new(dir * speed * 0.8, speed * 0.6);
    }

    /// One fixed physics step; host only. Returns the scoring side when the
    /// ball crosses a goal line, at most once per latch window.
    pub fn step(&mut self, dt: f32, now: u64) -> Option<PaddleSide> {
        self.ball_position.x += self.ball_velocity.x * dt;
        self.ball_position.y += self.ball_velocity.y * dt;

        // Wall reflection
        if self.ball_position.y <= 0.0 {
            self.ball_position.y = 0.0;
            self.ball_velocity.y = self.ball_velocity.y.abs();
        } else if self.ball_position.y + BALL_SIZE >= FIELD_HEIGHT {
            self.ball_position.y = FIELD_HEIGHT - BALL_SIZE;
            self.ball_velocity.y = -self.ball_velocity.y.abs();
        }

        // Paddle reflection
        if self.ball_velocity.x < 0.0
            && self.ball_intersects_paddle(PaddleSide::Left)
        {
            self.ball_position.x = paddle_x(PaddleSide::Left) + PADDLE_WIDTH;
            self.ball_velocity.x = self.ball_velocity.x.abs();
        } else if self.ball_velocity.x > 0.0
            && self.ball_intersects_paddle(PaddleSide::Right)
        {
            self.ball_position.x = paddle_x(PaddleSide::Right) - BALL_SIZE;
            self.ball_velocity.x = -self.ball_velocity.x.abs();
        }

        // Goal lines
        let scorer = if self.ball_position.x + BALL_SIZE < 0.0 {
            Some(PaddleSide::Right)
        } else if self.ball_position.x > FIELD_WIDTH {
            Some(PaddleSide::Left)
        } else {
            None
        };

        match scorer {
            Some(side) if now >= self.goal_latched_until => {
                self.goal_latched_until = now + GOAL_COOLDOWN_MS;
                Some(side)
            }
            _ => None,
        }
    }

    fn ball_intersects_paddle(&self, side: PaddleSide) -> bool {
        let px = paddle_x(side);
        let py = self.paddle_y(side);
        let b = &self.ball_position;

        b.x < px + PADDLE_WIDTH
            && b.x + BALL_SIZE > px
            && b.y < py + PADDLE_HEIGHT
            && b.y + BALL_SIZE > py
    }

    /// Applies a goal the local simulation detected (host only): bumps the
    /// score, re-centers the ball, and either ends the match or counts down
    /// to the next serve. Returns the new score for relaying.
    pub fn record_goal(&mut self, scorer: PaddleSide, now: u64) -> Score {
        match scorer {
            PaddleSide::Left => self.score.left += 1,
            PaddleSide::Right => self.score.right += 1,
        }

        self.ball_position = center_ball();
        self.ball_velocity = Vec2::default();

        if !self.check_winner() {
            self.begin_countdown(now);
        }
        self.score
    }

    /// Applies an authoritative score relay (both sides run this; win
    /// detection is a client responsibility).
    pub fn apply_score_update(&mut self, score: Score, scorer: PaddleSide) {
        self.score = score;
        info!("Score update: {:?} scored, now {:?}", scorer, score);

        if self.role == Role::Guest {
            // The host already re-centered its ball; mirror that here so
            // interpolation resumes from the restart position.
            self.ball_position = center_ball();
            self.ball_velocity = Vec2::default();
        }
        self.check_winner();
    }

    fn check_winner(&mut self) -> bool {
        let winner = if self.score.left >= WINNING_SCORE {
            Some(PaddleSide::Left)
        } else if self.score.right >= WINNING_SCORE {
            Some(PaddleSide::Right)
        } else {
            None
        };

        if let Some(side) = winner {
            self.winner = Some(side);
            self.phase = MatchPhase::Ended;
            self.ball_velocity = Vec2::default();
            info!("Match ended; {:?} wins", side);
        }
        winner.is_some()
    }

    /// Applies a relayed pause/resume. Pausing freezes the phase; resuming
    /// runs the relayed countdown (if any) before play continues with the
    /// ball's velocity intact.
    pub fn apply_pause(&mut self, is_paused: bool, countdown_value: Option<u32>, now: u64) {
        if is_paused {
            self.phase = MatchPhase::Paused { countdown_value };
        } else {
            match countdown_value {
                Some(seconds) if seconds > 0 => {
                    self.phase = MatchPhase::Starting {
                        until_ms: now + u64::from(seconds) * 1_000,
                    };
                }
                _ => self.phase = MatchPhase::Playing,
            }
        }
    }

    /// Resets ball, paddles, score and winner to defaults for a rematch.
    pub fn reset_match(&mut self) {
        self.ball_position = center_ball();
        self.ball_velocity = Vec2::default();
        self.left_paddle_y = center_paddle();
        self.right_paddle_y = center_paddle();
        self.score = Score::default();
        self.winner = None;
        self.goal_latched_until = 0;
        self.phase = MatchPhase::ReadyCheck;
    }

    /// Clamped authoritative ball position for the guest's rendering path.
    pub fn set_ball(&mut self, position: Vec2, velocity: Vec2) {
        self.ball_position = clamp_to_field(position);
        self.ball_velocity = velocity;
    }

    pub fn in_progress(&self) -> bool {
        matches!(
            self.phase,
            MatchPhase::Starting { .. } | MatchPhase::Playing | MatchPhase::Paused { .. }
        )
    }
}

fn center_ball() -> Vec2 {
    Vec2::new(
        (FIELD_WIDTH - BALL_SIZE) / 2.0,
        (FIELD_HEIGHT - BALL_SIZE) / 2.0,
    )
}

fn center_paddle() -> f32 {
    (FIELD_HEIGHT - PADDLE_HEIGHT) / 2.0
}
