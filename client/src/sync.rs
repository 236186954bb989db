//! Sample buffering, interpolation and clock synchronization
//!
//! Entities the local client does not control (the opposing paddle, and the
//! ball on the guest) arrive as timestamped position samples at irregular
//! intervals. This module turns that stream into smooth rendered values:
//! a small jitter buffer, linear interpolation between the two newest
//! samples, a hold on out-of-order arrivals, and a resnap when the
//! authoritative value diverges too far from what is on screen.

use shared::Vec2;
use std::collections::VecDeque;
use std::time::Duration;

/// Most samples ever kept per entity.
pub const SAMPLE_CAPACITY: usize = 3;

/// Samples older than this are evicted once more than two are buffered.
pub const SAMPLE_RETENTION_MS: u64 = 100;

/// Divergence beyond this discards the buffer and snaps to the
/// authoritative value instead of visibly sliding toward it.
pub const RESNAP_THRESHOLD: f32 = 40.0;

/// Cadence of the clock-sync round trip with the server.
pub const CLOCK_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Values that can be linearly interpolated and compared for divergence.
pub trait Lerp: Copy {
    fn lerp(a: Self, b: Self, t: f32) -> Self;
    fn distance(a: Self, b: Self) -> f32;
}

impl Lerp for f32 {
    fn lerp(a: Self, b: Self, t: f32) -> Self {
        a + (b - a) * t
    }

    fn distance(a: Self, b: Self) -> f32 {
        (b - a).abs()
    }
}

impl Lerp for Vec2 {
    fn lerp(a: Self, b: Self, t: f32) -> Self {
        Vec2 {
            x: f32::lerp(a.x, b.x, t),
            y: f32::lerp(a.y, b.y, t),
        }
    }

    fn distance(a: Self, b: Self) -> f32 {
        a.distance(&b)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Sample<T> {
    pub value: T,
    pub timestamp: u64,
}

/// Bounded FIFO of timestamped samples plus the last rendered value.
#[derive(Debug)]
pub struct SampleBuffer<T: Lerp> {
    samples: VecDeque<Sample<T>>,
    rendered: Option<T>,
}

impl<T: Lerp> SampleBuffer<T> {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(SAMPLE_CAPACITY),
            rendered: None,
        }
    }

    /// Buffers an authoritative sample. A value far from what is currently
    /// rendered resnaps instead of interpolating across the gap.
    pub fn push(&mut self, value: T, timestamp: u64) {
        if let Some(rendered) = self.rendered {
            if T::distance(rendered, value) > RESNAP_THRESHOLD {
                self.samples.clear();
                self.rendered = Some(value);
            }
        }

        self.samples.push_back(Sample { value, timestamp });
        while self.samples.len() > SAMPLE_CAPACITY {
            self.samples.pop_front();
        }
    }

    /// Produces the value to render at `now` (in the shared time base).
    ///
    /// With two or more samples buffered, interpolates between the two
    /// newest with progress clamped to [0, 1]; an out-of-order pair holds
    /// the last rendered value rather than interpolating backward.
    pub fn sample(&mut self, now: u64) -> Option<T> {
        self.evict(now);

        match self.samples.len() {
            0 => self.rendered,
            1 => {
                self.rendered = Some(self.samples[0].value);
                self.rendered
            }
            len => {
                let older = self.samples[len - 2];
                let newer = self.samples[len - 1];

                if older.timestamp >= newer.timestamp {
                    // Never interpolate backward; hold until ordering recovers.
                    return self.rendered;
                }

                let elapsed = now.saturating_sub(older.timestamp) as f32;
                let window = (newer.timestamp - older.timestamp) as f32;
                let progress = (elapsed / window).clamp(0.0, 1.0);

                let value = T::lerp(older.value, newer.value, progress);
                self.rendered = Some(value);
                self.rendered
            }
        }
    }

    pub fn rendered(&self) -> Option<T> {
        self.rendered
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.rendered = None;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn evict(&mut self, now: u64) {
        while self.samples.len() > 2 {
            let front = &self.samples[0];
            if front.timestamp + SAMPLE_RETENTION_MS < now {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

impl<T: Lerp> Default for SampleBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Estimated offset between the local clock and the server clock.
///
/// One round trip gives `offset = server_time - (send_time + rtt/2)`;
/// applying it to local time yields the shared base both peers stamp
/// entity updates in, so interpolation windows line up despite
/// independent clocks.
#[derive(Debug)]
pub struct ClockSync {
    offset_ms: i64,
    synced: bool,
}

impl ClockSync {
    pub fn new() -> Self {
        Self {
            offset_ms: 0,
            synced: false,
        }
    }

    /// Feeds one completed round trip: the echoed send time, the server's
    /// clock reading, and the local arrival time.
    pub fn observe(&mut self, client_send: u64, server_time: u64, now: u64) {
        let rtt = now.saturating_sub(client_send);
        let midpoint = client_send + rtt / 2;
        self.offset_ms = server_time as i64 - midpoint as i64;
        self.synced = true;
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Local time translated into the server's clock.
    pub fn server_now(&self, local_now: u64) -> u64 {
        (local_now as i64 + self.offset_ms).max(0) as u64
    }
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new()
    }
}
