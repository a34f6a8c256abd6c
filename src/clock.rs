//! Time sources for refill math and store expiry.
//!
//! Timestamps are durations since the Unix epoch so that a refill stamp
//! written by one process can be read by another.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time as a duration since the Unix epoch. Never goes backwards
    /// within one clock instance.
    fn now(&self) -> Duration;
}

/// Monotonic clock anchored to the wall clock when it was created.
///
/// Built on `tokio::time::Instant`, so tests running on a paused runtime see
/// it advance together with `tokio::time::sleep`.
#[derive(Debug, Clone)]
pub struct SystemClock {
    wall_origin: Duration,
    origin: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            wall_origin: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default(),
            origin: tokio::time::Instant::now(),
        }
    }

    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.wall_origin + self.origin.elapsed()
    }
}

/// Hand-driven clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(start: Duration) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: Duration) {
        let mut now = self.now.lock();
        if to > *now {
            *now = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}
