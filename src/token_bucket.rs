//! Token bucket accounting.
//!
//! Pure functions over plain numbers so the same math serves the shared
//! counter and the per-process shadow. Timestamps are durations since the
//! Unix epoch; rates are tokens per minute.

use std::time::Duration;

use crate::error::ThrottlerError;

const WINDOW_SECS: f64 = 60.0;

/// Adds the tokens earned between `last` and `now`, capped at `ceiling`.
///
/// A `now` earlier than `last` (clock skew between hosts) adds nothing and
/// keeps `last`, so the returned stamp never moves backwards.
pub fn refill(
    current: f64,
    last: Duration,
    now: Duration,
    capacity_per_minute: f64,
    ceiling: f64,
) -> (f64, Duration) {
    let current = current.clamp(0.0, ceiling);
    if now <= last {
        return (current, last);
    }

    let elapsed = (now - last).as_secs_f64();
    let added = elapsed * capacity_per_minute / WINDOW_SECS;
    ((current + added).min(ceiling), now)
}

/// Rejects draws that no amount of waiting could ever satisfy.
pub fn validate(requested: f64, ceiling: f64) -> Result<(), ThrottlerError> {
    if requested > ceiling {
        return Err(ThrottlerError::CapacityExceeded { requested, ceiling });
    }
    Ok(())
}

/// Returns the new level if `requested` can be drawn while leaving
/// `min_reserve` behind.
pub fn try_deduct(current: f64, requested: f64, min_reserve: f64) -> Option<f64> {
    let remaining = current - requested;
    (remaining >= min_reserve).then_some(remaining)
}

/// Time until the bucket refills enough for `requested` plus the reserve.
pub fn deficit_wait(
    current: f64,
    requested: f64,
    min_reserve: f64,
    capacity_per_minute: f64,
) -> Duration {
    let deficit = (requested + min_reserve - current).max(0.0);
    Duration::from_secs_f64(deficit * WINDOW_SECS / capacity_per_minute)
}

/// Per-process view of the bucket.
///
/// Mirrors the shared counter after every store round trip and takes over
/// when the store cannot be reached.
#[derive(Debug, Clone)]
pub struct LocalBucket {
    pub tokens: f64,
    pub last_refill: Duration,
    /// Whether `tokens` has been observed from the shared counter at least
    /// once, or the bucket has been used on its own.
    pub synced: bool,
}

impl LocalBucket {
    pub fn full(ceiling: f64, now: Duration) -> Self {
        Self {
            tokens: ceiling,
            last_refill: now,
            synced: false,
        }
    }

    pub fn sync(&mut self, tokens: f64, stamp: Duration) {
        self.tokens = tokens;
        self.last_refill = stamp;
        self.synced = true;
    }

    /// Level the bucket would hold at `now`, without mutating it.
    pub fn estimate(&self, now: Duration, capacity_per_minute: f64, ceiling: f64) -> f64 {
        refill(self.tokens, self.last_refill, now, capacity_per_minute, ceiling).0
    }
}
