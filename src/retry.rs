//! Bounded retry with exponential backoff and seeded jitter.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Random source for jitter. Seed it in tests for reproducible waits.
#[derive(Debug)]
pub struct Jitter {
    rng: Mutex<StdRng>,
}

impl Jitter {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Uniform factor in `[low, high)`; `low` when the range is empty.
    pub fn factor(&self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        self.rng.lock().gen_range(low..high)
    }

    pub fn scale(&self, duration: Duration, low: f64, high: f64) -> Duration {
        duration.mul_f64(self.factor(low, high))
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self::from_entropy()
    }
}

/// Classification the retry loop needs from an operation's error.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Wait the error itself asks for; `None` falls back to backoff.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation failed with a non-retryable error.
    Fatal(E),
    /// Every attempt failed; carries the last error.
    Exhausted { attempts: u32, last: E },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Backoff before retry number `retry` (zero-based):
    /// `initial · 2^retry`, capped, scaled by a factor in `[0.5, 1)`, never
    /// below `initial`.
    pub fn backoff(&self, retry: u32, jitter: &Jitter) -> Duration {
        let exp = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_backoff);
        jitter.scale(exp, 0.5, 1.0).max(self.initial_backoff)
    }

    /// Runs `op` until it succeeds, fails fatally, or runs out of attempts.
    ///
    /// `op` receives the one-based attempt number. Sleeping goes through
    /// `sleep` so callers can make the wait interruptible.
    pub async fn run<T, E, Op, Fut, S, SFut>(
        &self,
        jitter: &Jitter,
        mut op: Op,
        mut sleep: S,
    ) -> Result<T, RetryError<E>>
    where
        E: Retryable + std::fmt::Display,
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        S: FnMut(Duration) -> SFut,
        SFut: Future<Output = ()>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(RetryError::Fatal(err)),
                Err(err) if attempt >= self.max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    })
                }
                Err(err) => {
                    let delay = err
                        .retry_after()
                        .unwrap_or_else(|| self.backoff(attempt - 1, jitter));
                    debug!(attempt, delay_ms = delay.as_millis() as u64, reason = %err, "Retrying");
                    sleep(delay).await;
                }
            }
        }
    }
}
