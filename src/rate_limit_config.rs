use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::config_validator::ConfigValidator;
use crate::error::ThrottlerError;
use crate::keys::NAMESPACE_PATTERN;

pub const DEFAULT_CAPACITY_PER_MINUTE: u64 = 200_000;
pub const DEFAULT_BUFFER_FRACTION: f64 = 0.15;
pub const DEFAULT_MIN_RESERVE_TOKENS: u64 = 5_000;
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(70);
pub const DEFAULT_COUNTER_TTL: Duration = Duration::from_secs(65);
pub const DEFAULT_SAFETY_MARGIN: f64 = 1.1;
pub const DEFAULT_WAIT_INFLATION: f64 = 1.1;
pub const DEFAULT_CONTENTION_DELAY: Duration = Duration::from_millis(100);

/// Configuration of one logical limiter. Immutable once handed to a limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RateLimiterConfig {
    /// Prefix of every store key this limiter owns.
    #[validate(regex(path = *NAMESPACE_PATTERN, message = "invalid namespace"))]
    pub namespace: String,

    /// Tokens per 60-second window granted by the upstream provider.
    #[validate(range(min = 1))]
    pub capacity_per_minute: u64,

    /// Share of capacity never handed out.
    #[serde(default = "default_buffer_fraction")]
    #[validate(range(min = 0.0, exclusive_max = 1.0))]
    pub buffer_fraction: f64,

    /// Tokens that must stay in the bucket after every draw.
    #[serde(default = "default_min_reserve_tokens")]
    pub min_reserve_tokens: u64,

    #[serde(default = "default_lock_ttl", with = "humantime_serde")]
    pub lock_ttl: Duration,

    /// Expiry of the shared counter when nobody refreshes it.
    #[serde(default = "default_counter_ttl", with = "humantime_serde")]
    pub counter_ttl: Duration,

    /// Multiplier applied to every requested draw to absorb estimation error.
    #[serde(default = "default_safety_margin")]
    #[validate(range(min = 1.0, max = 10.0))]
    pub safety_margin: f64,

    /// Multiplier applied to deficit-based waits.
    #[serde(default = "default_wait_inflation")]
    #[validate(range(min = 1.0, max = 10.0))]
    pub wait_inflation: f64,

    /// Base pause between attempts to take a contended lock.
    #[serde(default = "default_contention_delay", with = "humantime_serde")]
    pub contention_delay: Duration,
}

fn default_buffer_fraction() -> f64 {
    DEFAULT_BUFFER_FRACTION
}

fn default_min_reserve_tokens() -> u64 {
    DEFAULT_MIN_RESERVE_TOKENS
}

fn default_lock_ttl() -> Duration {
    DEFAULT_LOCK_TTL
}

fn default_counter_ttl() -> Duration {
    DEFAULT_COUNTER_TTL
}

fn default_safety_margin() -> f64 {
    DEFAULT_SAFETY_MARGIN
}

fn default_wait_inflation() -> f64 {
    DEFAULT_WAIT_INFLATION
}

fn default_contention_delay() -> Duration {
    DEFAULT_CONTENTION_DELAY
}

impl RateLimiterConfig {
    /// Create a configuration with the default tunables.
    pub fn new(namespace: impl Into<String>, capacity_per_minute: u64) -> Self {
        Self {
            namespace: namespace.into(),
            capacity_per_minute,
            buffer_fraction: DEFAULT_BUFFER_FRACTION,
            min_reserve_tokens: DEFAULT_MIN_RESERVE_TOKENS,
            lock_ttl: DEFAULT_LOCK_TTL,
            counter_ttl: DEFAULT_COUNTER_TTL,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            wait_inflation: DEFAULT_WAIT_INFLATION,
            contention_delay: DEFAULT_CONTENTION_DELAY,
        }
    }

    #[must_use]
    pub fn with_buffer_fraction(mut self, fraction: f64) -> Self {
        self.buffer_fraction = fraction;
        self
    }

    #[must_use]
    pub fn with_min_reserve_tokens(mut self, tokens: u64) -> Self {
        self.min_reserve_tokens = tokens;
        self
    }

    #[must_use]
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_counter_ttl(mut self, ttl: Duration) -> Self {
        self.counter_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_safety_margin(mut self, margin: f64) -> Self {
        self.safety_margin = margin;
        self
    }

    #[must_use]
    pub fn with_wait_inflation(mut self, inflation: f64) -> Self {
        self.wait_inflation = inflation;
        self
    }

    #[must_use]
    pub fn with_contention_delay(mut self, delay: Duration) -> Self {
        self.contention_delay = delay;
        self
    }

    /// `capacity × (1 − buffer_fraction)`: the most the shared counter may hold.
    pub fn effective_ceiling(&self) -> f64 {
        self.capacity_per_minute as f64 * (1.0 - self.buffer_fraction)
    }

    /// Largest draw, after the safety margin, that can ever be satisfied.
    pub fn admissible_ceiling(&self) -> f64 {
        self.effective_ceiling() - self.min_reserve_tokens as f64
    }

    /// Requested tokens inflated by the safety margin.
    pub fn with_margin(&self, tokens: u64) -> f64 {
        tokens as f64 * self.safety_margin
    }

    pub fn validate_all(&self) -> Result<(), ThrottlerError> {
        ConfigValidator::validate_limiter_config(self)
    }
}
