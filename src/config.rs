use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::config_validator::ConfigValidator;
use crate::error::{Result, ThrottlerError};
use crate::rate_limit_config::{
    RateLimiterConfig, DEFAULT_BUFFER_FRACTION, DEFAULT_CAPACITY_PER_MINUTE,
    DEFAULT_MIN_RESERVE_TOKENS,
};
use crate::retry::RetryPolicy;

/// Process configuration, read from flags or the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "token-throttler", version, about = "Shared token-bucket limiter service")]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL; without it limits are only shared within this process
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Log level for this crate when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Namespace of the limiter registered at start-up
    #[arg(long, env = "LIMITER_NAMESPACE")]
    pub namespace: String,

    /// Tokens per minute granted by the upstream provider
    #[arg(long, env = "CAPACITY_PER_MINUTE", default_value_t = DEFAULT_CAPACITY_PER_MINUTE)]
    pub capacity_per_minute: u64,

    /// Share of capacity kept in reserve
    #[arg(long, env = "BUFFER_FRACTION", default_value_t = DEFAULT_BUFFER_FRACTION)]
    pub buffer_fraction: f64,

    /// Tokens that must stay in the bucket after every draw
    #[arg(long, env = "MIN_RESERVE_TOKENS", default_value_t = DEFAULT_MIN_RESERVE_TOKENS)]
    pub min_reserve_tokens: u64,

    /// Lifetime of the distributed lock
    #[arg(long, env = "LOCK_TTL_SECONDS", default_value_t = 70)]
    pub lock_ttl_secs: u64,

    /// Upper bound on every store round trip
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = 2_000)]
    pub store_timeout_ms: u64,

    /// Attempts before an acquisition gives up
    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = 5)]
    pub max_attempts: u32,
}

impl Config {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
    }

    /// Configuration of the limiter registered at start-up
    pub fn limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig::new(self.namespace.clone(), self.capacity_per_minute)
            .with_buffer_fraction(self.buffer_fraction)
            .with_min_reserve_tokens(self.min_reserve_tokens)
            .with_lock_ttl(Duration::from_secs(self.lock_ttl_secs))
    }

    pub fn validate(&self) -> Result<()> {
        ConfigValidator::validate_bind_address(&self.bind_addr.to_string())?;
        if let Some(url) = &self.redis_url {
            ConfigValidator::validate_redis_url(url)?;
        }
        if self.max_attempts == 0 {
            return Err(ThrottlerError::Config(
                "MAX_ATTEMPTS must be greater than 0".to_string(),
            ));
        }
        self.limiter_config().validate_all()
    }
}
