use crate::error::ThrottlerError;
use crate::keys::validate_namespace;
use crate::rate_limit_config::RateLimiterConfig;
use serde::Deserialize;
use std::time::Duration;
use validator::Validate;

/// Body of `POST /limiters/:namespace/acquire` and `/refund`.
#[derive(Debug, Deserialize, Validate)]
pub struct TokensRequest {
    #[validate(range(min = 1, message = "tokens must be a positive integer"))]
    pub tokens: u64,
}

/// Body of `PUT /limiters/:namespace`.
#[derive(Debug, Deserialize, Validate)]
pub struct LimiterSettings {
    #[validate(range(min = 1))]
    pub capacity_per_minute: u64,
    pub buffer_fraction: Option<f64>,
    pub min_reserve_tokens: Option<u64>,
    #[serde(default, with = "humantime_serde")]
    pub lock_ttl: Option<Duration>,
    pub safety_margin: Option<f64>,
}

impl LimiterSettings {
    pub fn into_config(self, namespace: &str) -> RateLimiterConfig {
        let mut config = RateLimiterConfig::new(namespace, self.capacity_per_minute);
        if let Some(fraction) = self.buffer_fraction {
            config = config.with_buffer_fraction(fraction);
        }
        if let Some(reserve) = self.min_reserve_tokens {
            config = config.with_min_reserve_tokens(reserve);
        }
        if let Some(ttl) = self.lock_ttl {
            config = config.with_lock_ttl(ttl);
        }
        if let Some(margin) = self.safety_margin {
            config = config.with_safety_margin(margin);
        }
        config
    }
}

/// Request validation utilities
pub struct RequestValidator;

impl RequestValidator {
    pub fn validate_tokens_request(
        namespace: &str,
        body: &TokensRequest,
    ) -> Result<(), ThrottlerError> {
        validate_namespace(namespace)?;
        body.validate()?;
        Ok(())
    }

    /// Builds a limiter configuration from a registration request
    pub fn validate_settings(
        namespace: &str,
        settings: LimiterSettings,
    ) -> Result<RateLimiterConfig, ThrottlerError> {
        validate_namespace(namespace)?;
        settings.validate()?;

        let config = settings.into_config(namespace);
        config.validate_all()?;
        Ok(config)
    }
}
