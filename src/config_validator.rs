use crate::error::ThrottlerError;
use crate::rate_limit_config::RateLimiterConfig;
use validator::Validate;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<(), ThrottlerError> {
        if url.is_empty() {
            return Err(ThrottlerError::Validation(
                "Redis URL cannot be empty".to_string(),
            ));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(ThrottlerError::Validation(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates a bind address
    pub fn validate_bind_address(address: &str) -> Result<(), ThrottlerError> {
        if address.is_empty() {
            return Err(ThrottlerError::Validation(
                "Bind address cannot be empty".to_string(),
            ));
        }

        if !address.contains(':') {
            return Err(ThrottlerError::Validation(
                "Bind address must be in host:port format".to_string(),
            ));
        }

        Ok(())
    }

    /// Field checks from the derive plus the cross-field rules.
    pub fn validate_limiter_config(config: &RateLimiterConfig) -> Result<(), ThrottlerError> {
        config.validate()?;

        let ceiling = config.effective_ceiling();
        if config.min_reserve_tokens as f64 >= ceiling {
            return Err(ThrottlerError::Validation(format!(
                "min_reserve_tokens ({}) must be below the effective ceiling ({:.0})",
                config.min_reserve_tokens, ceiling
            )));
        }

        if config.lock_ttl.is_zero() || config.counter_ttl.is_zero() {
            return Err(ThrottlerError::Validation(
                "lock_ttl and counter_ttl must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
