//! Store key layout for a limiter namespace.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ThrottlerError;

/// Allowed namespace shape. No `:` so a namespace cannot collide with
/// another namespace's keys.
pub static NAMESPACE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9_.-]{0,127}$").expect("namespace pattern is valid")
});

/// Keys owned by one limiter namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    /// Tokens currently available, as a fixed-precision decimal string.
    pub tokens: String,
    /// When `tokens` was last refilled, in seconds since the Unix epoch.
    pub refilled_at: String,
    /// Sentinel guarding the read-modify-write of the two keys above.
    pub lock: String,
}

impl StoreKeys {
    pub fn for_namespace(namespace: &str) -> Self {
        Self {
            tokens: format!("{}:tokens", namespace),
            refilled_at: format!("{}:refilled_at", namespace),
            lock: format!("{}:lock", namespace),
        }
    }
}

pub fn validate_namespace(namespace: &str) -> Result<(), ThrottlerError> {
    if namespace.is_empty() {
        return Err(ThrottlerError::Validation(
            "Namespace cannot be empty".to_string(),
        ));
    }

    if !NAMESPACE_PATTERN.is_match(namespace) {
        return Err(ThrottlerError::Validation(format!(
            "Namespace '{}' may only contain alphanumerics, '_', '-' and '.' (max 128 chars)",
            namespace
        )));
    }

    Ok(())
}

/// Encodes a token count or timestamp the way every process writes it.
pub fn encode_decimal(value: f64) -> String {
    format!("{:.6}", value)
}
