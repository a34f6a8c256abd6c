use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::rate_limit_config::RateLimiterConfig;
use crate::rate_limiter::Reservation;

#[derive(Debug, Serialize)]
pub struct AcquireResponse {
    pub namespace: String,
    pub tokens: u64,
    pub reserved: f64,
    pub remaining: f64,
    pub waited_ms: u64,
    pub degraded: bool,
}

impl AcquireResponse {
    pub fn granted(tokens: u64, reservation: Reservation, waited: Duration) -> Self {
        Self {
            namespace: reservation.namespace,
            tokens,
            reserved: reservation.reserved,
            remaining: reservation.remaining,
            waited_ms: waited.as_millis() as u64,
            degraded: reservation.degraded,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub namespace: String,
    pub refunded: u64,
    pub level: f64,
}

#[derive(Debug, Serialize)]
pub struct LimiterListResponse {
    pub namespaces: Vec<String>,
    pub count: usize,
}

impl LimiterListResponse {
    pub fn new(namespaces: Vec<String>) -> Self {
        Self {
            count: namespaces.len(),
            namespaces,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub message: String,
    pub config: RateLimiterConfig,
}

impl ConfigResponse {
    pub fn registered(config: RateLimiterConfig) -> Self {
        Self {
            message: "Limiter registered".to_string(),
            config,
        }
    }

    pub fn removed(config: RateLimiterConfig) -> Self {
        Self {
            message: "Limiter removed".to_string(),
            config,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub timestamp: u64,
    pub store: String,
    pub limiters: usize,
}

impl ReadinessResponse {
    pub fn ready(store: &str, limiters: usize) -> Self {
        Self {
            status: "ready".to_string(),
            timestamp: unix_now(),
            store: store.to_string(),
            limiters,
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
