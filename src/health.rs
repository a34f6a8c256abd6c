use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::response::unix_now;
use crate::store::KeyValueStore;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub store: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub backend: String,
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

pub struct HealthChecker {
    store: Arc<dyn KeyValueStore>,
    started: Instant,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            started: Instant::now(),
        }
    }

    /// An unreachable store leaves the service `degraded`, not down: limiters
    /// keep granting from local accounting.
    pub async fn check_health(&self) -> HealthStatus {
        let store = self.check_store().await;
        let status = if store.error.is_none() { "healthy" } else { "degraded" };

        HealthStatus {
            status: status.to_string(),
            timestamp: unix_now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started.elapsed().as_secs(),
            dependencies: DependencyStatus { store },
        }
    }

    async fn check_store(&self) -> ServiceStatus {
        let start = Instant::now();
        let result = self.store.ping().await;
        let response_time_ms = start.elapsed().as_millis() as u64;
        let backend = self.store.backend_name().to_string();

        match result {
            Ok(()) => ServiceStatus {
                backend,
                status: "healthy".to_string(),
                response_time_ms,
                error: None,
            },
            Err(err) => ServiceStatus {
                backend,
                status: "unavailable".to_string(),
                response_time_ms,
                error: Some(err.to_string()),
            },
        }
    }
}
