use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::ThrottlerError;
use crate::response::unix_now;

/// Counters kept per limiter namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireMetrics {
    pub total_requests: u64,
    pub granted: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub tokens_granted: u64,
    pub tokens_refunded: u64,
    pub last_reset: u64,
}

impl Default for AcquireMetrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            granted: 0,
            rejected: 0,
            timed_out: 0,
            tokens_granted: 0,
            tokens_refunded: 0,
            last_reset: unix_now(),
        }
    }
}

impl AcquireMetrics {
    fn add(&mut self, other: &AcquireMetrics) {
        self.total_requests += other.total_requests;
        self.granted += other.granted;
        self.rejected += other.rejected;
        self.timed_out += other.timed_out;
        self.tokens_granted += other.tokens_granted;
        self.tokens_refunded += other.tokens_refunded;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub global: AcquireMetrics,
    pub namespaces: HashMap<String, AcquireMetrics>,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    namespaces: Arc<RwLock<HashMap<String, AcquireMetrics>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one acquisition.
    pub async fn record_acquire(&self, namespace: &str, tokens: u64, outcome: Result<(), &ThrottlerError>) {
        let mut metrics = self.namespaces.write().await;
        let entry = metrics.entry(namespace.to_string()).or_default();

        entry.total_requests += 1;
        match outcome {
            Ok(()) => {
                entry.granted += 1;
                entry.tokens_granted += tokens;
            }
            Err(ThrottlerError::RateLimitTimeout { .. }) => entry.timed_out += 1,
            Err(_) => entry.rejected += 1,
        }
    }

    pub async fn record_refund(&self, namespace: &str, tokens: u64) {
        let mut metrics = self.namespaces.write().await;
        metrics.entry(namespace.to_string()).or_default().tokens_refunded += tokens;
    }

    pub async fn get(&self, namespace: &str) -> Option<AcquireMetrics> {
        self.namespaces.read().await.get(namespace).cloned()
    }

    pub async fn reset(&self, namespace: &str) {
        self.namespaces.write().await.remove(namespace);
    }

    pub async fn report(&self) -> MetricsReport {
        let namespaces = self.namespaces.read().await.clone();
        let mut global = AcquireMetrics::default();
        for metrics in namespaces.values() {
            global.add(metrics);
        }
        MetricsReport { global, namespaces }
    }
}
