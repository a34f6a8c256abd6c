use crate::clock::{Clock, SystemClock};
use crate::error::{Result, ThrottlerError};
use crate::keys::validate_namespace;
use crate::rate_limit_config::RateLimiterConfig;
use crate::rate_limiter::TokenLimiter;
use crate::retry::RetryPolicy;
use crate::store::KeyValueStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Limiters served by this process, one per namespace, all sharing one store.
pub struct LimiterRegistry {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    limiters: RwLock<HashMap<String, TokenLimiter>>,
}

impl LimiterRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, retry: RetryPolicy) -> Self {
        Self::with_clock(store, retry, SystemClock::shared())
    }

    pub fn with_clock(store: Arc<dyn KeyValueStore>, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            retry,
            limiters: RwLock::new(HashMap::new()),
        }
    }

    /// Register a limiter, replacing any existing one for the namespace.
    ///
    /// Waiters on a replaced limiter finish against the old configuration.
    pub async fn register(&self, config: RateLimiterConfig) -> Result<TokenLimiter> {
        let limiter = TokenLimiter::builder(config, self.store.clone())
            .clock(self.clock.clone())
            .retry_policy(self.retry.clone())
            .build()?;

        let namespace = limiter.namespace().to_string();
        let replaced = self
            .limiters
            .write()
            .await
            .insert(namespace.clone(), limiter.clone())
            .is_some();

        info!(namespace = %namespace, replaced, "Limiter registered");
        Ok(limiter)
    }

    pub async fn get(&self, namespace: &str) -> Result<TokenLimiter> {
        validate_namespace(namespace)?;
        self.limiters
            .read()
            .await
            .get(namespace)
            .cloned()
            .ok_or_else(|| ThrottlerError::NotFound(namespace.to_string()))
    }

    /// Stop serving a namespace. Its store entries are left to expire.
    pub async fn remove(&self, namespace: &str) -> Result<TokenLimiter> {
        validate_namespace(namespace)?;
        let removed = self
            .limiters
            .write()
            .await
            .remove(namespace)
            .ok_or_else(|| ThrottlerError::NotFound(namespace.to_string()))?;

        info!(namespace = %namespace, "Limiter removed");
        Ok(removed)
    }

    pub async fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.limiters.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }
}
