//! The token limiter shared by every worker that calls a rate-limited
//! upstream.
//!
//! Each acquisition takes the namespace lock, refills the shared counter,
//! and either deducts the draw or releases the lock and sleeps for the
//! deficit. A store outage degrades to per-process accounting instead of
//! failing callers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify, OwnedMutexGuard};
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, ThrottlerError};
use crate::keys::{encode_decimal, StoreKeys};
use crate::lock::{DistributedLock, LockGuard};
use crate::rate_limit_config::RateLimiterConfig;
use crate::retry::{Jitter, RetryError, RetryPolicy, Retryable};
use crate::store::{KeyValueStore, StoreError};
use crate::token_bucket::{self, LocalBucket};

/// Jitter range applied on top of the inflated deficit wait.
const WAIT_JITTER: (f64, f64) = (1.01, 1.05);
/// Jitter range applied to the pause between contended lock attempts.
const CONTENTION_JITTER: (f64, f64) = (1.0, 1.5);

/// Tokens reserved by a successful [`TokenLimiter::acquire`].
#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub namespace: String,
    /// Tokens deducted, including the safety margin.
    pub reserved: f64,
    /// Tokens left in the bucket right after the draw.
    pub remaining: f64,
    /// Whether local accounting stood in for the shared counter.
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    Store,
    Local,
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketSnapshot {
    pub namespace: String,
    pub available: f64,
    pub effective_ceiling: f64,
    pub capacity_per_minute: u64,
    pub min_reserve_tokens: u64,
    pub source: SnapshotSource,
    pub degraded_events: u64,
}

/// Why a single acquisition attempt did not reserve tokens.
#[derive(Debug)]
enum AttemptError {
    Insufficient { available: f64, wait: Duration },
    LockContended { waited: Duration },
    Internal(String),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Insufficient { available, wait } => {
                write!(f, "insufficient tokens ({:.2} available), retry in {:?}", available, wait)
            }
            AttemptError::LockContended { waited } => {
                write!(f, "lock contended for {:?}", waited)
            }
            AttemptError::Internal(msg) => write!(f, "{}", msg),
        }
    }
}

impl Retryable for AttemptError {
    fn is_retryable(&self) -> bool {
        !matches!(self, AttemptError::Internal(_))
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            AttemptError::Insufficient { wait, .. } => Some(*wait),
            _ => None,
        }
    }
}

enum LockOutcome {
    Held(LockGuard),
    Contended(Duration),
    Unreachable(StoreError),
}

/// Distributed token-bucket limiter for one namespace.
///
/// Cheap to clone; clones share state. Waiters are not served in any
/// particular order.
#[derive(Clone)]
pub struct TokenLimiter {
    inner: Arc<LimiterState>,
}

struct LimiterState {
    config: RateLimiterConfig,
    keys: StoreKeys,
    store: Arc<dyn KeyValueStore>,
    lock: DistributedLock,
    clock: Arc<dyn Clock>,
    jitter: Jitter,
    retry: RetryPolicy,
    local: Arc<Mutex<LocalBucket>>,
    replenished: Notify,
    degraded_events: AtomicU64,
}

pub struct TokenLimiterBuilder {
    config: RateLimiterConfig,
    store: Arc<dyn KeyValueStore>,
    clock: Option<Arc<dyn Clock>>,
    jitter: Option<Jitter>,
    retry: Option<RetryPolicy>,
}

impl TokenLimiterBuilder {
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Some(jitter);
        self
    }

    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn build(self) -> Result<TokenLimiter> {
        self.config.validate_all()?;

        let clock = self.clock.unwrap_or_else(SystemClock::shared);
        let keys = StoreKeys::for_namespace(&self.config.namespace);
        let lock = DistributedLock::new(self.store.clone(), keys.lock.clone(), self.config.lock_ttl);
        let local = LocalBucket::full(self.config.effective_ceiling(), clock.now());

        info!(
            namespace = %self.config.namespace,
            capacity_per_minute = self.config.capacity_per_minute,
            effective_ceiling = self.config.effective_ceiling(),
            store = self.store.backend_name(),
            "Token limiter ready"
        );

        Ok(TokenLimiter {
            inner: Arc::new(LimiterState {
                keys,
                lock,
                clock,
                store: self.store,
                jitter: self.jitter.unwrap_or_default(),
                retry: self.retry.unwrap_or_default(),
                local: Arc::new(Mutex::new(local)),
                replenished: Notify::new(),
                degraded_events: AtomicU64::new(0),
                config: self.config,
            }),
        })
    }
}

impl TokenLimiter {
    pub fn builder(config: RateLimiterConfig, store: Arc<dyn KeyValueStore>) -> TokenLimiterBuilder {
        TokenLimiterBuilder {
            config,
            store,
            clock: None,
            jitter: None,
            retry: None,
        }
    }

    pub fn new(config: RateLimiterConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        Self::builder(config, store).build()
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.inner.config
    }

    pub fn namespace(&self) -> &str {
        &self.inner.config.namespace
    }

    /// How many times this instance has fallen back to local accounting.
    pub fn degraded_events(&self) -> u64 {
        self.inner.degraded_events.load(Ordering::Relaxed)
    }

    /// Waits until `tokens` (plus the safety margin) are reserved against the
    /// shared ceiling.
    ///
    /// Fails at once with `CapacityExceeded` when the draw can never fit, and
    /// with `RateLimitTimeout` once the retry policy runs out of attempts.
    /// Store outages are absorbed. Dropping the future while it waits leaves
    /// no tokens deducted and no lock held.
    pub async fn acquire(&self, tokens: u64) -> Result<Reservation> {
        if tokens == 0 {
            return Err(ThrottlerError::Validation(
                "tokens must be a positive integer".to_string(),
            ));
        }

        let state: &LimiterState = &self.inner;
        let requested = state.config.with_margin(tokens);
        token_bucket::validate(requested, state.config.admissible_ceiling())?;

        let outcome = state
            .retry
            .run(
                &state.jitter,
                |attempt| Arc::clone(&self.inner).attempt(requested, attempt),
                move |delay| state.wait_for_tokens(delay),
            )
            .await;

        match outcome {
            Ok(reservation) => Ok(reservation),
            Err(RetryError::Fatal(err)) => Err(ThrottlerError::Internal(err.to_string())),
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(
                    namespace = %state.config.namespace,
                    requested = tokens,
                    attempts,
                    last_error = %last,
                    "Gave up reserving tokens"
                );
                Err(ThrottlerError::RateLimitTimeout {
                    requested: tokens,
                    attempts,
                })
            }
        }
    }

    /// Returns unused tokens to the bucket and wakes local waiters.
    ///
    /// Returns the level after the refund.
    pub async fn refund(&self, tokens: u64) -> Result<f64> {
        if tokens == 0 {
            return Err(ThrottlerError::Validation(
                "tokens must be a positive integer".to_string(),
            ));
        }

        let state = Arc::clone(&self.inner);
        let level = tokio::spawn(async move { state.refund_locked(tokens as f64).await })
            .await
            .map_err(|e| ThrottlerError::Internal(format!("refund task failed: {}", e)))??;

        self.inner.replenished.notify_waiters();
        Ok(level)
    }

    /// Current level, read without taking the lock.
    pub async fn snapshot(&self) -> BucketSnapshot {
        let state: &LimiterState = &self.inner;
        let config = &state.config;
        let now = state.clock.now();

        let (available, source) = match state.read_shared(now).await {
            Ok((tokens, stamp)) => (state.refill(tokens, stamp, now).0, SnapshotSource::Store),
            Err(err) => {
                debug!(namespace = %config.namespace, error = %err, "Snapshot from local state");
                let local = state.local.lock().await;
                (
                    local.estimate(now, config.capacity_per_minute as f64, config.effective_ceiling()),
                    SnapshotSource::Local,
                )
            }
        };

        BucketSnapshot {
            namespace: config.namespace.clone(),
            available,
            effective_ceiling: config.effective_ceiling(),
            capacity_per_minute: config.capacity_per_minute,
            min_reserve_tokens: config.min_reserve_tokens,
            source,
            degraded_events: self.degraded_events(),
        }
    }
}

impl LimiterState {
    fn capacity(&self) -> f64 {
        self.config.capacity_per_minute as f64
    }

    fn min_reserve(&self) -> f64 {
        self.config.min_reserve_tokens as f64
    }

    fn refill(&self, tokens: f64, last: Duration, now: Duration) -> (f64, Duration) {
        token_bucket::refill(tokens, last, now, self.capacity(), self.config.effective_ceiling())
    }

    async fn attempt(self: Arc<Self>, requested: f64, attempt: u32) -> std::result::Result<Reservation, AttemptError> {
        let mut local = Arc::clone(&self.local).lock_owned().await;

        // A short shadow only skips the lock once the store agrees; refunds
        // from other processes and outage recovery can leave it low.
        if local.synced {
            let now = self.clock.now();
            let estimate = local.estimate(now, self.capacity(), self.config.effective_ceiling());
            if token_bucket::try_deduct(estimate, requested, self.min_reserve()).is_none() {
                let current = match self.read_shared(now).await {
                    Ok((tokens, stamp)) => {
                        let (current, stamp) = self.refill(tokens, stamp, now);
                        local.sync(current, stamp);
                        current
                    }
                    Err(err) => {
                        self.note_degraded("read counter", &err);
                        estimate
                    }
                };
                if token_bucket::try_deduct(current, requested, self.min_reserve()).is_none() {
                    return Err(self.insufficient(current, requested, attempt));
                }
            }
        }

        match self.lock_with_patience().await {
            LockOutcome::Held(guard) => {
                let state = Arc::clone(&self);
                // Spawned so the critical section finishes and releases the
                // lock even if the caller stops polling.
                tokio::spawn(async move { state.reserve_locked(guard, local, requested, attempt).await })
                    .await
                    .map_err(|e| AttemptError::Internal(format!("reservation task failed: {}", e)))?
            }
            LockOutcome::Contended(waited) => Err(AttemptError::LockContended { waited }),
            LockOutcome::Unreachable(err) => {
                self.note_degraded("acquire lock", &err);
                self.reserve_local(&mut local, requested, attempt)
            }
        }
    }

    /// Polls the lock until it is free, the store fails, or one lock TTL
    /// has passed.
    async fn lock_with_patience(&self) -> LockOutcome {
        let started = tokio::time::Instant::now();
        loop {
            match self.lock.try_acquire().await {
                Ok(Some(guard)) => return LockOutcome::Held(guard),
                Ok(None) => {
                    let waited = started.elapsed();
                    if waited >= self.config.lock_ttl {
                        return LockOutcome::Contended(waited);
                    }
                    let (low, high) = CONTENTION_JITTER;
                    tokio::time::sleep(self.jitter.scale(self.config.contention_delay, low, high)).await;
                }
                Err(err) => return LockOutcome::Unreachable(err),
            }
        }
    }

    async fn reserve_locked(
        &self,
        guard: LockGuard,
        mut local: OwnedMutexGuard<LocalBucket>,
        requested: f64,
        attempt: u32,
    ) -> std::result::Result<Reservation, AttemptError> {
        let now = self.clock.now();
        let (current, last, mut degraded) = match self.read_shared(now).await {
            Ok((tokens, stamp)) => (tokens, stamp, false),
            Err(err) => {
                self.note_degraded("read counter", &err);
                (local.tokens, local.last_refill, true)
            }
        };
        let (current, stamp) = self.refill(current, last, now);

        let outcome = match token_bucket::try_deduct(current, requested, self.min_reserve()) {
            Some(remaining) => {
                if let Err(err) = self.write_shared(remaining, stamp).await {
                    self.note_degraded("write counter", &err);
                    degraded = true;
                }
                local.sync(remaining, stamp);
                trace!(
                    namespace = %self.config.namespace,
                    reserved = requested,
                    remaining,
                    "Tokens reserved"
                );
                Ok(self.reservation(requested, remaining, degraded))
            }
            None => {
                local.sync(current, stamp);
                Err(self.insufficient(current, requested, attempt))
            }
        };

        guard.release().await;
        outcome
    }

    fn reserve_local(
        &self,
        local: &mut LocalBucket,
        requested: f64,
        attempt: u32,
    ) -> std::result::Result<Reservation, AttemptError> {
        let now = self.clock.now();
        let (current, stamp) = self.refill(local.tokens, local.last_refill, now);

        match token_bucket::try_deduct(current, requested, self.min_reserve()) {
            Some(remaining) => {
                local.sync(remaining, stamp);
                Ok(self.reservation(requested, remaining, true))
            }
            None => {
                local.sync(current, stamp);
                Err(self.insufficient(current, requested, attempt))
            }
        }
    }

    async fn refund_locked(&self, tokens: f64) -> Result<f64> {
        let mut local = Arc::clone(&self.local).lock_owned().await;
        let now = self.clock.now();
        let ceiling = self.config.effective_ceiling();

        match self.lock_with_patience().await {
            LockOutcome::Held(guard) => {
                let (current, last) = match self.read_shared(now).await {
                    Ok(shared) => shared,
                    Err(err) => {
                        self.note_degraded("read counter", &err);
                        (local.tokens, local.last_refill)
                    }
                };
                let (current, stamp) = self.refill(current, last, now);
                let level = (current + tokens).min(ceiling);
                if let Err(err) = self.write_shared(level, stamp).await {
                    self.note_degraded("write counter", &err);
                }
                local.sync(level, stamp);
                guard.release().await;
                debug!(namespace = %self.config.namespace, refunded = tokens, level, "Tokens refunded");
                Ok(level)
            }
            LockOutcome::Contended(waited) => Err(ThrottlerError::StoreUnavailable(format!(
                "lock for {} held for {:?}, refund dropped",
                self.config.namespace, waited
            ))),
            LockOutcome::Unreachable(err) => {
                self.note_degraded("acquire lock", &err);
                let (current, stamp) = self.refill(local.tokens, local.last_refill, now);
                let level = (current + tokens).min(ceiling);
                local.sync(level, stamp);
                Ok(level)
            }
        }
    }

    /// Reads the shared counter and its refill stamp.
    ///
    /// A missing counter reads as a full bucket so an abandoned namespace
    /// recovers once its entry expires.
    async fn read_shared(&self, now: Duration) -> std::result::Result<(f64, Duration), StoreError> {
        let ceiling = self.config.effective_ceiling();
        let Some(raw) = self.store.get(&self.keys.tokens).await? else {
            debug!(namespace = %self.config.namespace, "No shared counter, starting full");
            return Ok((ceiling, now));
        };
        let tokens = parse_decimal(&self.keys.tokens, &raw)?;

        let stamp = match self.store.get(&self.keys.refilled_at).await? {
            Some(raw) => {
                let secs = parse_decimal(&self.keys.refilled_at, &raw)?;
                Duration::try_from_secs_f64(secs).map_err(|_| StoreError::Corrupt {
                    key: self.keys.refilled_at.clone(),
                    value: raw,
                })?
            }
            None => now,
        };

        Ok((tokens.clamp(0.0, ceiling), stamp))
    }

    /// Writes the counter and its stamp together, so a failed write can
    /// never pair a new level with an old stamp.
    async fn write_shared(&self, tokens: f64, stamp: Duration) -> std::result::Result<(), StoreError> {
        let tokens = encode_decimal(tokens);
        let stamp = encode_decimal(stamp.as_secs_f64());
        self.store
            .set_many(
                &[
                    (self.keys.tokens.as_str(), tokens.as_str()),
                    (self.keys.refilled_at.as_str(), stamp.as_str()),
                ],
                self.config.counter_ttl,
            )
            .await
    }

    fn reservation(&self, requested: f64, remaining: f64, degraded: bool) -> Reservation {
        Reservation {
            namespace: self.config.namespace.clone(),
            reserved: requested,
            remaining,
            degraded,
        }
    }

    fn insufficient(&self, available: f64, requested: f64, attempt: u32) -> AttemptError {
        let deficit = token_bucket::deficit_wait(available, requested, self.min_reserve(), self.capacity());
        let (low, high) = WAIT_JITTER;
        let wait = self
            .jitter
            .scale(deficit.mul_f64(self.config.wait_inflation), low, high)
            .max(Duration::from_millis(1));

        debug!(
            namespace = %self.config.namespace,
            available,
            requested,
            attempt,
            wait_ms = wait.as_millis() as u64,
            "Not enough tokens, waiting for refill"
        );
        AttemptError::Insufficient { available, wait }
    }

    fn note_degraded(&self, operation: &str, err: &StoreError) {
        self.degraded_events.fetch_add(1, Ordering::Relaxed);
        warn!(
            namespace = %self.config.namespace,
            operation,
            error = %err,
            "Store unavailable, falling back to local accounting"
        );
    }

    /// Sleeps for `delay` or until a refund lands, whichever comes first.
    async fn wait_for_tokens(&self, delay: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.replenished.notified() => {
                trace!(namespace = %self.config.namespace, "Woken by refund");
            }
        }
    }
}

fn parse_decimal(key: &str, raw: &str) -> std::result::Result<f64, StoreError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| StoreError::Corrupt {
            key: key.to_string(),
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use tokio_test::{assert_err, assert_ok};

    const T0: Duration = Duration::from_secs(1_700_000_000);

    fn limiter_with(config: RateLimiterConfig) -> (TokenLimiter, Arc<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = TokenLimiter::builder(config, store.clone())
            .clock(clock.clone())
            .jitter(Jitter::seeded(11))
            .build()
            .unwrap();
        (limiter, store, clock)
    }

    fn instance(
        config: RateLimiterConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<ManualClock>,
        attempts: u32,
    ) -> TokenLimiter {
        TokenLimiter::builder(config, store)
            .clock(clock)
            .jitter(Jitter::seeded(13))
            .retry_policy(RetryPolicy::new(attempts))
            .build()
            .unwrap()
    }

    /// Memory store whose writes touching a refill stamp can be made to fail.
    struct StampFaultStore {
        inner: MemoryStore,
        fail_stamp: std::sync::atomic::AtomicBool,
    }

    impl StampFaultStore {
        fn new(clock: Arc<ManualClock>) -> Self {
            Self {
                inner: MemoryStore::with_clock(clock),
                fail_stamp: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn fail_stamp_writes(&self, fail: bool) {
            self.fail_stamp.store(fail, Ordering::SeqCst);
        }

        fn check(&self, key: &str) -> std::result::Result<(), StoreError> {
            if self.fail_stamp.load(Ordering::SeqCst) && key.ends_with(":refilled_at") {
                return Err(StoreError::Unavailable("stamp write rejected".into()));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl KeyValueStore for StampFaultStore {
        async fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str, ttl: Duration) -> std::result::Result<(), StoreError> {
            self.check(key)?;
            self.inner.set(key, value, ttl).await
        }

        async fn set_many(
            &self,
            entries: &[(&str, &str)],
            ttl: Duration,
        ) -> std::result::Result<(), StoreError> {
            for (key, _) in entries {
                self.check(key)?;
            }
            self.inner.set_many(entries, ttl).await
        }

        async fn set_if_absent(
            &self,
            key: &str,
            value: &str,
            ttl: Duration,
        ) -> std::result::Result<bool, StoreError> {
            self.inner.set_if_absent(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> std::result::Result<bool, StoreError> {
            self.inner.delete(key).await
        }

        async fn delete_if_equals(&self, key: &str, expected: &str) -> std::result::Result<bool, StoreError> {
            self.inner.delete_if_equals(key, expected).await
        }

        async fn ping(&self) -> std::result::Result<(), StoreError> {
            self.inner.ping().await
        }

        fn backend_name(&self) -> &'static str {
            "stamp-fault"
        }
    }

    fn exact(namespace: &str, capacity: u64) -> RateLimiterConfig {
        RateLimiterConfig::new(namespace, capacity)
            .with_buffer_fraction(0.0)
            .with_min_reserve_tokens(0)
            .with_safety_margin(1.0)
    }

    #[tokio::test]
    async fn test_acquire_writes_counter_and_releases_lock() {
        let (limiter, store, _) = limiter_with(exact("ns", 600));

        let reservation = assert_ok!(limiter.acquire(100).await);
        assert_eq!(reservation.reserved, 100.0);
        assert_eq!(reservation.remaining, 500.0);
        assert!(!reservation.degraded);

        assert_eq!(store.get("ns:tokens").await.unwrap().as_deref(), Some("500.000000"));
        assert!(store.get("ns:refilled_at").await.unwrap().is_some());
        assert!(store.get("ns:lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_safety_margin_is_deducted() {
        let config = exact("ns", 1_000).with_safety_margin(1.1);
        let (limiter, _, _) = limiter_with(config);

        let reservation = limiter.acquire(100).await.unwrap();
        assert!((reservation.reserved - 110.0).abs() < 1e-9);
        assert!((reservation.remaining - 890.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_zero_tokens_rejected() {
        let (limiter, _, _) = limiter_with(exact("ns", 600));
        assert!(matches!(
            limiter.acquire(0).await,
            Err(ThrottlerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_reserve_must_stay_in_bucket() {
        let config = exact("ns", 1_000).with_min_reserve_tokens(100);
        let (limiter, _, _) = limiter_with(config);

        // 901 can never fit while 100 stay behind.
        assert!(matches!(
            limiter.acquire(901).await,
            Err(ThrottlerError::CapacityExceeded { .. })
        ));
        let reservation = limiter.acquire(900).await.unwrap();
        assert_eq!(reservation.remaining, 100.0);
    }

    #[tokio::test]
    async fn test_counter_refills_with_shared_clock() {
        let (limiter, _, clock) = limiter_with(exact("ns", 600));
        limiter.acquire(600).await.unwrap();
        assert_eq!(limiter.snapshot().await.available, 0.0);

        clock.advance(Duration::from_secs(10));
        let snapshot = limiter.snapshot().await;
        assert!((snapshot.available - 100.0).abs() < 1e-6);
        assert_eq!(snapshot.source, SnapshotSource::Store);
    }

    #[tokio::test]
    async fn test_corrupt_counter_falls_back_to_shadow() {
        let (limiter, store, _) = limiter_with(exact("ns", 600));
        store
            .set("ns:tokens", "not-a-number", Duration::from_secs(65))
            .await
            .unwrap();

        let reservation = limiter.acquire(10).await.unwrap();
        assert!(reservation.degraded);
        assert_eq!(limiter.degraded_events(), 1);
    }

    #[tokio::test]
    async fn test_refund_credits_counter_up_to_ceiling() {
        let (limiter, _, _) = limiter_with(exact("ns", 600));
        limiter.acquire(500).await.unwrap();

        let level = limiter.refund(200).await.unwrap();
        assert!((level - 300.0).abs() < 1e-6);

        let level = limiter.refund(1_000).await.unwrap();
        assert_eq!(level, 600.0);
        assert_err!(limiter.refund(0).await);
    }

    #[tokio::test]
    async fn test_degraded_refund_credits_shadow() {
        let (limiter, store, _) = limiter_with(exact("ns", 600));
        limiter.acquire(400).await.unwrap();
        store.set_available(false);

        let level = limiter.refund(100).await.unwrap();
        assert!((level - 300.0).abs() < 1e-6);
        assert_eq!(limiter.snapshot().await.source, SnapshotSource::Local);
    }

    #[tokio::test]
    async fn test_short_shadow_defers_to_refunded_store() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let a = instance(exact("ns", 600), store.clone(), clock.clone(), 1);
        let b = instance(exact("ns", 600), store.clone(), clock.clone(), 5);

        a.acquire(600).await.unwrap();
        assert_eq!(b.refund(600).await.unwrap(), 600.0);

        // A's shadow still reads empty; the store does not.
        let reservation = assert_ok!(a.acquire(300).await);
        assert_eq!(reservation.remaining, 300.0);
        assert!(!reservation.degraded);
    }

    #[tokio::test]
    async fn test_short_shadow_defers_to_store_after_outage() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = instance(exact("ns", 600), store.clone(), clock.clone(), 1);

        store.set_available(false);
        assert!(limiter.acquire(600).await.unwrap().degraded);

        // Back with no counter, which reads as a full bucket.
        store.set_available(true);
        let reservation = assert_ok!(limiter.acquire(300).await);
        assert!(!reservation.degraded);
        assert_eq!(reservation.remaining, 300.0);
    }

    #[tokio::test]
    async fn test_short_shadow_and_store_reject_without_lock() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = instance(exact("ns", 600), store.clone(), clock.clone(), 1);

        limiter.acquire(600).await.unwrap();
        assert!(matches!(
            limiter.acquire(300).await,
            Err(ThrottlerError::RateLimitTimeout { attempts: 1, .. })
        ));
        assert!(store.get("ns:lock").await.unwrap().is_none());
        assert_eq!(limiter.degraded_events(), 0);
    }

    #[tokio::test]
    async fn test_failed_stamp_write_keeps_counter_and_stamp_paired() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(StampFaultStore::new(clock.clone()));
        let a = instance(exact("ns", 600), store.clone(), clock.clone(), 1);
        let b = instance(exact("ns", 600), store.clone(), clock.clone(), 1);

        a.acquire(600).await.unwrap();
        clock.advance(Duration::from_secs(30));

        store.fail_stamp_writes(true);
        let reservation = a.acquire(100).await.unwrap();
        assert!(reservation.degraded);
        store.fail_stamp_writes(false);

        // The counter was not written without its stamp.
        assert_eq!(store.get("ns:tokens").await.unwrap().as_deref(), Some("0.000000"));
        assert_eq!(
            store.get("ns:refilled_at").await.unwrap(),
            Some(encode_decimal(T0.as_secs_f64()))
        );

        // Only the 300 refilled since T0 is on offer, not that plus a second
        // credit for the same 30 seconds.
        assert!(matches!(
            b.acquire(400).await,
            Err(ThrottlerError::RateLimitTimeout { .. })
        ));
        assert_ok!(b.acquire(300).await);
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("k", " 12.500000 ").unwrap(), 12.5);
        assert!(parse_decimal("k", "NaN").is_err());
        assert!(parse_decimal("k", "inf").is_err());
        assert!(parse_decimal("k", "").is_err());
    }
}
