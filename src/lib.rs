//! Distributed token-bucket rate limiting for workers that share one
//! upstream token budget.

pub mod clock;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod handlers;
pub mod health;
pub mod keys;
pub mod lock;
pub mod metrics;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod registry;
pub mod response;
pub mod retry;
pub mod server;
pub mod store;
pub mod token_bucket;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Result, ThrottlerError};
pub use rate_limit_config::RateLimiterConfig;
pub use rate_limiter::{BucketSnapshot, Reservation, SnapshotSource, TokenLimiter};
pub use registry::LimiterRegistry;
pub use retry::{Jitter, RetryPolicy};
pub use server::create_app;
pub use store::{KeyValueStore, MemoryStore, RedisStore, StoreError};
