//! Shared key-value store used to coordinate limiters across processes.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt value {value:?} under key {key}")]
    Corrupt { key: String, value: String },
}

/// The operations the limiter needs from a shared store, plus an owned
/// delete used to release locks.
///
/// Implementations must report every backend failure as a `StoreError`
/// rather than panicking.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Writes every pair with the same TTL, all or nothing.
    async fn set_many(&self, entries: &[(&str, &str)], ttl: Duration) -> Result<(), StoreError>;

    /// Returns `true` if the key was absent and has been written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Returns `true` if a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Deletes `key` only while it still holds `expected`.
    ///
    /// The default is a non-atomic read followed by a delete; backends that
    /// can do better should override it.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        match self.get(key).await? {
            Some(current) if current == expected => self.delete(key).await,
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> Result<(), StoreError>;

    fn backend_name(&self) -> &'static str;
}
