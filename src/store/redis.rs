use std::future::Future;
use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::{Client, FromRedisValue, RedisResult};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{KeyValueStore, StoreError};

/// Deletes KEYS[1] only while it still holds ARGV[1].
const DELETE_IF_EQUALS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Redis-backed store.
///
/// The multiplexed connection is opened lazily and dropped after any failure
/// so the next call reconnects. Every command is bounded by `op_timeout`.
pub struct RedisStore {
    client: Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    op_timeout: Duration,
}

impl RedisStore {
    pub fn new(redis_url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(format!("Failed to create Redis client: {}", e)))?;

        Ok(Self {
            client,
            connection: Mutex::new(None),
            op_timeout,
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .bounded(self.client.get_multiplexed_tokio_connection())
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect to Redis: {}", e)))?;
        debug!("Opened Redis connection");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(|e| StoreError::Unavailable(e.to_string())),
            Err(_) => Err(StoreError::Unavailable(format!(
                "Redis call timed out after {:?}",
                self.op_timeout
            ))),
        }
    }

    async fn query<T: FromRedisValue>(&self, cmd: ::redis::Cmd, name: &str) -> Result<T, StoreError> {
        let mut conn = self.connection().await?;
        let result = self.bounded(cmd.query_async::<_, T>(&mut conn)).await;
        self.reset_on_error(result, name).await
    }

    async fn query_pipeline(&self, pipe: ::redis::Pipeline, name: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result = self.bounded(pipe.query_async::<_, ()>(&mut conn)).await;
        self.reset_on_error(result, name).await
    }

    async fn reset_on_error<T>(&self, result: Result<T, StoreError>, name: &str) -> Result<T, StoreError> {
        if let Err(err) = &result {
            warn!(command = name, error = %err, "Redis command failed, dropping connection");
            *self.connection.lock().await = None;
        }
        result
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut cmd = ::redis::cmd("GET");
        cmd.arg(key);
        self.query(cmd, "GET").await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(ttl_millis(ttl));
        self.query::<String>(cmd, "SET").await.map(|_| ())
    }

    async fn set_many(&self, entries: &[(&str, &str)], ttl: Duration) -> Result<(), StoreError> {
        let mut pipe = ::redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            pipe.cmd("SET")
                .arg(*key)
                .arg(*value)
                .arg("PX")
                .arg(ttl_millis(ttl))
                .ignore();
        }
        self.query_pipeline(pipe, "MULTI SET").await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl));
        // Nil reply means the key already existed.
        let reply: Option<String> = self.query(cmd, "SET NX").await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut cmd = ::redis::cmd("DEL");
        cmd.arg(key);
        let deleted: i64 = self.query(cmd, "DEL").await?;
        Ok(deleted > 0)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut cmd = ::redis::cmd("EVAL");
        cmd.arg(DELETE_IF_EQUALS_SCRIPT).arg(1).arg(key).arg(expected);
        let deleted: i64 = self.query(cmd, "EVAL").await?;
        Ok(deleted > 0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let reply: String = self.query(::redis::cmd("PING"), "PING").await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("unexpected PING reply {:?}", reply)))
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
