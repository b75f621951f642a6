//! Redis implementation of the `SagaStateStore` trait.

use std::time::Duration;

use async_trait::async_trait;
use bookmarks_core::error::DomainError;
use bookmarks_core::state_store::SagaStateStore;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use tracing::{debug, info};

use crate::ttl_millis;

/// Deletes `KEYS[1]` only if it still holds `ARGV[1]`.
const DELETE_IF_EQUALS_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

fn redis_error(err: RedisError) -> DomainError {
    DomainError::Infrastructure(format!("redis error: {err}"))
}

/// Redis-backed state store shared by every worker replica.
///
/// Key format: `{prefix}:{key}`. Conditional writes use `SET NX PX` and
/// owner-checked deletes run as a Lua script, so both are atomic on the
/// server.
pub struct RedisStateStore {
    conn: ConnectionManager,
    key_prefix: String,
    delete_if_equals: Script,
}

impl RedisStateStore {
    /// Connects to Redis at `url` (e.g. `redis://localhost:6379`).
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self, DomainError> {
        let client = Client::open(url).map_err(redis_error)?;
        let conn = ConnectionManager::new(client).await.map_err(redis_error)?;

        info!(url = %url, key_prefix = %key_prefix, "Connected to Redis for saga state");

        Ok(Self::from_connection(conn, key_prefix))
    }

    /// Wraps an existing connection manager.
    #[must_use]
    pub fn from_connection(conn: ConnectionManager, key_prefix: &str) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.to_owned(),
            delete_if_equals: Script::new(DELETE_IF_EQUALS_SCRIPT),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.key_prefix)
    }
}

#[async_trait]
impl SagaStateStore for RedisStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, DomainError> {
        let mut conn = self.conn.clone();
        conn.get(self.key(key)).await.map_err(redis_error)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        ttl: Duration,
        value: &str,
    ) -> Result<(), DomainError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DomainError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(self.key(key)).await.map_err(redis_error)?;
        Ok(())
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, DomainError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        let acquired = reply.is_some();
        debug!(key = %key, acquired, "conditional set");
        Ok(acquired)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, DomainError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .delete_if_equals
            .key(self.key(key))
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(removed == 1)
    }
}
