use std::collections::BTreeSet;

use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, Client, IntoConnectionInfo, RedisError};

use super::{parse_counter, CoordinationStore, StoreError, StoreOp, StoreResult, WatchGuard};

/// Configuration for the Redis-backed store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    pub url: String,
    /// Password, when not embedded in the URL
    pub password: Option<String>,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            password: None,
        }
    }
}

impl RedisStoreConfig {
    pub fn with_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }
}

/// Redis-backed coordination store.
///
/// Plain commands share one [`ConnectionManager`], which reconnects on its own
/// after a dropped connection. Transactions need `WATCH` state that belongs to
/// a single connection, so each watch opens a dedicated one.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(config: RedisStoreConfig) -> StoreResult<Self> {
        let mut info = config
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| {
                StoreError::Unavailable(format!("invalid redis url '{}': {e}", config.url))
            })?;
        if let Some(password) = config.password.as_deref().map(str::trim) {
            if !password.is_empty() {
                info.redis.password = Some(password.to_string());
            }
        }

        let client = Client::open(info).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| {
                StoreError::Unavailable(format!("failed to connect to '{}': {e}", config.url))
            })?;

        let store = Self { client, manager };
        store.ping().await?;
        Ok(store)
    }

    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Operation(err.to_string())
    }
}

#[async_trait::async_trait]
impl CoordinationStore for RedisStore {
    async fn get_all(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        let mut conn = self.conn();
        conn.smembers::<_, BTreeSet<String>>(key)
            .await
            .map_err(map_redis_error)
    }

    async fn pop_random(&self, key: &str, count: usize) -> StoreResult<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        redis::cmd("SPOP")
            .arg(key)
            .arg(count)
            .query_async::<Vec<String>>(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn add_all(&self, key: &str, members: &[String]) -> StoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        conn.sadd::<_, _, ()>(key, members)
            .await
            .map_err(map_redis_error)
    }

    async fn remove_members(&self, key: &str, members: &[String]) -> StoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        conn.srem::<_, _, ()>(key, members)
            .await
            .map_err(map_redis_error)
    }

    async fn take_all(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let (members,): (Vec<String>,) = redis::pipe()
            .atomic()
            .smembers(key)
            .del(key)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(members)
    }

    async fn cardinality(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn();
        conn.scard::<_, u64>(key).await.map_err(map_redis_error)
    }

    async fn delete_key(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.del::<_, ()>(key).await.map_err(map_redis_error)
    }

    async fn get_value(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(map_redis_error)
    }

    async fn set_value(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(map_redis_error)
    }

    async fn get_counter(&self, key: &str) -> StoreResult<u64> {
        let raw = self.get_value(key).await?;
        parse_counter(key, raw)
    }

    async fn watch(&self, keys: &[String]) -> StoreResult<WatchGuard> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;
        redis::cmd("WATCH")
            .arg(keys)
            .query_async::<()>(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(WatchGuard::new(keys.to_vec(), conn))
    }

    async fn commit(&self, guard: WatchGuard, ops: Vec<StoreOp>) -> StoreResult<()> {
        let (_keys, mut conn) = guard.into_parts::<MultiplexedConnection>()?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                StoreOp::AddAll { key, members } if !members.is_empty() => {
                    pipe.sadd(key, members).ignore();
                }
                StoreOp::RemoveAll { key, members } if !members.is_empty() => {
                    pipe.srem(key, members).ignore();
                }
                StoreOp::AddAll { .. } | StoreOp::RemoveAll { .. } => {}
                StoreOp::Delete { key } => {
                    pipe.del(key).ignore();
                }
            }
        }

        // EXEC replies nil when a watched key was modified.
        let committed: Option<()> = pipe.query_async(&mut conn).await.map_err(map_redis_error)?;
        committed.ok_or(StoreError::Conflict)
    }
}
