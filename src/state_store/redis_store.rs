//! Redis-backed StateStore

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{StateStore, StoreResult};

/// Production store on a Redis server.
///
/// Regular commands go through one multiplexed [`ConnectionManager`].
/// Blocking pops get a dedicated connection per call: a BLPOP parked on
/// the shared pipeline would stall every other command behind it, and a
/// dedicated connection dies together with the dropped future when the
/// consuming client disconnects.
pub struct RedisStore {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to the given Redis URL.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, manager })
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.keys(pattern).await?)
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.hget(key, field).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn lpop(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.lpop(key, None).await?)
    }

    async fn blpop(&self, key: &str, timeout_secs: u64) -> StoreResult<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let popped: Option<(String, String)> = conn.blpop(key, timeout_secs as f64).await?;
        Ok(popped.map(|(_, value)| value))
    }
}
