//! StateStore - Shared Key/Value Service
//!
//! ## Responsibilities
//!
//! - String get/set with optional TTL
//! - Hash-field get/set (camera bindings)
//! - List push/pop, including blocking pop (delivery queues)
//! - Pattern key enumeration (active trigger marks)
//!
//! This is the only persistence layer in the gateway. Every operation is
//! an independently atomic single-key command; there are no multi-key
//! transactions, and callers are expected to swallow `StoreError` and
//! degrade rather than fail their request.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;

/// Store result alias
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Key/value service shared by all components.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    /// Set with a TTL in seconds; the key expires on its own.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()>;
    async fn del(&self, key: &str) -> StoreResult<()>;
    /// Enumerate keys matching a glob pattern (`*` wildcard).
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;
    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()>;
    async fn lpop(&self, key: &str) -> StoreResult<Option<String>>;
    /// Pop the head of a list, waiting up to `timeout_secs` for an element.
    ///
    /// Implementations must keep this interruptible: dropping the future
    /// releases whatever the wait holds, so a severed client connection
    /// never leaks a blocked consumer.
    async fn blpop(&self, key: &str, timeout_secs: u64) -> StoreResult<Option<String>>;
}
