//! In-memory StateStore
//!
//! Backs the unit tests and local development without a Redis server.
//! TTLs expire lazily on read; blocked pops wake on push via a shared
//! [`Notify`].

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{StateStore, StoreResult};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Process-local store with Redis-equivalent semantics.
#[derive(Default)]
pub struct MemoryStore {
    strings: Mutex<HashMap<String, Entry>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    push_notify: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn try_lpop(&self, key: &str) -> Option<String> {
        let mut lists = self.lists.lock().await;
        let list = lists.get_mut(key)?;
        let value = list.pop_front();
        if list.is_empty() {
            lists.remove(key);
        }
        value
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut strings = self.strings.lock().await;
        match strings.get(key) {
            Some(entry) if entry.expired() => {
                strings.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.strings.lock().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        self.strings.lock().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        self.strings.lock().await.remove(key);
        self.hashes.lock().await.remove(key);
        self.lists.lock().await.remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut strings = self.strings.lock().await;
        strings.retain(|_, entry| !entry.expired());
        Ok(strings
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self
            .hashes
            .lock()
            .await
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.hashes
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()> {
        self.lists
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        self.push_notify.notify_waiters();
        Ok(())
    }

    async fn lpop(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.try_lpop(key).await)
    }

    async fn blpop(&self, key: &str, timeout_secs: u64) -> StoreResult<Option<String>> {
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);
        loop {
            if let Some(value) = self.try_lpop(key).await {
                return Ok(Some(value));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            // Wake on any push and re-check; spurious wakeups just loop.
            let _ = tokio::time::timeout(remaining, self.push_notify.notified()).await;
            if Instant::now() >= deadline {
                return Ok(self.try_lpop(key).await);
            }
        }
    }
}

/// Minimal glob matcher supporting the `*` wildcard.
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 && !pattern.ends_with('*') {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}
