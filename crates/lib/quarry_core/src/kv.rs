//! Key-value store capability with TTL semantics.
//!
//! Consumed by the result cache, the distributed rate limiter, and anything
//! else that needs expiring keys. The in-memory implementation backs the
//! `memory://` DSN; expiry is lazy.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Result;

#[async_trait]
pub trait KVStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Returns whether a live key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn scan(&self, prefix: &str) -> Result<Vec<String>>;

    /// Increment a counter, creating it with the given expiry if absent.
    /// Returns the post-increment count.
    async fn atomic_incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64>;
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }
}

#[derive(Default)]
pub struct MemoryKv {
    inner: RwLock<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, e| !e.is_expired(now));
        before - map.len()
    }
}

#[async_trait]
impl KVStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let map = self.inner.read().await;
        Ok(map
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.inner.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut map = self.inner.write().await;
        match map.remove(key) {
            Some(e) => Ok(!e.is_expired(now)),
            None => Ok(false),
        }
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let map = self.inner.read().await;
        let mut keys: Vec<String> = map
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn atomic_incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64> {
        let now = Instant::now();
        let mut map = self.inner.write().await;
        let entry = map.get_mut(key).filter(|e| !e.is_expired(now));
        match entry {
            Some(e) => {
                let mut count = u64::from_le_bytes(
                    e.value
                        .as_slice()
                        .try_into()
                        .map_err(|_| crate::Error::Internal("corrupt counter".into()))?,
                );
                count += 1;
                e.value = count.to_le_bytes().to_vec();
                Ok(count)
            }
            None => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: 1u64.to_le_bytes().to_vec(),
                        expires_at: Some(now + ttl),
                    },
                );
                Ok(1)
            }
        }
    }
}
