//! In-memory session store.
//!
//! Default backing for development and tests (`memory://` DSN). Expiry is
//! lazy: expired records are dropped when read or enumerated.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{SessionPage, SessionRecord, SessionStore};
use crate::Result;

#[derive(Default)]
pub struct MemorySessionStore {
    inner: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired records. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, r| !r.is_expired_at(now));
        before - map.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, record: SessionRecord) -> Result<()> {
        self.inner.write().await.insert(record.jti.clone(), record);
        Ok(())
    }

    async fn get(&self, jti: &str) -> Result<Option<SessionRecord>> {
        let now = Utc::now();
        let map = self.inner.read().await;
        Ok(map.get(jti).filter(|r| !r.is_expired_at(now)).cloned())
    }

    async fn delete(&self, jti: &str) -> Result<bool> {
        let now = Utc::now();
        let mut map = self.inner.write().await;
        match map.remove(jti) {
            Some(r) => Ok(!r.is_expired_at(now)),
            None => Ok(false),
        }
    }

    async fn delete_by_user(&self, user_id: &str) -> Result<u64> {
        let now = Utc::now();
        let mut map = self.inner.write().await;
        let mut removed = 0;
        map.retain(|_, r| {
            if r.user_id == user_id {
                if !r.is_expired_at(now) {
                    removed += 1;
                }
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<SessionRecord>> {
        let now = Utc::now();
        let map = self.inner.read().await;
        let mut records: Vec<_> = map
            .values()
            .filter(|r| r.user_id == user_id && !r.is_expired_at(now))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.jti.cmp(&b.jti));
        Ok(records)
    }

    async fn list_active(&self, limit: usize, cursor: Option<String>) -> Result<SessionPage> {
        let now = Utc::now();
        let map = self.inner.read().await;
        let mut records: Vec<_> = map
            .values()
            .filter(|r| !r.is_expired_at(now))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.jti.cmp(&b.jti));

        let start = match cursor {
            Some(c) => records.partition_point(|r| r.jti.as_str() <= c.as_str()),
            None => 0,
        };
        let page: Vec<_> = records.into_iter().skip(start).take(limit).collect();
        let next_cursor = if page.len() == limit {
            page.last().map(|r| r.jti.clone())
        } else {
            None
        };
        Ok(SessionPage {
            records: page,
            next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(jti: &str, user: &str, ttl_secs: i64) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            jti: jti.into(),
            user_id: user.into(),
            issued_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
            device: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let store = MemorySessionStore::new();
        store.put(record("j1", "u1", 60)).await.unwrap();

        let got = store.get("j1").await.unwrap().unwrap();
        assert_eq!(got.user_id, "u1");

        assert!(store.delete("j1").await.unwrap());
        assert!(store.get("j1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemorySessionStore::new();
        store.put(record("j1", "u1", 60)).await.unwrap();
        assert!(store.delete("j1").await.unwrap());
        assert!(!store.delete("j1").await.unwrap());
    }

    #[tokio::test]
    async fn expired_records_read_as_absent() {
        let store = MemorySessionStore::new();
        store.put(record("j1", "u1", -1)).await.unwrap();
        assert!(store.get("j1").await.unwrap().is_none());
        assert!(store.list_by_user("u1").await.unwrap().is_empty());
        // Deleting an expired record does not count as a live removal.
        assert!(!store.delete("j1").await.unwrap());
    }

    #[tokio::test]
    async fn delete_by_user_counts_live_only() {
        let store = MemorySessionStore::new();
        store.put(record("j1", "u1", 60)).await.unwrap();
        store.put(record("j2", "u1", 60)).await.unwrap();
        store.put(record("j3", "u1", -1)).await.unwrap();
        store.put(record("j4", "u2", 60)).await.unwrap();

        assert_eq!(store.delete_by_user("u1").await.unwrap(), 2);
        assert!(store.get("j4").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_active_paginates_with_cursor() {
        let store = MemorySessionStore::new();
        for i in 0..5 {
            store
                .put(record(&format!("j{i}"), "u1", 60))
                .await
                .unwrap();
        }

        let page1 = store.list_active(2, None).await.unwrap();
        assert_eq!(page1.records.len(), 2);
        let cursor = page1.next_cursor.clone().unwrap();

        let page2 = store.list_active(2, Some(cursor)).await.unwrap();
        assert_eq!(page2.records.len(), 2);
        assert_ne!(page1.records[0].jti, page2.records[0].jti);

        let page3 = store
            .list_active(2, page2.next_cursor.clone())
            .await
            .unwrap();
        assert_eq!(page3.records.len(), 1);
        assert!(page3.next_cursor.is_none());
    }

    #[tokio::test]
    async fn sweep_removes_expired() {
        let store = MemorySessionStore::new();
        store.put(record("j1", "u1", -1)).await.unwrap();
        store.put(record("j2", "u1", 60)).await.unwrap();
        assert_eq!(store.sweep().await, 1);
    }
}
