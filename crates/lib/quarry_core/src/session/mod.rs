//! Server-side session store for refresh credentials.
//!
//! A record exists for every live refresh credential, keyed by `jti`.
//! Deleting the record revokes the credential: `verify_refresh` requires the
//! jti to be present and unexpired here.

pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;

/// One refresh-credential session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub jti: String,
    pub user_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub device: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SessionRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Page of active sessions plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct SessionPage {
    pub records: Vec<SessionRecord>,
    pub next_cursor: Option<String>,
}

/// Key-value store of session records with TTL semantics.
///
/// `list_by_user` is read-your-writes with respect to `put`/`delete` for the
/// same user within a request. Expired records are treated as absent.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, record: SessionRecord) -> Result<()>;

    async fn get(&self, jti: &str) -> Result<Option<SessionRecord>>;

    /// Remove one record. Returns whether a live record was removed; the
    /// rotate path relies on this to pick exactly one winner under
    /// contention.
    async fn delete(&self, jti: &str) -> Result<bool>;

    /// Remove all records for a user, returning how many were removed.
    async fn delete_by_user(&self, user_id: &str) -> Result<u64>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<SessionRecord>>;

    /// Enumerate active sessions, `limit` at a time. `cursor` is the opaque
    /// value returned by the previous page.
    async fn list_active(&self, limit: usize, cursor: Option<String>) -> Result<SessionPage>;
}
