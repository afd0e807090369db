//! PostgreSQL-backed session store.
//!
//! Schema (`sessions` table): jti text primary key, user_id text,
//! issued_at/expires_at timestamptz, device text null, metadata jsonb.
//! Revocation deletes the row; expiry is filtered in every query.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use sqlx::Row;

use super::{SessionPage, SessionRecord, SessionStore};
use crate::Result;

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table if it does not exist.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                jti        TEXT PRIMARY KEY,
                user_id    TEXT NOT NULL,
                issued_at  TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                device     TEXT,
                metadata   JSONB NOT NULL DEFAULT '{}'::jsonb
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS sessions_user_idx ON sessions (user_id)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> SessionRecord {
        let metadata: serde_json::Value = row.get("metadata");
        SessionRecord {
            jti: row.get("jti"),
            user_id: row.get("user_id"),
            issued_at: row.get("issued_at"),
            expires_at: row.get("expires_at"),
            device: row.get("device"),
            metadata: serde_json::from_value(metadata).unwrap_or_default(),
        }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn put(&self, record: SessionRecord) -> Result<()> {
        let metadata = serde_json::to_value(&record.metadata)
            .map_err(|e| crate::Error::Internal(format!("metadata encode: {e}")))?;
        sqlx::query(
            "INSERT INTO sessions (jti, user_id, issued_at, expires_at, device, metadata)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (jti) DO UPDATE
             SET user_id = $2, issued_at = $3, expires_at = $4, device = $5, metadata = $6",
        )
        .bind(&record.jti)
        .bind(&record.user_id)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(&record.device)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, jti: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE jti = $1 AND expires_at > $2")
            .bind(jti)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::row_to_record))
    }

    async fn delete(&self, jti: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE jti = $1 AND expires_at > $2")
            .bind(jti)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_user(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1 AND expires_at > $2")
            .bind(user_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM sessions WHERE user_id = $1 AND expires_at > $2 ORDER BY jti",
        )
        .bind(user_id)
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::row_to_record).collect())
    }

    async fn list_active(&self, limit: usize, cursor: Option<String>) -> Result<SessionPage> {
        let rows = sqlx::query(
            "SELECT * FROM sessions
             WHERE expires_at > $1 AND ($2::text IS NULL OR jti > $2)
             ORDER BY jti
             LIMIT $3",
        )
        .bind(Utc::now())
        .bind(cursor)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        let records: Vec<_> = rows.iter().map(Self::row_to_record).collect();
        let next_cursor = if records.len() == limit {
            records.last().map(|r| r.jti.clone())
        } else {
            None
        };
        Ok(SessionPage {
            records,
            next_cursor,
        })
    }
}
