//! PostgreSQL-backed user directory.
//!
//! Schema: `users` (id text primary key, email text, password_hash text,
//! roles text[], active bool, created_at/updated_at timestamptz). Email
//! uniqueness among active users is enforced by a partial unique index.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::info;

use super::password::{hash_password, validate_password, verify_password};
use super::{normalize_email, User, UserDirectory, ROLE_ADMIN, ROLE_USER};
use crate::{Error, Result};

pub struct PgUserDirectory {
    pool: PgPool,
    bcrypt_cost: u32,
    dummy_hash: String,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool, bcrypt_cost: u32) -> Self {
        let dummy_hash = hash_password("quarry-dummy-password", bcrypt_cost)
            .unwrap_or_else(|_| String::new());
        Self {
            pool,
            bcrypt_cost,
            dummy_hash,
        }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id            TEXT PRIMARY KEY,
                email         TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                roles         TEXT[] NOT NULL,
                active        BOOLEAN NOT NULL DEFAULT TRUE,
                created_at    TIMESTAMPTZ NOT NULL,
                updated_at    TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS users_email_active_idx
             ON users (email) WHERE active",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_user(row: &sqlx::postgres::PgRow) -> User {
        User {
            id: row.get("id"),
            email: row.get("email"),
            roles: row.get("roles"),
            active: row.get("active"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn register(&self, email: &str, password: &str) -> Result<User> {
        validate_password(password)?;
        let email = normalize_email(email);
        if email.is_empty() || !email.contains('@') {
            return Err(Error::Validation("invalid email address".into()));
        }

        let password_hash = hash_password(password, self.bcrypt_cost)?;

        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 AND active)",
        )
        .bind(&email)
        .fetch_one(&mut *tx)
        .await?;
        if exists {
            return Err(Error::Validation("email already registered".into()));
        }

        let user_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&mut *tx)
            .await?;
        let roles = if user_count == 0 {
            vec![ROLE_ADMIN.to_string()]
        } else {
            vec![ROLE_USER.to_string()]
        };

        let now = Utc::now();
        let user = User {
            id: crate::uuid::uuidv7().to_string(),
            email: email.clone(),
            roles: roles.clone(),
            active: true,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, roles, active, created_at, updated_at)
             VALUES ($1, $2, $3, $4, TRUE, $5, $5)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&password_hash)
        .bind(&roles)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        if user_count == 0 {
            info!(email = %email, "first user granted admin role");
        }
        Ok(user)
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<User> {
        let email = normalize_email(email);
        let row = sqlx::query("SELECT * FROM users WHERE email = $1 AND active")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let hash: String = row.get("password_hash");
                if verify_password(password, &hash)? {
                    Ok(Self::row_to_user(&row))
                } else {
                    Err(Error::Authentication)
                }
            }
            None => {
                let _ = verify_password(password, &self.dummy_hash);
                Err(Error::Authentication)
            }
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::row_to_user))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = $1")
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::row_to_user))
    }

    async fn search(&self, query: &str, limit: usize, offset: usize) -> Result<Vec<User>> {
        let rows = sqlx::query(
            "SELECT * FROM users WHERE email LIKE '%' || $1 || '%'
             ORDER BY email LIMIT $2 OFFSET $3",
        )
        .bind(query.to_lowercase())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::row_to_user).collect())
    }

    async fn set_roles(&self, user_id: &str, roles: Vec<String>) -> Result<()> {
        let result = sqlx::query("UPDATE users SET roles = $2, updated_at = $3 WHERE id = $1")
            .bind(user_id)
            .bind(&roles)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    async fn set_active(&self, user_id: &str, active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE users SET active = $2, updated_at = $3 WHERE id = $1")
            .bind(user_id)
            .bind(active)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
