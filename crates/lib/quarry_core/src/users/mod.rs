//! User directory: accounts, password hashes, role assignments.
//!
//! The password hash never leaves this module; `User` is the public shape.

pub mod memory;
pub mod password;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

pub use memory::MemoryUserDirectory;
pub use postgres::PgUserDirectory;

/// Built-in role names.
pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";
pub const ROLE_GUEST: &str = "guest";

/// Public user record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub roles: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Accounts store with authentication.
///
/// `authenticate` takes approximately constant time whether or not the email
/// exists: implementations verify against a dummy hash on a miss.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Create an account. The first registered user is granted `admin`;
    /// everyone else gets the default `user` role. Fails with a validation
    /// error on duplicate email or a password that violates policy.
    async fn register(&self, email: &str, password: &str) -> Result<User>;

    /// Verify email + password. Any failure (unknown email, wrong password,
    /// inactive account) returns the same authentication error.
    async fn authenticate(&self, email: &str, password: &str) -> Result<User>;

    async fn find_by_id(&self, id: &str) -> Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Substring search over email, paginated.
    async fn search(&self, query: &str, limit: usize, offset: usize) -> Result<Vec<User>>;

    async fn set_roles(&self, user_id: &str, roles: Vec<String>) -> Result<()>;

    async fn set_active(&self, user_id: &str, active: bool) -> Result<()>;

    async fn count(&self) -> Result<u64>;
}

/// Case-fold an email for uniqueness comparison.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
