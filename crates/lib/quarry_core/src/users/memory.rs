//! In-memory user directory.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;

use super::password::{hash_password, validate_password, verify_password};
use super::{normalize_email, User, UserDirectory, ROLE_ADMIN, ROLE_USER};
use crate::{Error, Result};

/// Internal record: public shape plus the hash.
#[derive(Debug, Clone)]
struct StoredUser {
    user: User,
    password_hash: String,
}

pub struct MemoryUserDirectory {
    inner: RwLock<HashMap<String, StoredUser>>,
    bcrypt_cost: u32,
    /// Verified against when the email is unknown, so `authenticate` timing
    /// does not reveal account existence.
    dummy_hash: String,
}

impl MemoryUserDirectory {
    pub fn new(bcrypt_cost: u32) -> Self {
        let dummy_hash = hash_password("quarry-dummy-password", bcrypt_cost)
            .unwrap_or_else(|_| String::new());
        Self {
            inner: RwLock::new(HashMap::new()),
            bcrypt_cost,
            dummy_hash,
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn register(&self, email: &str, password: &str) -> Result<User> {
        validate_password(password)?;
        let email = normalize_email(email);
        if email.is_empty() || !email.contains('@') {
            return Err(Error::Validation("invalid email address".into()));
        }

        let password_hash = hash_password(password, self.bcrypt_cost)?;

        let mut map = self.inner.write().await;
        let duplicate = map
            .values()
            .any(|s| s.user.active && s.user.email == email);
        if duplicate {
            return Err(Error::Validation("email already registered".into()));
        }

        let is_first = map.is_empty();
        let roles = if is_first {
            vec![ROLE_ADMIN.to_string()]
        } else {
            vec![ROLE_USER.to_string()]
        };

        let now = Utc::now();
        let user = User {
            id: crate::uuid::uuidv7().to_string(),
            email: email.clone(),
            roles,
            active: true,
            created_at: now,
            updated_at: now,
        };
        if is_first {
            info!(email = %email, "first user granted admin role");
        }
        map.insert(
            user.id.clone(),
            StoredUser {
                user: user.clone(),
                password_hash,
            },
        );
        Ok(user)
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<User> {
        let email = normalize_email(email);
        let stored = {
            let map = self.inner.read().await;
            map.values()
                .find(|s| s.user.email == email && s.user.active)
                .cloned()
        };

        match stored {
            Some(s) => {
                if verify_password(password, &s.password_hash)? {
                    Ok(s.user)
                } else {
                    Err(Error::Authentication)
                }
            }
            None => {
                // Burn the same hashing work as the found path.
                let _ = verify_password(password, &self.dummy_hash);
                Err(Error::Authentication)
            }
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        Ok(self.inner.read().await.get(id).map(|s| s.user.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = normalize_email(email);
        Ok(self
            .inner
            .read()
            .await
            .values()
            .find(|s| s.user.email == email)
            .map(|s| s.user.clone()))
    }

    async fn search(&self, query: &str, limit: usize, offset: usize) -> Result<Vec<User>> {
        let needle = query.to_lowercase();
        let map = self.inner.read().await;
        let mut users: Vec<_> = map
            .values()
            .filter(|s| s.user.email.contains(&needle))
            .map(|s| s.user.clone())
            .collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users.into_iter().skip(offset).take(limit).collect())
    }

    async fn set_roles(&self, user_id: &str, roles: Vec<String>) -> Result<()> {
        let mut map = self.inner.write().await;
        let stored = map
            .get_mut(user_id)
            .ok_or_else(|| Error::NotFound(format!("user {user_id}")))?;
        stored.user.roles = roles;
        stored.user.updated_at = Utc::now();
        Ok(())
    }

    async fn set_active(&self, user_id: &str, active: bool) -> Result<()> {
        let mut map = self.inner.write().await;
        let stored = map
            .get_mut(user_id)
            .ok_or_else(|| Error::NotFound(format!("user {user_id}")))?;
        stored.user.active = active;
        stored.user.updated_at = Utc::now();
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.inner.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_COST: u32 = 4;

    #[tokio::test]
    async fn first_user_is_admin_then_default_role() {
        let dir = MemoryUserDirectory::new(TEST_COST);
        let first = dir.register("admin@x.io", "Pw12345!").await.unwrap();
        assert_eq!(first.roles, vec!["admin"]);

        let second = dir.register("user@x.io", "Pw12345!").await.unwrap();
        assert_eq!(second.roles, vec!["user"]);
    }

    #[tokio::test]
    async fn duplicate_email_rejected_case_insensitively() {
        let dir = MemoryUserDirectory::new(TEST_COST);
        dir.register("u@x.io", "Pw12345!").await.unwrap();
        let err = dir.register("U@X.io", "Pw12345!").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn authenticate_success_and_generic_failures() {
        let dir = MemoryUserDirectory::new(TEST_COST);
        dir.register("u@x.io", "Pw12345!").await.unwrap();

        let user = dir.authenticate("u@x.io", "Pw12345!").await.unwrap();
        assert_eq!(user.email, "u@x.io");

        let wrong_pw = dir.authenticate("u@x.io", "nope").await.unwrap_err();
        let no_user = dir.authenticate("ghost@x.io", "nope").await.unwrap_err();
        assert_eq!(wrong_pw.to_string(), no_user.to_string());
    }

    #[tokio::test]
    async fn inactive_user_cannot_authenticate() {
        let dir = MemoryUserDirectory::new(TEST_COST);
        let user = dir.register("u@x.io", "Pw12345!").await.unwrap();
        dir.set_active(&user.id, false).await.unwrap();
        assert!(dir.authenticate("u@x.io", "Pw12345!").await.is_err());
    }

    #[tokio::test]
    async fn deactivating_frees_the_email() {
        let dir = MemoryUserDirectory::new(TEST_COST);
        let user = dir.register("u@x.io", "Pw12345!").await.unwrap();
        dir.set_active(&user.id, false).await.unwrap();
        assert!(dir.register("u@x.io", "Pw12345!").await.is_ok());
    }

    #[tokio::test]
    async fn search_paginates() {
        let dir = MemoryUserDirectory::new(TEST_COST);
        for i in 0..5 {
            dir.register(&format!("user{i}@x.io"), "Pw12345!")
                .await
                .unwrap();
        }
        let page = dir.search("user", 2, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].email, "user2@x.io");
    }

    #[tokio::test]
    async fn set_roles_updates_timestamps() {
        let dir = MemoryUserDirectory::new(TEST_COST);
        let user = dir.register("u@x.io", "Pw12345!").await.unwrap();
        dir.set_roles(&user.id, vec!["admin".into(), "user".into()])
            .await
            .unwrap();
        let got = dir.find_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(got.roles, vec!["admin", "user"]);
        assert!(got.updated_at >= user.updated_at);
    }
}
