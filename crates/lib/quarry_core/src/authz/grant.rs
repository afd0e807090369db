//! Permission grants: subject → resource pattern → allowed actions.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use super::binding::{Action, ResourceType};
use super::pattern::ResourcePattern;
use crate::Result;

/// Who a grant applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Subject {
    Role(String),
    User(String),
}

/// Structured predicate evaluated against the call arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: ConditionOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Eq,
    Ne,
    In,
}

impl Condition {
    /// Evaluate against the request arguments. A missing field fails `eq`
    /// and `in`, and passes `ne`.
    pub fn evaluate(&self, arguments: &Value) -> bool {
        let actual = arguments.get(&self.field);
        match self.op {
            ConditionOp::Eq => actual == Some(&self.value),
            ConditionOp::Ne => actual != Some(&self.value),
            ConditionOp::In => match (&self.value, actual) {
                (Value::Array(allowed), Some(actual)) => allowed.contains(actual),
                _ => false,
            },
        }
    }
}

/// One permission grant. Grants are strictly additive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub subject: Subject,
    pub resource_type: ResourceType,
    pub pattern: ResourcePattern,
    pub actions: BTreeSet<Action>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub granted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Grant {
    pub fn new(
        subject: Subject,
        resource_type: ResourceType,
        pattern: ResourcePattern,
        actions: impl IntoIterator<Item = Action>,
    ) -> Self {
        Self {
            subject,
            resource_type,
            pattern,
            actions: actions.into_iter().collect(),
            conditions: Vec::new(),
            granted_at: Utc::now(),
            expires_at: None,
        }
    }

    /// An expired grant yields no rights.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if now >= exp)
    }

    /// Whether this grant permits `action` on `resource` of `resource_type`
    /// under the given arguments, at time `now`.
    pub fn permits(
        &self,
        resource_type: ResourceType,
        resource: &str,
        action: Action,
        arguments: &Value,
        now: DateTime<Utc>,
    ) -> bool {
        self.resource_type == resource_type
            && !self.is_expired_at(now)
            && self.actions.contains(&action)
            && self.pattern.matches(resource)
            && self.conditions.iter().all(|c| c.evaluate(arguments))
    }
}

/// In-memory grant store.
///
/// Unique on `(subject, resource_type, pattern)`: re-granting replaces.
#[derive(Default)]
pub struct GrantStore {
    inner: RwLock<Vec<Grant>>,
}

impl GrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a grant. Returns whether an existing grant was
    /// replaced.
    pub async fn upsert(&self, grant: Grant) -> Result<bool> {
        let mut grants = self.inner.write().await;
        let existing = grants.iter().position(|g| {
            g.subject == grant.subject
                && g.resource_type == grant.resource_type
                && g.pattern == grant.pattern
        });
        match existing {
            Some(i) => {
                grants[i] = grant;
                Ok(true)
            }
            None => {
                grants.push(grant);
                Ok(false)
            }
        }
    }

    /// Remove a grant. Idempotent; returns whether one was removed.
    pub async fn revoke(
        &self,
        subject: &Subject,
        resource_type: ResourceType,
        pattern: &str,
    ) -> Result<bool> {
        let mut grants = self.inner.write().await;
        let before = grants.len();
        grants.retain(|g| {
            !(g.subject == *subject
                && g.resource_type == resource_type
                && g.pattern.as_str() == pattern)
        });
        Ok(grants.len() != before)
    }

    /// All grants applicable to a principal: grants keyed by its user id
    /// plus grants keyed by any of its role names.
    pub async fn applicable(&self, user_id: Option<&str>, roles: &[String]) -> Vec<Grant> {
        let grants = self.inner.read().await;
        grants
            .iter()
            .filter(|g| match &g.subject {
                Subject::User(id) => user_id == Some(id.as_str()),
                Subject::Role(role) => roles.iter().any(|r| r == role),
            })
            .cloned()
            .collect()
    }

    pub async fn list(&self) -> Vec<Grant> {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn grant(subject: Subject, pattern: &str, actions: &[Action]) -> Grant {
        Grant::new(
            subject,
            ResourceType::VectorDb,
            ResourcePattern::parse(pattern).unwrap(),
            actions.iter().copied(),
        )
    }

    #[test]
    fn permits_requires_action_and_pattern() {
        let g = grant(Subject::Role("user".into()), "docs.*", &[Action::Read]);
        let now = Utc::now();
        assert!(g.permits(ResourceType::VectorDb, "docs.reports", Action::Read, &json!({}), now));
        assert!(!g.permits(ResourceType::VectorDb, "docs.reports", Action::Write, &json!({}), now));
        assert!(!g.permits(ResourceType::Database, "docs.reports", Action::Read, &json!({}), now));
        assert!(!g.permits(ResourceType::VectorDb, "other", Action::Read, &json!({}), now));
    }

    #[test]
    fn expired_grant_yields_no_rights() {
        let mut g = grant(Subject::User("u-1".into()), "**", &[Action::Read]);
        let now = Utc::now();
        g.expires_at = Some(now - Duration::seconds(1));
        assert!(!g.permits(ResourceType::VectorDb, "docs", Action::Read, &json!({}), now));
        // Boundary: expired at exactly expires_at.
        g.expires_at = Some(now);
        assert!(!g.permits(ResourceType::VectorDb, "docs", Action::Read, &json!({}), now));
    }

    #[test]
    fn conditions_gate_the_grant() {
        let mut g = grant(Subject::Role("user".into()), "**", &[Action::Read]);
        g.conditions = vec![Condition {
            field: "collection".into(),
            op: ConditionOp::In,
            value: json!(["docs", "notes"]),
        }];
        let now = Utc::now();
        assert!(g.permits(
            ResourceType::VectorDb,
            "docs",
            Action::Read,
            &json!({"collection": "docs"}),
            now
        ));
        assert!(!g.permits(
            ResourceType::VectorDb,
            "secrets",
            Action::Read,
            &json!({"collection": "secrets"}),
            now
        ));
    }

    #[tokio::test]
    async fn upsert_replaces_on_same_key() {
        let store = GrantStore::new();
        let subject = Subject::Role("user".into());
        assert!(!store
            .upsert(grant(subject.clone(), "docs.*", &[Action::Read]))
            .await
            .unwrap());
        assert!(store
            .upsert(grant(subject.clone(), "docs.*", &[Action::Read, Action::Write]))
            .await
            .unwrap());

        let grants = store.list().await;
        assert_eq!(grants.len(), 1);
        assert!(grants[0].actions.contains(&Action::Write));
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let store = GrantStore::new();
        let subject = Subject::User("u-1".into());
        store
            .upsert(grant(subject.clone(), "docs.*", &[Action::Read]))
            .await
            .unwrap();
        assert!(store
            .revoke(&subject, ResourceType::VectorDb, "docs.*")
            .await
            .unwrap());
        assert!(!store
            .revoke(&subject, ResourceType::VectorDb, "docs.*")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn applicable_merges_user_and_role_grants() {
        let store = GrantStore::new();
        store
            .upsert(grant(Subject::User("u-1".into()), "a", &[Action::Read]))
            .await
            .unwrap();
        store
            .upsert(grant(Subject::Role("user".into()), "b", &[Action::Read]))
            .await
            .unwrap();
        store
            .upsert(grant(Subject::User("u-2".into()), "c", &[Action::Read]))
            .await
            .unwrap();

        let got = store.applicable(Some("u-1"), &["user".into()]).await;
        assert_eq!(got.len(), 2);
    }
}
