//! Authorization engine: role → resource-pattern → action decisions.

pub mod binding;
pub mod grant;
pub mod pattern;

use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::error::DenyReason;
use crate::principal::Principal;
use crate::users::{ROLE_GUEST, ROLE_USER};
use crate::Result;

pub use binding::{Action, Bindings, ResourceType, ToolBinding, ToolVisibility};
pub use grant::{Condition, ConditionOp, Grant, GrantStore, Subject};
pub use pattern::ResourcePattern;

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Default window for cached decisions.
pub const DEFAULT_DECISION_TTL: Duration = Duration::from_secs(30);

type DecisionKey = (String, String, String);

pub struct AuthzEngine {
    bindings: Bindings,
    grants: GrantStore,
    decisions: DashMap<DecisionKey, (Decision, Instant)>,
    decision_ttl: Duration,
}

impl AuthzEngine {
    pub fn new(bindings: Bindings, decision_ttl: Duration) -> Self {
        Self {
            bindings,
            grants: GrantStore::new(),
            decisions: DashMap::new(),
            decision_ttl,
        }
    }

    /// Engine with the built-in tool bindings and default role grants:
    /// `user` reads web search and the vector store, `guest` reads web
    /// search only. `admin` is an implicit grant of everything and is never
    /// stored.
    pub async fn with_defaults() -> Self {
        let engine = Self::new(Bindings::builtin(), DEFAULT_DECISION_TTL);
        let defaults = [
            (ROLE_USER, ResourceType::WebSearch),
            (ROLE_USER, ResourceType::VectorDb),
            (ROLE_GUEST, ResourceType::WebSearch),
        ];
        for (role, resource) in defaults {
            let grant = Grant::new(
                Subject::Role(role.to_string()),
                resource,
                ResourcePattern::parse("**").expect("static pattern"),
                [Action::Read],
            );
            engine
                .grants
                .upsert(grant)
                .await
                .expect("in-memory upsert cannot fail");
        }
        engine
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Evaluate the decision procedure for one call.
    pub async fn authorize(
        &self,
        principal: &Principal,
        tool: &str,
        arguments: &Value,
    ) -> Decision {
        let visibility = match self.bindings.get(tool) {
            Some(v) => v,
            None => return Decision::Deny(DenyReason::UnknownTool),
        };
        let binding = match visibility {
            ToolVisibility::Public => return Decision::Allow,
            ToolVisibility::Authenticated(b) => b,
        };

        if principal.is_anonymous() {
            return Decision::Deny(DenyReason::Unauthenticated);
        }

        let roles = principal.roles();
        if !binding.minimum_roles.iter().any(|m| roles.contains(m)) {
            return Decision::Deny(DenyReason::RoleInsufficient);
        }

        if principal.is_admin() {
            return Decision::Allow;
        }

        let resource = self.bindings.resource_name(tool, arguments);
        let principal_id = principal.id().unwrap_or_default().to_string();
        let key = (principal_id, tool.to_string(), resource.clone());

        if let Some(entry) = self.decisions.get(&key) {
            let (decision, at) = *entry;
            if at.elapsed() < self.decision_ttl {
                return decision;
            }
        }

        let now = Utc::now();
        let applicable = self.grants.applicable(principal.id(), roles).await;
        let allowed = applicable.iter().any(|g| {
            g.permits(binding.resource_type, &resource, binding.action, arguments, now)
        });
        let decision = if allowed {
            Decision::Allow
        } else {
            Decision::Deny(DenyReason::ResourceForbidden)
        };

        self.decisions.insert(key, (decision, Instant::now()));
        decision
    }

    /// Derive the concrete resource name for a call (also exposed for the
    /// pipeline's context annotation).
    pub fn resource_name(&self, tool: &str, arguments: &Value) -> String {
        self.bindings.resource_name(tool, arguments)
    }

    /// Insert or replace a grant. Invalidates cached decisions for the
    /// subject.
    pub async fn grant_permission(&self, grant: Grant) -> Result<bool> {
        let subject = grant.subject.clone();
        let replaced = self.grants.upsert(grant).await?;
        self.invalidate_subject(&subject);
        Ok(replaced)
    }

    /// Remove a grant. Idempotent.
    pub async fn revoke_permission(
        &self,
        subject: &Subject,
        resource_type: ResourceType,
        pattern: &str,
    ) -> Result<bool> {
        let removed = self.grants.revoke(subject, resource_type, pattern).await?;
        self.invalidate_subject(subject);
        Ok(removed)
    }

    pub async fn list_permissions(&self) -> Vec<Grant> {
        self.grants.list().await
    }

    /// Drop cached decisions for a subject. Role-scoped changes affect an
    /// unknown set of principals, so they clear the whole cache.
    pub fn invalidate_subject(&self, subject: &Subject) {
        match subject {
            Subject::User(id) => self.invalidate_user(id),
            Subject::Role(role) => {
                debug!(role = %role, "role grant changed, clearing decision cache");
                self.decisions.clear();
            }
        }
    }

    /// Drop cached decisions for one principal (role assignment changed).
    pub fn invalidate_user(&self, user_id: &str) {
        self.decisions.retain(|(pid, _, _), _| pid != user_id);
    }

    /// Tools visible to a principal: public tools plus any whose minimum
    /// roles intersect the principal's.
    pub fn visible_tools(&self, principal: &Principal) -> Vec<String> {
        self.bindings
            .tool_names()
            .filter(|name| match self.bindings.get(name) {
                Some(ToolVisibility::Public) => true,
                Some(ToolVisibility::Authenticated(b)) => {
                    let roles = principal.roles();
                    b.minimum_roles.iter().any(|m| roles.contains(m))
                }
                None => false,
            })
            .map(String::from)
            .collect()
    }
}
