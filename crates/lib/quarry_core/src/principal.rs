//! Request principal and per-request context.
//!
//! `RequestContext` is the explicit value threaded through the middleware
//! pipeline. Mutations are append-only: stages attach the authenticated
//! principal, the derived resource name, the cache fingerprint. They never
//! remove or overwrite what an earlier stage attached.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Authenticated identity attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// No credential presented (or a bypassed public method).
    Anonymous,
    /// A user authenticated via an access credential or trusted headers.
    User(UserPrincipal),
    /// An internal service (gateway-to-server trust).
    Service(String),
}

/// User identity: id plus the roles minted into the access credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPrincipal {
    pub id: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }

    /// Role set of the principal; empty for anonymous and service principals.
    pub fn roles(&self) -> &[String] {
        match self {
            Principal::User(u) => &u.roles,
            _ => &[],
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles().iter().any(|r| r == "admin")
    }

    /// Stable identity string for rate limiting and logging.
    pub fn id(&self) -> Option<&str> {
        match self {
            Principal::User(u) => Some(&u.id),
            Principal::Service(name) => Some(name),
            Principal::Anonymous => None,
        }
    }
}

/// Per-request ambient value carried through the pipeline.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub principal: Principal,
    pub method: String,
    pub arguments: Value,
    pub received_at: DateTime<Utc>,
    pub deadline: Option<tokio::time::Instant>,
    /// W3C `traceparent` propagated from the caller, if any.
    pub trace_context: Option<String>,
    /// Client network address, used as rate-limit identity pre-auth.
    pub client_addr: Option<String>,
    /// JSON-RPC request id, echoed into the response.
    pub rpc_id: Value,

    /// Raw `Authorization` bearer value, consumed by the auth stage.
    pub bearer: Option<String>,
    /// Principal parsed from internal-trust headers, consumed by the auth stage.
    pub trusted_principal: Option<UserPrincipal>,

    /// Concrete resource name, attached by the authorization stage.
    pub resource: Option<String>,
    /// Cache fingerprint, attached by the cache stage when eligible.
    pub fingerprint: Option<String>,
    /// Free-form stage annotations (trace attributes, timings).
    pub annotations: HashMap<String, String>,
}

impl RequestContext {
    /// Build a context for a parsed JSON-RPC request.
    pub fn new(method: impl Into<String>, arguments: Value, rpc_id: Value) -> Self {
        Self {
            request_id: crate::uuid::uuidv7().to_string(),
            principal: Principal::Anonymous,
            method: method.into(),
            arguments,
            received_at: Utc::now(),
            deadline: None,
            trace_context: None,
            client_addr: None,
            rpc_id,
            bearer: None,
            trusted_principal: None,
            resource: None,
            fingerprint: None,
            annotations: HashMap::new(),
        }
    }

    /// Identity used for rate limiting: user id when authenticated, client
    /// address otherwise.
    pub fn rate_identity(&self) -> String {
        match self.principal.id() {
            Some(id) => format!("user:{id}"),
            None => format!(
                "addr:{}",
                self.client_addr.as_deref().unwrap_or("unknown")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(roles: &[&str]) -> Principal {
        Principal::User(UserPrincipal {
            id: "u-1".into(),
            email: Some("u@example.com".into()),
            roles: roles.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn admin_detection() {
        assert!(user(&["admin"]).is_admin());
        assert!(!user(&["user"]).is_admin());
        assert!(!Principal::Anonymous.is_admin());
    }

    #[test]
    fn rate_identity_prefers_principal() {
        let mut ctx = RequestContext::new("tools/call", json!({}), json!(1));
        ctx.client_addr = Some("10.0.0.1".into());
        assert_eq!(ctx.rate_identity(), "addr:10.0.0.1");

        ctx.principal = user(&["user"]);
        assert_eq!(ctx.rate_identity(), "user:u-1");
    }

    #[test]
    fn request_ids_are_unique() {
        let a = RequestContext::new("ping", json!({}), json!(1));
        let b = RequestContext::new("ping", json!({}), json!(2));
        assert_ne!(a.request_id, b.request_id);
    }
}
