//! Cache stage: marks cache-eligible calls with their fingerprint.
//!
//! Eligibility is a static property of the tool binding. The dispatcher
//! routes fingerprinted calls through the result cache's single-flight
//! path, which serves hits on the way in and populates on the way out.

use std::sync::Arc;

use async_trait::async_trait;

use quarry_core::authz::AuthzEngine;
use quarry_core::cache::fingerprint;
use quarry_core::principal::RequestContext;
use quarry_core::Result;

use crate::dispatch::ToolCallParams;

use super::{Flow, Stage};

pub struct CacheStage {
    engine: Arc<AuthzEngine>,
}

impl CacheStage {
    pub fn new(engine: Arc<AuthzEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Stage for CacheStage {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<Flow> {
        if ctx.method != "tools/call" {
            return Ok(Flow::Continue);
        }
        let call = ToolCallParams::from_request_params(&ctx.arguments)?;
        if let Some(binding) = self.engine.bindings().binding(&call.name) {
            if binding.cacheable {
                let scope = if binding.principal_varying {
                    ctx.principal.id()
                } else {
                    None
                };
                ctx.fingerprint =
                    Some(fingerprint(&call.name, scope, &call.arguments_object()));
            }
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::principal::{Principal, UserPrincipal};
    use serde_json::json;

    async fn stage() -> CacheStage {
        CacheStage::new(Arc::new(AuthzEngine::with_defaults().await))
    }

    fn call_ctx(principal: Principal, name: &str, args: serde_json::Value) -> RequestContext {
        let mut ctx = RequestContext::new(
            "tools/call",
            json!({"name": name, "arguments": args}),
            json!(1),
        );
        ctx.principal = principal;
        ctx
    }

    fn user(id: &str) -> Principal {
        Principal::User(UserPrincipal {
            id: id.into(),
            email: None,
            roles: vec!["admin".into()],
        })
    }

    #[tokio::test]
    async fn cacheable_call_gets_a_fingerprint() {
        let stage = stage().await;
        let mut c = call_ctx(user("u-1"), "search_web", json!({"query": "q"}));
        stage.before(&mut c).await.unwrap();
        assert!(c.fingerprint.is_some());
    }

    #[tokio::test]
    async fn fingerprint_ignores_principal_unless_binding_varies() {
        let stage = stage().await;

        // search_web results do not vary per principal.
        let mut a = call_ctx(user("u-1"), "search_web", json!({"query": "q"}));
        let mut b = call_ctx(user("u-2"), "search_web", json!({"query": "q"}));
        stage.before(&mut a).await.unwrap();
        stage.before(&mut b).await.unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);

        // search_database honors row-level filters: principal participates.
        let mut a = call_ctx(
            user("u-1"),
            "search_database",
            json!({"table": "t", "query": "q"}),
        );
        let mut b = call_ctx(
            user("u-2"),
            "search_database",
            json!({"table": "t", "query": "q"}),
        );
        stage.before(&mut a).await.unwrap();
        stage.before(&mut b).await.unwrap();
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[tokio::test]
    async fn public_tool_is_not_fingerprinted() {
        let stage = stage().await;
        let mut c = call_ctx(user("u-1"), "health_check", json!({}));
        stage.before(&mut c).await.unwrap();
        assert!(c.fingerprint.is_none());
    }
}
