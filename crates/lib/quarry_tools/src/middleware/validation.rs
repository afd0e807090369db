//! Envelope and argument validation.
//!
//! Runs before authentication so malformed traffic cannot probe auth
//! timing. Unknown methods and unknown tools are rejected here with
//! not-found errors; tool arguments are checked against the declared
//! schemas.

use async_trait::async_trait;

use quarry_core::principal::RequestContext;
use quarry_core::{Error, Result};

use crate::dispatch::ToolCallParams;
use crate::tools::ToolRegistry;

use super::{Flow, Stage};

const KNOWN_METHODS: &[&str] = &[
    "initialize",
    "ping",
    "health_check",
    "tools/list",
    "tools/call",
];

pub struct ValidationStage {
    registry: ToolRegistry,
}

impl ValidationStage {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Stage for ValidationStage {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<Flow> {
        if !KNOWN_METHODS.contains(&ctx.method.as_str()) {
            return Err(Error::NotFound(format!(
                "method not found: {}",
                ctx.method
            )));
        }
        if ctx.method == "tools/call" {
            let call = ToolCallParams::from_request_params(&ctx.arguments)?;
            self.registry
                .validate_args(&call.name, &call.arguments_object())?;
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stage() -> ValidationStage {
        ValidationStage::new(ToolRegistry::builtin())
    }

    fn ctx(method: &str, params: serde_json::Value) -> RequestContext {
        RequestContext::new(method, params, json!(1))
    }

    #[tokio::test]
    async fn known_methods_pass() {
        for method in ["initialize", "ping", "health_check", "tools/list"] {
            let mut c = ctx(method, json!({}));
            assert!(stage().before(&mut c).await.is_ok(), "{method}");
        }
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let mut c = ctx("tools/destroy", json!({}));
        let err = stage().before(&mut c).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn tool_call_arguments_are_schema_checked() {
        let mut ok = ctx(
            "tools/call",
            json!({"name": "search_web", "arguments": {"query": "q"}}),
        );
        assert!(stage().before(&mut ok).await.is_ok());

        let mut missing = ctx("tools/call", json!({"name": "search_web", "arguments": {}}));
        assert!(matches!(
            stage().before(&mut missing).await.unwrap_err(),
            Error::Validation(_)
        ));

        let mut unknown_tool = ctx("tools/call", json!({"name": "rm_rf", "arguments": {}}));
        assert!(matches!(
            stage().before(&mut unknown_tool).await.unwrap_err(),
            Error::NotFound(_)
        ));

        let mut bad_shape = ctx("tools/call", json!({"arguments": {}}));
        assert!(matches!(
            stage().before(&mut bad_shape).await.unwrap_err(),
            Error::Validation(_)
        ));
    }
}
