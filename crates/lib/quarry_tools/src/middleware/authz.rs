//! Authorization stage: consults the engine for tool calls.

use std::sync::Arc;

use async_trait::async_trait;

use quarry_core::authz::{AuthzEngine, Decision};
use quarry_core::error::DenyReason;
use quarry_core::principal::RequestContext;
use quarry_core::{Error, Result};

use crate::dispatch::ToolCallParams;

use super::{Flow, Stage};

pub struct AuthzStage {
    engine: Arc<AuthzEngine>,
}

impl AuthzStage {
    pub fn new(engine: Arc<AuthzEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Stage for AuthzStage {
    fn name(&self) -> &'static str {
        "authorization"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<Flow> {
        // Only tool invocations carry bindings; tools/list is filtered in
        // the dispatcher instead of gated here.
        if ctx.method != "tools/call" {
            return Ok(Flow::Continue);
        }

        let call = ToolCallParams::from_request_params(&ctx.arguments)?;
        let arguments = call.arguments_object();
        match self.engine.authorize(&ctx.principal, &call.name, &arguments).await {
            Decision::Allow => {
                ctx.resource = Some(self.engine.resource_name(&call.name, &arguments));
                Ok(Flow::Continue)
            }
            Decision::Deny(DenyReason::UnknownTool) => {
                Err(Error::NotFound(format!("unknown tool: {}", call.name)))
            }
            Decision::Deny(DenyReason::Unauthenticated) => Err(Error::Authentication),
            Decision::Deny(reason) => Err(Error::Authorization(reason)),
        }
    }
}
