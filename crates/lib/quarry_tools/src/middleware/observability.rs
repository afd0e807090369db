//! Observability stage: trace propagation and whole-request timing.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use quarry_core::observer::Observer;
use quarry_core::principal::RequestContext;
use quarry_core::Result;

use super::{Flow, Stage};

pub struct ObservabilityStage {
    observer: Arc<dyn Observer>,
}

impl ObservabilityStage {
    pub fn new(observer: Arc<dyn Observer>) -> Self {
        Self { observer }
    }
}

#[async_trait]
impl Stage for ObservabilityStage {
    fn name(&self) -> &'static str {
        "observability"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<Flow> {
        // Mint a trace context when the caller did not propagate one, so
        // every downstream log line can be correlated.
        if ctx.trace_context.is_none() {
            ctx.trace_context = Some(format!("quarry-{}", ctx.request_id));
        }
        Ok(Flow::Continue)
    }

    async fn after(&self, ctx: &RequestContext, outcome: &Result<Value>) {
        let elapsed = (Utc::now() - ctx.received_at)
            .to_std()
            .unwrap_or_default();
        let status = match outcome {
            Ok(_) => "ok".to_string(),
            Err(e) => e.kind().to_string(),
        };
        self.observer.emit_span(
            "rpc.request",
            &[
                ("method", ctx.method.clone()),
                ("request_id", ctx.request_id.clone()),
                ("status", status),
            ],
            elapsed,
        );
        if let Err(e) = outcome {
            self.observer.emit_error(
                e.kind(),
                &e.to_string(),
                &[("request_id", ctx.request_id.clone())],
            );
        }
    }
}
