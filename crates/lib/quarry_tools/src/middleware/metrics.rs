//! Metrics stage: request counters and latency.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use quarry_core::observer::Observer;
use quarry_core::principal::RequestContext;
use quarry_core::Result;

use super::{Flow, Stage};

pub struct MetricsStage {
    observer: Arc<dyn Observer>,
}

impl MetricsStage {
    pub fn new(observer: Arc<dyn Observer>) -> Self {
        Self { observer }
    }
}

#[async_trait]
impl Stage for MetricsStage {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<Flow> {
        self.observer
            .emit_counter("rpc.requests", &[("method", ctx.method.clone())], 1);
        Ok(Flow::Continue)
    }

    async fn after(&self, ctx: &RequestContext, outcome: &Result<Value>) {
        let elapsed = (Utc::now() - ctx.received_at).to_std().unwrap_or_default();
        self.observer.emit_span(
            "rpc.latency",
            &[("method", ctx.method.clone())],
            elapsed,
        );
        if let Err(e) = outcome {
            self.observer
                .emit_counter("rpc.errors", &[("kind", e.kind().to_string())], 1);
        }
    }
}
