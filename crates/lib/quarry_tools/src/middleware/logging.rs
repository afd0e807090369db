//! Request logging with sensitive-field redaction.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::info;

use quarry_core::principal::RequestContext;
use quarry_core::Result;

use super::Stage;

const REDACTED: &str = "[REDACTED]";

/// Replace values whose key contains any of the sensitive tokens.
pub fn redact(value: &Value, sensitive: &[String]) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                let lowered = key.to_lowercase();
                if sensitive.iter().any(|s| lowered.contains(s.as_str())) {
                    out.insert(key.clone(), Value::String(REDACTED.into()));
                } else {
                    out.insert(key.clone(), redact(val, sensitive));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| redact(v, sensitive)).collect())
        }
        other => other.clone(),
    }
}

pub struct RequestLoggingStage {
    sensitive_fields: Vec<String>,
    enhanced: bool,
}

impl RequestLoggingStage {
    pub fn new(sensitive_fields: Vec<String>, enhanced: bool) -> Self {
        let sensitive_fields = sensitive_fields
            .into_iter()
            .map(|f| f.to_lowercase())
            .collect();
        Self {
            sensitive_fields,
            enhanced,
        }
    }
}

#[async_trait]
impl Stage for RequestLoggingStage {
    fn name(&self) -> &'static str {
        "request_logging"
    }

    async fn after(&self, ctx: &RequestContext, outcome: &Result<Value>) {
        let duration_ms = (Utc::now() - ctx.received_at).num_milliseconds();
        let principal = ctx.principal.id().unwrap_or("anonymous");
        let status = match outcome {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        if self.enhanced {
            let params = redact(&ctx.arguments, &self.sensitive_fields);
            info!(
                request_id = %ctx.request_id,
                method = %ctx.method,
                principal,
                status,
                duration_ms,
                params = %params,
                "request"
            );
        } else {
            info!(
                request_id = %ctx.request_id,
                method = %ctx.method,
                principal,
                status,
                duration_ms,
                "request"
            );
        }
    }
}
