//! JSON-RPC 2.0 wire types.
//!
//! Hand-rolled request/response envelopes; validation happens at the
//! boundary so nothing malformed reaches the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use quarry_core::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Parse a raw body into a request, checking the envelope.
pub fn parse_request(raw: &[u8]) -> Result<JsonRpcRequest> {
    let request: JsonRpcRequest = serde_json::from_slice(raw)
        .map_err(|e| Error::Validation(format!("malformed JSON-RPC request: {e}")))?;
    if request.jsonrpc != "2.0" {
        return Err(Error::Validation("jsonrpc field must be \"2.0\"".into()));
    }
    if request.method.is_empty() {
        return Err(Error::Validation("method must be non-empty".into()));
    }
    if !request.params.is_object() && !request.params.is_null() {
        return Err(Error::Validation("params must be an object".into()));
    }
    Ok(request)
}

/// Map a core error to the JSON-RPC error object. The `data` field carries
/// the stable kind, the request id, and kind-specific hints, never internal
/// detail.
pub fn error_object(error: &Error, request_id: &str) -> JsonRpcError {
    let mut data = serde_json::json!({
        "kind": error.kind(),
        "request_id": request_id,
    });
    match error {
        Error::RateLimit { retry_after } => {
            data["retry_after"] = Value::from(retry_after.as_secs().max(1));
        }
        Error::Authorization(reason) => {
            data["reason"] = Value::from(reason.as_str());
        }
        _ => {}
    }
    JsonRpcError {
        code: error.json_rpc_code(),
        message: error.to_string(),
        data: Some(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::error::DenyReason;
    use std::time::Duration;

    #[test]
    fn parse_valid_request() {
        let raw = br#"{"jsonrpc":"2.0","method":"ping","params":{},"id":1}"#;
        let request = parse_request(raw).unwrap();
        assert_eq!(request.method, "ping");
        assert_eq!(request.id, serde_json::json!(1));
    }

    #[test]
    fn parse_defaults_params_and_id() {
        let raw = br#"{"jsonrpc":"2.0","method":"ping"}"#;
        let request = parse_request(raw).unwrap();
        assert!(request.params.is_null());
        assert!(request.id.is_null());
    }

    #[test]
    fn parse_rejects_bad_envelope() {
        assert!(parse_request(b"not json").is_err());
        assert!(parse_request(br#"{"jsonrpc":"1.0","method":"ping"}"#).is_err());
        assert!(parse_request(br#"{"jsonrpc":"2.0","method":""}"#).is_err());
        assert!(parse_request(br#"{"jsonrpc":"2.0","method":"m","params":[1]}"#).is_err());
    }

    #[test]
    fn error_object_carries_kind_and_request_id() {
        let e = Error::Authorization(DenyReason::ResourceForbidden);
        let obj = error_object(&e, "req-1");
        assert_eq!(obj.code, -32041);
        let data = obj.data.unwrap();
        assert_eq!(data["kind"], "authorization_error");
        assert_eq!(data["reason"], "resource_forbidden");
        assert_eq!(data["request_id"], "req-1");
    }

    #[test]
    fn rate_limit_error_includes_retry_after() {
        let e = Error::RateLimit {
            retry_after: Duration::from_secs(30),
        };
        let obj = error_object(&e, "req-2");
        assert_eq!(obj.code, -32045);
        assert_eq!(obj.data.unwrap()["retry_after"], 30);
    }

    #[test]
    fn response_serializes_result_xor_error() {
        let ok = JsonRpcResponse::success(serde_json::json!(1), serde_json::json!({"a": 1}));
        let s = serde_json::to_string(&ok).unwrap();
        assert!(s.contains("result") && !s.contains("error"));

        let err = JsonRpcResponse::error(
            serde_json::json!(1),
            JsonRpcError {
                code: -32601,
                message: "nope".into(),
                data: None,
            },
        );
        let s = serde_json::to_string(&err).unwrap();
        assert!(s.contains("error") && !s.contains("result"));
    }
}
