//! Tool registry: declared schemas and typed parameters.
//!
//! Each dispatchable tool declares its argument schema here; the validation
//! middleware uses the typed parameter structs to reject malformed calls
//! before they reach authentication or dispatch.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use quarry_core::{Error, Result};

/// Hard cap on any per-call result limit.
pub const MAX_RESULT_LIMIT: usize = 50;

fn default_limit() -> usize {
    5
}

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchWebParams {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub depth: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchVectorsParams {
    pub collection: String,
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchDatabaseParams {
    pub table: String,
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchAllParams {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn check_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(Error::Validation("query must be non-empty".into()));
    }
    Ok(())
}

fn check_limit(limit: usize, field: &str) -> Result<()> {
    if limit == 0 || limit > MAX_RESULT_LIMIT {
        return Err(Error::Validation(format!(
            "{field} must be between 1 and {MAX_RESULT_LIMIT}"
        )));
    }
    Ok(())
}

fn parse<T: serde::de::DeserializeOwned>(tool: &str, arguments: &Value) -> Result<T> {
    serde_json::from_value(arguments.clone())
        .map_err(|e| Error::Validation(format!("invalid arguments for {tool}: {e}")))
}

/// A tool's public descriptor, served by `tools/list`.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Registry of dispatchable tools. Names align one-to-one with the
/// authorization engine's bindings.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    specs: BTreeMap<&'static str, ToolSpec>,
}

impl ToolRegistry {
    pub fn builtin() -> Self {
        let mut specs = BTreeMap::new();
        for spec in [
            ToolSpec {
                name: "search_web",
                description: "Search the web and return the most relevant results",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "limit": {"type": "integer", "minimum": 1, "maximum": MAX_RESULT_LIMIT},
                        "depth": {"type": "string", "enum": ["basic", "advanced"]}
                    },
                    "required": ["query"]
                }),
            },
            ToolSpec {
                name: "search_vectors",
                description: "Similarity search over a vector collection",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "collection": {"type": "string"},
                        "query": {"type": "string"},
                        "top_k": {"type": "integer", "minimum": 1, "maximum": MAX_RESULT_LIMIT}
                    },
                    "required": ["collection", "query"]
                }),
            },
            ToolSpec {
                name: "search_database",
                description: "Full-text search over a relational table",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "table": {"type": "string"},
                        "query": {"type": "string"},
                        "limit": {"type": "integer", "minimum": 1, "maximum": MAX_RESULT_LIMIT}
                    },
                    "required": ["table", "query"]
                }),
            },
            ToolSpec {
                name: "search_all",
                description: "Search web, vector, and database sources concurrently",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "limit": {"type": "integer", "minimum": 1, "maximum": MAX_RESULT_LIMIT}
                    },
                    "required": ["query"]
                }),
            },
            ToolSpec {
                name: "health_check",
                description: "Liveness of the tool server and its retrievers",
                input_schema: json!({"type": "object", "properties": {}}),
            },
        ] {
            specs.insert(spec.name, spec);
        }
        Self { specs }
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.specs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.specs.values()
    }

    /// Validate call arguments against the tool's declared parameters.
    pub fn validate_args(&self, tool: &str, arguments: &Value) -> Result<()> {
        if !self.contains(tool) {
            return Err(Error::NotFound(format!("unknown tool: {tool}")));
        }
        match tool {
            "search_web" => {
                let p: SearchWebParams = parse(tool, arguments)?;
                check_query(&p.query)?;
                check_limit(p.limit, "limit")?;
                if let Some(depth) = &p.depth {
                    if depth != "basic" && depth != "advanced" {
                        return Err(Error::Validation(
                            "depth must be 'basic' or 'advanced'".into(),
                        ));
                    }
                }
            }
            "search_vectors" => {
                let p: SearchVectorsParams = parse(tool, arguments)?;
                check_query(&p.query)?;
                check_limit(p.top_k, "top_k")?;
                if p.collection.trim().is_empty() {
                    return Err(Error::Validation("collection must be non-empty".into()));
                }
            }
            "search_database" => {
                let p: SearchDatabaseParams = parse(tool, arguments)?;
                check_query(&p.query)?;
                check_limit(p.limit, "limit")?;
                if p.table.trim().is_empty() {
                    return Err(Error::Validation("table must be non-empty".into()));
                }
            }
            "search_all" => {
                let p: SearchAllParams = parse(tool, arguments)?;
                check_query(&p.query)?;
                check_limit(p.limit, "limit")?;
            }
            "health_check" => {}
            _ => {}
        }
        Ok(())
    }
}

/// A finite, non-restartable sequence of result items.
///
/// The producer closes the channel to signal the end; `collect` materializes
/// the remainder. Bounded streams may be materialized for caching; this is a
/// static property of the tool binding, not inferred at runtime.
pub struct ResultStream {
    rx: mpsc::Receiver<Value>,
}

impl ResultStream {
    pub fn channel(buffer: usize) -> (mpsc::Sender<Value>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }

    /// Next item, or `None` once the sequence is done.
    pub async fn next(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// Drain the remaining items into a vector.
    pub async fn collect(mut self) -> Vec<Value> {
        let mut items = Vec::new();
        while let Some(item) = self.rx.recv().await {
            items.push(item);
        }
        items
    }
}

/// What a tool invocation produces.
pub enum ToolOutput {
    Value(Value),
    Stream(ResultStream),
}

impl ToolOutput {
    /// Materialize into a plain JSON value (streams are drained).
    pub async fn into_value(self) -> Value {
        match self {
            ToolOutput::Value(v) => v,
            ToolOutput::Stream(stream) => {
                let items = stream.collect().await;
                json!({"items": items, "done": true})
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_five_builtin_tools() {
        let registry = ToolRegistry::builtin();
        assert_eq!(registry.specs().count(), 5);
        assert!(registry.contains("search_web"));
        assert!(registry.contains("health_check"));
    }

    #[test]
    fn validate_accepts_well_formed_calls() {
        let registry = ToolRegistry::builtin();
        assert!(registry
            .validate_args("search_web", &json!({"query": "rust", "limit": 3}))
            .is_ok());
        assert!(registry
            .validate_args(
                "search_vectors",
                &json!({"collection": "docs", "query": "q"})
            )
            .is_ok());
        assert!(registry
            .validate_args("health_check", &json!({}))
            .is_ok());
    }

    #[test]
    fn validate_rejects_unknown_tool() {
        let registry = ToolRegistry::builtin();
        assert!(matches!(
            registry.validate_args("no_such", &json!({})),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn validate_rejects_malformed_arguments() {
        let registry = ToolRegistry::builtin();
        // Missing required field.
        assert!(registry.validate_args("search_web", &json!({})).is_err());
        // Unknown field.
        assert!(registry
            .validate_args("search_web", &json!({"query": "q", "bogus": 1}))
            .is_err());
        // Empty query.
        assert!(registry
            .validate_args("search_web", &json!({"query": "  "}))
            .is_err());
        // Limit out of range.
        assert!(registry
            .validate_args("search_web", &json!({"query": "q", "limit": 0}))
            .is_err());
        assert!(registry
            .validate_args("search_web", &json!({"query": "q", "limit": 1000}))
            .is_err());
        // Bad depth.
        assert!(registry
            .validate_args("search_web", &json!({"query": "q", "depth": "extreme"}))
            .is_err());
    }

    #[tokio::test]
    async fn result_stream_collects_in_order_with_done_marker() {
        let (tx, stream) = ResultStream::channel(4);
        tokio::spawn(async move {
            for i in 0..3 {
                tx.send(json!(i)).await.unwrap();
            }
        });
        let value = ToolOutput::Stream(stream).into_value().await;
        assert_eq!(value, json!({"items": [0, 1, 2], "done": true}));
    }

    #[tokio::test]
    async fn result_stream_next_returns_none_when_done() {
        let (tx, mut stream) = ResultStream::channel(1);
        drop(tx);
        assert!(stream.next().await.is_none());
    }
}
