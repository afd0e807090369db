//! Tool dispatcher: resolves JSON-RPC methods to tool implementations.
//!
//! `tools/list` filters by the principal's static bindings; `tools/call`
//! invokes the bound implementation, through the result cache's
//! single-flight path when the tool is cache-eligible.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::timeout;

use quarry_core::authz::AuthzEngine;
use quarry_core::cache::ResultCache;
use quarry_core::config::CacheTtls;
use quarry_core::principal::RequestContext;
use quarry_core::retriever::{RetrievalQuery, RetrieverFactory, RetrieverKind};
use quarry_core::{Error, Result};

use crate::tools::{
    ResultStream, SearchAllParams, SearchDatabaseParams, SearchVectorsParams, SearchWebParams,
    ToolOutput, ToolRegistry,
};

/// Default per-branch deadline for composite fan-out.
pub const DEFAULT_BRANCH_TIMEOUT: Duration = Duration::from_secs(10);

/// `tools/call` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallParams {
    pub fn from_request_params(params: &Value) -> Result<Self> {
        let call: ToolCallParams = serde_json::from_value(params.clone())
            .map_err(|e| Error::Validation(format!("invalid tools/call params: {e}")))?;
        if !call.arguments.is_object() && !call.arguments.is_null() {
            return Err(Error::Validation("arguments must be an object".into()));
        }
        Ok(call)
    }

    pub fn arguments_object(&self) -> Value {
        if self.arguments.is_null() {
            json!({})
        } else {
            self.arguments.clone()
        }
    }
}

pub struct DispatchCore {
    registry: ToolRegistry,
    engine: Arc<AuthzEngine>,
    factory: RetrieverFactory,
    cache: Option<Arc<ResultCache>>,
    cache_ttl: CacheTtls,
    branch_timeout: Duration,
}

impl DispatchCore {
    pub fn new(
        registry: ToolRegistry,
        engine: Arc<AuthzEngine>,
        factory: RetrieverFactory,
        cache: Option<Arc<ResultCache>>,
        cache_ttl: CacheTtls,
    ) -> Self {
        Self {
            registry,
            engine,
            factory,
            cache,
            cache_ttl,
            branch_timeout: DEFAULT_BRANCH_TIMEOUT,
        }
    }

    pub fn with_branch_timeout(mut self, branch_timeout: Duration) -> Self {
        self.branch_timeout = branch_timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Dispatch one validated, authorized request.
    pub async fn handle(&self, ctx: &RequestContext) -> Result<Value> {
        if let Some(deadline) = ctx.deadline {
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::ServiceUnavailable("request deadline exceeded".into()));
            }
        }

        match ctx.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {"listChanged": false}},
                "serverInfo": {
                    "name": "quarry-tools",
                    "version": quarry_core::version(),
                }
            })),
            "ping" => Ok(json!({})),
            // Liveness is also exposed as a bare method so unauthenticated
            // probes never need the tools/call envelope.
            "health_check" => Ok(health_check(&self.factory).await?.into_value().await),
            "tools/list" => self.tools_list(ctx),
            "tools/call" => self.tools_call(ctx).await,
            other => Err(Error::NotFound(format!("method not found: {other}"))),
        }
    }

    /// Tools visible to the principal, with their declared schemas.
    fn tools_list(&self, ctx: &RequestContext) -> Result<Value> {
        let visible = self.engine.visible_tools(&ctx.principal);
        let tools: Vec<Value> = self
            .registry
            .specs()
            .filter(|spec| visible.iter().any(|name| name == spec.name))
            .map(|spec| {
                json!({
                    "name": spec.name,
                    "description": spec.description,
                    "inputSchema": spec.input_schema,
                })
            })
            .collect();
        Ok(json!({"tools": tools}))
    }

    async fn tools_call(&self, ctx: &RequestContext) -> Result<Value> {
        let call = ToolCallParams::from_request_params(&ctx.arguments)?;
        let arguments = call.arguments_object();

        if !self.registry.contains(&call.name) {
            return Err(Error::NotFound(format!("unknown tool: {}", call.name)));
        }

        match (&self.cache, &ctx.fingerprint) {
            (Some(cache), Some(fp)) => {
                let factory = self.factory.clone();
                let name = call.name.clone();
                let branch_timeout = self.branch_timeout;
                let ttl = self.cache_ttl.for_tool(&call.name);
                cache
                    .get_or_compute(fp, ttl, move || async move {
                        run_tool(factory, name, arguments, branch_timeout).await
                    })
                    .await
            }
            _ => run_tool(self.factory.clone(), call.name, arguments, self.branch_timeout).await,
        }
    }
}

/// Invoke one tool implementation. Owned inputs so the future can be spawned
/// by the cache's single-flight coordinator.
async fn run_tool(
    factory: RetrieverFactory,
    name: String,
    arguments: Value,
    branch_timeout: Duration,
) -> Result<Value> {
    let output = match name.as_str() {
        "health_check" => health_check(&factory).await?,
        "search_web" => search_web(&factory, &arguments).await?,
        "search_vectors" => search_vectors(&factory, &arguments).await?,
        "search_database" => search_database(&factory, &arguments).await?,
        "search_all" => search_all(&factory, &arguments, branch_timeout).await?,
        other => return Err(Error::NotFound(format!("unknown tool: {other}"))),
    };
    Ok(output.into_value().await)
}

async fn health_check(factory: &RetrieverFactory) -> Result<ToolOutput> {
    let mut retrievers = serde_json::Map::new();
    for kind in factory.kinds().collect::<Vec<_>>() {
        let health = factory.get(kind)?.health().await;
        retrievers.insert(
            kind.as_str().to_string(),
            serde_json::to_value(&health)
                .map_err(|e| Error::Internal(format!("health encode: {e}")))?,
        );
    }
    Ok(ToolOutput::Value(json!({
        "status": "ok",
        "retrievers": Value::Object(retrievers),
    })))
}

async fn search_web(factory: &RetrieverFactory, arguments: &Value) -> Result<ToolOutput> {
    let params: SearchWebParams = parse_args("search_web", arguments)?;
    let mut query = RetrievalQuery::new(&params.query, params.limit);
    if let Some(depth) = params.depth {
        query.options.insert("depth".into(), Value::String(depth));
    }
    let items = factory.get(RetrieverKind::Web)?.retrieve(&query).await?;
    let count = items.len();
    Ok(ToolOutput::Value(json!({
        "results": items,
        "count": count,
    })))
}

async fn search_vectors(factory: &RetrieverFactory, arguments: &Value) -> Result<ToolOutput> {
    let params: SearchVectorsParams = parse_args("search_vectors", arguments)?;
    let query = RetrievalQuery::new(&params.query, params.top_k).with_target(&params.collection);
    let items = factory.get(RetrieverKind::Vector)?.retrieve(&query).await?;
    let count = items.len();
    Ok(ToolOutput::Value(json!({
        "collection": params.collection,
        "results": items,
        "count": count,
    })))
}

/// The relational search yields its rows as a lazy sequence.
async fn search_database(factory: &RetrieverFactory, arguments: &Value) -> Result<ToolOutput> {
    let params: SearchDatabaseParams = parse_args("search_database", arguments)?;
    let query = RetrievalQuery::new(&params.query, params.limit).with_target(&params.table);
    let items = factory.get(RetrieverKind::Database)?.retrieve(&query).await?;

    let (tx, stream) = ResultStream::channel(16);
    tokio::spawn(async move {
        for item in items {
            let row = serde_json::to_value(&item).unwrap_or(Value::Null);
            if tx.send(row).await.is_err() {
                break;
            }
        }
    });
    Ok(ToolOutput::Stream(stream))
}

/// Concurrent composite search with per-branch deadlines. Partial failures
/// surface per branch; the composite itself fails only when every branch
/// fails.
async fn search_all(
    factory: &RetrieverFactory,
    arguments: &Value,
    branch_timeout: Duration,
) -> Result<ToolOutput> {
    let params: SearchAllParams = parse_args("search_all", arguments)?;
    let query = RetrievalQuery::new(&params.query, params.limit);

    let branch = |kind: RetrieverKind| {
        let factory = factory.clone();
        let query = query.clone();
        async move {
            match timeout(branch_timeout, async {
                factory.get(kind)?.retrieve(&query).await
            })
            .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Retriever("branch timed out".into())),
            }
        }
    };

    let (web, vector, database) = tokio::join!(
        branch(RetrieverKind::Web),
        branch(RetrieverKind::Vector),
        branch(RetrieverKind::Database),
    );

    let branches = [
        ("web", web),
        ("vector", vector),
        ("database", database),
    ];
    let mut failures = 0;
    let mut body = serde_json::Map::new();
    for (key, outcome) in branches {
        let entry = match outcome {
            Ok(items) => json!({"status": "ok", "results": items}),
            Err(e) => {
                failures += 1;
                json!({"status": "error", "error": {"kind": e.kind(), "message": e.to_string()}})
            }
        };
        body.insert(key.to_string(), entry);
    }

    if failures == body.len() {
        return Err(Error::Retriever("all retrieval branches failed".into()));
    }
    Ok(ToolOutput::Value(Value::Object(body)))
}

fn parse_args<T: serde::de::DeserializeOwned>(tool: &str, arguments: &Value) -> Result<T> {
    serde_json::from_value(arguments.clone())
        .map_err(|e| Error::Validation(format!("invalid arguments for {tool}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::principal::{Principal, UserPrincipal};
    use quarry_core::retriever::StaticRetriever;

    fn ctx(method: &str, params: Value, principal: Principal) -> RequestContext {
        let mut ctx = RequestContext::new(method, params, json!(1));
        ctx.principal = principal;
        ctx
    }

    fn admin() -> Principal {
        Principal::User(UserPrincipal {
            id: "a-1".into(),
            email: None,
            roles: vec!["admin".into()],
        })
    }

    async fn core() -> DispatchCore {
        DispatchCore::new(
            ToolRegistry::builtin(),
            Arc::new(AuthzEngine::with_defaults().await),
            RetrieverFactory::with_static_defaults(),
            None,
            CacheTtls::default(),
        )
    }

    #[tokio::test]
    async fn ping_and_initialize_respond() {
        let core = core().await;
        let pong = core.handle(&ctx("ping", json!({}), Principal::Anonymous)).await.unwrap();
        assert_eq!(pong, json!({}));

        let init = core
            .handle(&ctx("initialize", json!({}), Principal::Anonymous))
            .await
            .unwrap();
        assert_eq!(init["serverInfo"]["name"], "quarry-tools");
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let core = core().await;
        let err = core
            .handle(&ctx("bogus", json!({}), Principal::Anonymous))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn tools_list_is_filtered_by_principal() {
        let core = core().await;

        let anon = core
            .handle(&ctx("tools/list", json!({}), Principal::Anonymous))
            .await
            .unwrap();
        assert_eq!(anon["tools"].as_array().unwrap().len(), 1);

        let all = core
            .handle(&ctx("tools/list", json!({}), admin()))
            .await
            .unwrap();
        assert_eq!(all["tools"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn tools_call_runs_web_search_with_limit() {
        let factory = RetrieverFactory::new().register(
            RetrieverKind::Web,
            Arc::new(
                StaticRetriever::new(RetrieverKind::Web)
                    .with_items(vec![json!("a"), json!("b"), json!("c"), json!("d")]),
            ),
        );
        let core = DispatchCore::new(
            ToolRegistry::builtin(),
            Arc::new(AuthzEngine::with_defaults().await),
            factory,
            None,
            CacheTtls::default(),
        );
        let result = core
            .handle(&ctx(
                "tools/call",
                json!({"name": "search_web", "arguments": {"query": "q", "limit": 3}}),
                admin(),
            ))
            .await
            .unwrap();
        assert_eq!(result["count"], 3);
        assert!(result["results"].as_array().unwrap().len() <= 3);
    }

    #[tokio::test]
    async fn search_database_materializes_its_stream() {
        let core = core().await;
        let result = core
            .handle(&ctx(
                "tools/call",
                json!({"name": "search_database", "arguments": {"table": "orders", "query": "q"}}),
                admin(),
            ))
            .await
            .unwrap();
        assert_eq!(result["done"], true);
        assert!(result["items"].is_array());
    }

    #[tokio::test]
    async fn composite_reports_partial_success() {
        let factory = RetrieverFactory::new()
            .register(
                RetrieverKind::Web,
                Arc::new(StaticRetriever::failing(RetrieverKind::Web, "web down")),
            )
            .register(
                RetrieverKind::Vector,
                Arc::new(StaticRetriever::new(RetrieverKind::Vector)),
            )
            .register(
                RetrieverKind::Database,
                Arc::new(StaticRetriever::new(RetrieverKind::Database)),
            );
        let core = DispatchCore::new(
            ToolRegistry::builtin(),
            Arc::new(AuthzEngine::with_defaults().await),
            factory,
            None,
            CacheTtls::default(),
        );
        let result = core
            .handle(&ctx(
                "tools/call",
                json!({"name": "search_all", "arguments": {"query": "q"}}),
                admin(),
            ))
            .await
            .unwrap();
        assert_eq!(result["web"]["status"], "error");
        assert_eq!(result["web"]["error"]["kind"], "retriever_error");
        assert_eq!(result["vector"]["status"], "ok");
        assert_eq!(result["database"]["status"], "ok");
    }

    #[tokio::test]
    async fn composite_fails_only_when_all_branches_fail() {
        let factory = RetrieverFactory::new()
            .register(
                RetrieverKind::Web,
                Arc::new(StaticRetriever::failing(RetrieverKind::Web, "down")),
            )
            .register(
                RetrieverKind::Vector,
                Arc::new(StaticRetriever::failing(RetrieverKind::Vector, "down")),
            )
            .register(
                RetrieverKind::Database,
                Arc::new(StaticRetriever::failing(RetrieverKind::Database, "down")),
            );
        let core = DispatchCore::new(
            ToolRegistry::builtin(),
            Arc::new(AuthzEngine::with_defaults().await),
            factory,
            None,
            CacheTtls::default(),
        );
        let err = core
            .handle(&ctx(
                "tools/call",
                json!({"name": "search_all", "arguments": {"query": "q"}}),
                admin(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Retriever(_)));
    }

    #[tokio::test]
    async fn expired_deadline_short_circuits() {
        let core = core().await;
        let mut c = ctx("ping", json!({}), Principal::Anonymous);
        c.deadline = Some(tokio::time::Instant::now() - Duration::from_secs(1));
        let err = core.handle(&c).await.unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable(_)));
    }
}
