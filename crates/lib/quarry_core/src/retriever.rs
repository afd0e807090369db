//! Retriever capability: the seam to the data-plane back-ends.
//!
//! The core never sees a concrete search engine, only this trait, composed
//! through a factory keyed by retriever kind. The static implementation
//! serves development profiles and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// The retrieval back-end classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrieverKind {
    Web,
    Vector,
    Database,
}

impl RetrieverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrieverKind::Web => "web",
            RetrieverKind::Vector => "vector",
            RetrieverKind::Database => "database",
        }
    }
}

/// A retrieval request, normalized across back-ends.
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub text: String,
    /// Concrete resource addressed, when the back-end has one
    /// (vector collection, relational table).
    pub target: Option<String>,
    pub limit: usize,
    pub options: HashMap<String, Value>,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            target: None,
            limit,
            options: HashMap::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// One retrieved result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedItem {
    pub source: RetrieverKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub payload: Value,
}

/// Back-end liveness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RetrieverHealth {
    Healthy,
    Degraded(String),
    Unavailable(String),
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Run a query. The sequence is finite and fully owned by the caller.
    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<RetrievedItem>>;

    async fn health(&self) -> RetrieverHealth;
}

/// Composes retrievers by kind.
#[derive(Clone, Default)]
pub struct RetrieverFactory {
    retrievers: HashMap<RetrieverKind, Arc<dyn Retriever>>,
}

impl RetrieverFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: RetrieverKind, retriever: Arc<dyn Retriever>) -> Self {
        self.retrievers.insert(kind, retriever);
        self
    }

    pub fn get(&self, kind: RetrieverKind) -> Result<Arc<dyn Retriever>> {
        self.retrievers
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("retriever {}", kind.as_str())))
    }

    pub fn kinds(&self) -> impl Iterator<Item = RetrieverKind> + '_ {
        self.retrievers.keys().copied()
    }

    /// Factory of static retrievers for every kind (dev profile, tests).
    pub fn with_static_defaults() -> Self {
        Self::new()
            .register(RetrieverKind::Web, Arc::new(StaticRetriever::new(RetrieverKind::Web)))
            .register(
                RetrieverKind::Vector,
                Arc::new(StaticRetriever::new(RetrieverKind::Vector)),
            )
            .register(
                RetrieverKind::Database,
                Arc::new(StaticRetriever::new(RetrieverKind::Database)),
            )
    }
}

/// In-process retriever serving canned items; counts invocations so tests
/// can assert single-flight behavior.
pub struct StaticRetriever {
    kind: RetrieverKind,
    items: Vec<Value>,
    fail_with: Option<String>,
    calls: AtomicU64,
}

impl StaticRetriever {
    pub fn new(kind: RetrieverKind) -> Self {
        Self {
            kind,
            items: vec![Value::String(format!("{}-result", kind.as_str()))],
            fail_with: None,
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_items(mut self, items: Vec<Value>) -> Self {
        self.items = items;
        self
    }

    /// Every retrieve call fails with a retriever error.
    pub fn failing(kind: RetrieverKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            items: Vec::new(),
            fail_with: Some(message.into()),
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<RetrievedItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(Error::Retriever(message.clone()));
        }
        Ok(self
            .items
            .iter()
            .take(query.limit)
            .map(|payload| RetrievedItem {
                source: self.kind,
                score: None,
                payload: payload.clone(),
            })
            .collect())
    }

    async fn health(&self) -> RetrieverHealth {
        match &self.fail_with {
            Some(message) => RetrieverHealth::Unavailable(message.clone()),
            None => RetrieverHealth::Healthy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn static_retriever_honors_limit() {
        let r = StaticRetriever::new(RetrieverKind::Web)
            .with_items(vec![json!(1), json!(2), json!(3), json!(4)]);
        let items = r
            .retrieve(&RetrievalQuery::new("q", 2))
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(r.calls(), 1);
    }

    #[tokio::test]
    async fn failing_retriever_reports_unhealthy() {
        let r = StaticRetriever::failing(RetrieverKind::Vector, "down");
        assert!(r.retrieve(&RetrievalQuery::new("q", 1)).await.is_err());
        assert_eq!(
            r.health().await,
            RetrieverHealth::Unavailable("down".into())
        );
    }

    #[tokio::test]
    async fn factory_resolves_by_kind() {
        let factory = RetrieverFactory::with_static_defaults();
        assert!(factory.get(RetrieverKind::Web).is_ok());
        assert_eq!(factory.kinds().count(), 3);

        let empty = RetrieverFactory::new();
        assert!(matches!(
            empty.get(RetrieverKind::Web),
            Err(Error::NotFound(_))
        ));
    }
}
