//! Result cache with single-flight computation.
//!
//! Fingerprints are SHA-256 over the canonical JSON of
//! `{tool, principal_scope?, arguments}`. serde_json serializes object keys
//! in sorted order, so equivalent argument objects fingerprint identically
//! regardless of field order. The principal scope participates only for
//! tools whose results vary per principal.
//!
//! Under a miss, at most one computation per fingerprint is in flight:
//! concurrent requests subscribe to the in-flight result. The computation
//! runs in its own task, so a cancelled waiter never tears it down while
//! other waiters remain. Failures are never cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

use crate::kv::KVStore;
use crate::observer::Observer;
use crate::{Error, Result};

/// Fingerprint one tool invocation.
pub fn fingerprint(tool: &str, principal_scope: Option<&str>, arguments: &Value) -> String {
    let canonical = serde_json::json!({
        "tool": tool,
        "principal": principal_scope,
        "args": arguments,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

type Computation = std::result::Result<Value, Error>;
type InflightMap = HashMap<String, broadcast::Sender<Computation>>;

pub struct ResultCache {
    kv: Arc<dyn KVStore>,
    observer: Arc<dyn Observer>,
    inflight: Arc<Mutex<InflightMap>>,
}

impl ResultCache {
    pub fn new(kv: Arc<dyn KVStore>, observer: Arc<dyn Observer>) -> Self {
        Self {
            kv,
            observer,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Serve from cache, join an in-flight computation, or run `compute`.
    ///
    /// A KV outage degrades to computing without caching; retrieval must
    /// not fail because the cache is down.
    pub async fn get_or_compute<F, Fut>(&self, fp: &str, ttl: Duration, compute: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        match self.kv.get(&storage_key(fp)).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    self.observer.emit_counter("cache.hit", &[], 1);
                    return Ok(value);
                }
                Err(e) => warn!(error = %e, "cache payload undecodable, recomputing"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "cache store unreachable, computing without cache"),
        }
        self.observer.emit_counter("cache.miss", &[], 1);

        let mut inflight = self.inflight.lock().await;
        // Join the computation already in flight, or start one.
        let joined = inflight.get(fp).map(|tx| tx.subscribe());
        let mut rx = match joined {
            Some(rx) => {
                drop(inflight);
                rx
            }
            None => {
                let (tx, rx) = broadcast::channel(1);
                inflight.insert(fp.to_string(), tx.clone());
                drop(inflight);
                self.spawn_computation(fp.to_string(), ttl, tx, compute());
                rx
            }
        };

        match rx.recv().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Internal("cache computation dropped".into())),
        }
    }

    fn spawn_computation<Fut>(
        &self,
        fp: String,
        ttl: Duration,
        tx: broadcast::Sender<Computation>,
        fut: Fut,
    ) where
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let kv = self.kv.clone();
        let inflight = self.inflight.clone();
        tokio::spawn(async move {
            let result = fut.await;
            if let Ok(value) = &result {
                match serde_json::to_vec(value) {
                    Ok(bytes) => {
                        if let Err(e) = kv.set(&storage_key(&fp), bytes, Some(ttl)).await {
                            warn!(error = %e, "cache populate failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "cache payload unencodable"),
                }
            }
            // Deregister before broadcasting so late arrivals start a fresh
            // computation instead of subscribing to a finished one.
            inflight.lock().await.remove(&fp);
            let _ = tx.send(result);
        });
    }
}

fn storage_key(fp: &str) -> String {
    format!("cache:{fp}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::observer::testing::CountingObserver;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cache() -> (Arc<ResultCache>, Arc<CountingObserver>) {
        let observer = Arc::new(CountingObserver::default());
        let cache = Arc::new(ResultCache::new(
            Arc::new(MemoryKv::new()),
            observer.clone(),
        ));
        (cache, observer)
    }

    #[test]
    fn fingerprint_is_stable_under_key_reordering() {
        let a: Value = serde_json::from_str(r#"{"query":"q","limit":3}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"limit":3,"query":"q"}"#).unwrap();
        assert_eq!(
            fingerprint("search_web", None, &a),
            fingerprint("search_web", None, &b)
        );
    }

    #[test]
    fn fingerprint_varies_by_tool_principal_and_args() {
        let args = json!({"query": "q"});
        let base = fingerprint("search_web", None, &args);
        assert_ne!(base, fingerprint("search_vectors", None, &args));
        assert_ne!(base, fingerprint("search_web", Some("u-1"), &args));
        assert_ne!(base, fingerprint("search_web", None, &json!({"query": "r"})));
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let (cache, observer) = cache();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let got = cache
                .get_or_compute("fp-1", Duration::from_secs(60), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"n": 1}))
                })
                .await
                .unwrap();
            assert_eq!(got, json!({"n": 1}));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(observer.counter_total("cache.hit"), 1);
        assert_eq!(observer.counter_total("cache.miss"), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_compute_exactly_once() {
        let (cache, _) = cache();
        let calls = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_compute("fp-sf", Duration::from_secs(60), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(json!({"answer": 42}))
                    })
                    .await
            }));
        }

        for task in tasks {
            let value = task.await.unwrap().unwrap();
            assert_eq!(value, json!({"answer": 42}));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let (cache, _) = cache();
        let calls = Arc::new(AtomicU32::new(0));

        let c = calls.clone();
        let err = cache
            .get_or_compute("fp-err", Duration::from_secs(60), move || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::Retriever("backend down".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Retriever(_)));

        let c = calls.clone();
        let ok = cache
            .get_or_compute("fp-err", Duration::from_secs(60), move || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(json!(1))
            })
            .await
            .unwrap();
        assert_eq!(ok, json!(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_initiator_does_not_cancel_other_waiters() {
        let (cache, _) = cache();
        let calls = Arc::new(AtomicU32::new(0));

        let first = {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("fp-adopt", Duration::from_secs(60), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(json!("adopted"))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("fp-adopt", Duration::from_secs(60), || async {
                        Err(Error::Internal("joined computations must not recompute".into()))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Cancel the initiating request; the remaining waiter adopts.
        first.abort();
        let value = second.await.unwrap().unwrap();
        assert_eq!(value, json!("adopted"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entries_recompute() {
        let (cache, _) = cache();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            cache
                .get_or_compute("fp-ttl", Duration::ZERO, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(1))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
