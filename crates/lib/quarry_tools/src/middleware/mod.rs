//! Middleware pipeline for the tool server.
//!
//! Stages form an onion: `before` hooks run in declared order and may
//! short-circuit with a response or an error; `after` hooks run in reverse
//! order over the outcome. The chain is built once at startup from the
//! configuration profile, so the order is auditable in one place
//! ([`Pipeline::build`]).
//!
//! The error handler is not a stage: the pipeline driver itself maps every
//! error to a JSON-RPC error object and cannot be disabled.

pub mod auth;
pub mod authz;
pub mod cache;
pub mod logging;
pub mod metrics;
pub mod observability;
pub mod ratelimit;
pub mod validation;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use quarry_core::config::Config;
use quarry_core::credentials::CredentialService;
use quarry_core::observer::Observer;
use quarry_core::principal::RequestContext;
use quarry_core::ratelimit::RateLimiter;
use quarry_core::{authz::AuthzEngine, Error, Result};

use crate::dispatch::DispatchCore;

/// What a `before` hook decides.
#[derive(Debug)]
pub enum Flow {
    Continue,
    /// Short-circuit with a successful result (e.g. a cache hit).
    Respond(Value),
}

/// One pipeline stage.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs on the way in, in declared order.
    async fn before(&self, _ctx: &mut RequestContext) -> Result<Flow> {
        Ok(Flow::Continue)
    }

    /// Runs on the way out, in reverse order, for every stage whose
    /// `before` ran.
    async fn after(&self, _ctx: &RequestContext, _outcome: &Result<Value>) {}
}

/// Ordered, immutable chain of stages around the dispatch core.
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

/// Shared services the stages need.
pub struct PipelineDeps {
    pub credentials: Arc<CredentialService>,
    pub engine: Arc<AuthzEngine>,
    pub limiter: Arc<RateLimiter>,
    pub observer: Arc<dyn Observer>,
}

impl Pipeline {
    /// Assemble the canonical stage order for the configured profile.
    ///
    /// Outer to inner: observability, logging, validation, authentication,
    /// authorization, rate limit, metrics, cache. Profiles drop stages but
    /// never reorder them. Authorization deliberately precedes the rate
    /// limit so unauthorized traffic cannot drain a principal's budget; the
    /// authentication stage separately debits the network identity on its
    /// reject path.
    pub fn build(config: &Config, deps: &PipelineDeps) -> Self {
        let flags = &config.flags;
        let mut stages: Vec<Arc<dyn Stage>> = Vec::new();

        stages.push(Arc::new(observability::ObservabilityStage::new(
            deps.observer.clone(),
        )));
        stages.push(Arc::new(logging::RequestLoggingStage::new(
            config.sensitive_fields.clone(),
            flags.enable_enhanced_logging,
        )));
        if flags.enable_validation {
            stages.push(Arc::new(validation::ValidationStage::new(
                crate::tools::ToolRegistry::builtin(),
            )));
        }
        if flags.enable_auth {
            stages.push(Arc::new(auth::AuthStage::new(
                deps.credentials.clone(),
                deps.limiter.clone(),
                config.public_methods.clone(),
            )));
            stages.push(Arc::new(authz::AuthzStage::new(deps.engine.clone())));
        }
        if flags.enable_rate_limit {
            stages.push(Arc::new(ratelimit::RateLimitStage::new(
                deps.limiter.clone(),
                config.public_methods.clone(),
            )));
        }
        if flags.enable_metrics {
            stages.push(Arc::new(metrics::MetricsStage::new(deps.observer.clone())));
        }
        if flags.enable_cache {
            stages.push(Arc::new(cache::CacheStage::new(deps.engine.clone())));
        }

        Self { stages }
    }

    /// Stage names in execution order, for startup logging and tests.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run a request through the chain and the dispatch core.
    pub async fn execute(&self, ctx: &mut RequestContext, core: &DispatchCore) -> Result<Value> {
        let mut entered = 0;
        let mut outcome: Option<Result<Value>> = None;

        for stage in &self.stages {
            if deadline_exceeded(ctx) {
                outcome = Some(Err(Error::ServiceUnavailable(
                    "request deadline exceeded".into(),
                )));
                break;
            }
            entered += 1;
            match stage.before(ctx).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Respond(value)) => {
                    outcome = Some(Ok(value));
                    break;
                }
                Err(e) => {
                    outcome = Some(Err(e));
                    break;
                }
            }
        }

        let outcome = match outcome {
            Some(outcome) => outcome,
            None => core.handle(ctx).await,
        };

        for stage in self.stages[..entered].iter().rev() {
            stage.after(ctx, &outcome).await;
        }
        outcome
    }
}

fn deadline_exceeded(ctx: &RequestContext) -> bool {
    matches!(ctx.deadline, Some(deadline) if tokio::time::Instant::now() >= deadline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::config::Profile;
    use quarry_core::observer::NoopObserver;
    use quarry_core::ratelimit::RateLimitSettings;
    use quarry_core::session::MemorySessionStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    async fn deps() -> PipelineDeps {
        let config = Config::for_tests();
        let sessions = Arc::new(MemorySessionStore::new());
        PipelineDeps {
            credentials: Arc::new(CredentialService::new(
                quarry_core::credentials::CredentialConfig::new(
                    config.security.signing_key.clone(),
                ),
                sessions,
            )),
            engine: Arc::new(AuthzEngine::with_defaults().await),
            limiter: Arc::new(RateLimiter::new(RateLimitSettings::default())),
            observer: Arc::new(NoopObserver),
        }
    }

    #[tokio::test]
    async fn full_profile_builds_all_stages_in_order() {
        let config = Config::for_tests();
        let pipeline = Pipeline::build(&config, &deps().await);
        assert_eq!(
            pipeline.stage_names(),
            vec![
                "observability",
                "request_logging",
                "validation",
                "authentication",
                "authorization",
                "rate_limit",
                "metrics",
                "cache",
            ]
        );
    }

    #[tokio::test]
    async fn minimal_profile_keeps_relative_order() {
        let mut config = Config::for_tests();
        config.profile = Profile::Minimal;
        config.flags = Profile::Minimal.default_flags();
        let pipeline = Pipeline::build(&config, &deps().await);
        assert_eq!(
            pipeline.stage_names(),
            vec!["observability", "request_logging", "validation"]
        );
    }

    struct Recorder {
        label: &'static str,
        order: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Stage for Recorder {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn before(&self, _ctx: &mut RequestContext) -> Result<Flow> {
            self.order.lock().unwrap().push(format!("before:{}", self.label));
            Ok(Flow::Continue)
        }

        async fn after(&self, _ctx: &RequestContext, _outcome: &Result<Value>) {
            self.order.lock().unwrap().push(format!("after:{}", self.label));
        }
    }

    struct Rejector;

    #[async_trait]
    impl Stage for Rejector {
        fn name(&self) -> &'static str {
            "rejector"
        }

        async fn before(&self, _ctx: &mut RequestContext) -> Result<Flow> {
            Err(Error::Authentication)
        }
    }

    async fn run(pipeline: &Pipeline, method: &str) -> Result<Value> {
        let core = DispatchCore::new(
            crate::tools::ToolRegistry::builtin(),
            Arc::new(AuthzEngine::with_defaults().await),
            quarry_core::retriever::RetrieverFactory::with_static_defaults(),
            None,
            quarry_core::config::CacheTtls::default(),
        );
        let mut ctx = RequestContext::new(method, serde_json::json!({}), serde_json::json!(1));
        pipeline.execute(&mut ctx, &core).await
    }

    #[tokio::test]
    async fn before_runs_in_order_and_after_in_reverse() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline {
            stages: vec![
                Arc::new(Recorder {
                    label: "a",
                    order: order.clone(),
                }),
                Arc::new(Recorder {
                    label: "b",
                    order: order.clone(),
                }),
            ],
        };
        run(&pipeline, "ping").await.unwrap();
        assert_eq!(
            *order.lock().unwrap(),
            vec!["before:a", "before:b", "after:b", "after:a"]
        );
    }

    #[tokio::test]
    async fn rejecting_stage_short_circuits_but_unwinds_entered_stages() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline {
            stages: vec![
                Arc::new(Recorder {
                    label: "outer",
                    order: order.clone(),
                }),
                Arc::new(Rejector),
                Arc::new(Recorder {
                    label: "inner",
                    order: order.clone(),
                }),
            ],
        };
        let err = run(&pipeline, "ping").await.unwrap_err();
        assert!(matches!(err, Error::Authentication));
        // The inner stage never ran; the outer stage still unwound.
        assert_eq!(*order.lock().unwrap(), vec!["before:outer", "after:outer"]);
    }

    #[tokio::test]
    async fn expired_deadline_stops_before_any_stage_work() {
        let calls = Arc::new(AtomicUsize::new(0));
        struct Counting(Arc<AtomicUsize>);

        #[async_trait]
        impl Stage for Counting {
            fn name(&self) -> &'static str {
                "counting"
            }
            async fn before(&self, _ctx: &mut RequestContext) -> Result<Flow> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(Flow::Continue)
            }
        }

        let pipeline = Pipeline {
            stages: vec![Arc::new(Counting(calls.clone()))],
        };
        let core = DispatchCore::new(
            crate::tools::ToolRegistry::builtin(),
            Arc::new(AuthzEngine::with_defaults().await),
            quarry_core::retriever::RetrieverFactory::with_static_defaults(),
            None,
            quarry_core::config::CacheTtls::default(),
        );
        let mut ctx = RequestContext::new("ping", serde_json::json!({}), serde_json::json!(1));
        ctx.deadline = Some(tokio::time::Instant::now() - std::time::Duration::from_millis(1));
        let err = pipeline.execute(&mut ctx, &core).await.unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
