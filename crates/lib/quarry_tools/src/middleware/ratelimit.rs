//! Rate-limit stage.
//!
//! Runs after authorization so unauthorized traffic never drains a
//! legitimate principal's budget. Public methods are exempt.

use std::sync::Arc;

use async_trait::async_trait;

use quarry_core::principal::RequestContext;
use quarry_core::ratelimit::RateLimiter;
use quarry_core::{Error, Result};

use super::{Flow, Stage};

pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
    exempt_methods: Vec<String>,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>, exempt_methods: Vec<String>) -> Self {
        Self {
            limiter,
            exempt_methods,
        }
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<Flow> {
        if self.exempt_methods.iter().any(|m| m == &ctx.method) {
            return Ok(Flow::Continue);
        }
        let decision = self.limiter.check(&ctx.rate_identity()).await;
        if decision.allowed {
            Ok(Flow::Continue)
        } else {
            Err(Error::RateLimit {
                retry_after: decision
                    .retry_after
                    .unwrap_or(std::time::Duration::from_secs(1)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::principal::{Principal, UserPrincipal};
    use quarry_core::ratelimit::RateLimitSettings;
    use serde_json::json;

    fn stage(per_minute: u32, burst: u32) -> RateLimitStage {
        RateLimitStage::new(
            Arc::new(RateLimiter::new(RateLimitSettings {
                per_minute,
                per_hour: 1000,
                burst,
            })),
            vec!["ping".into()],
        )
    }

    fn ctx(method: &str) -> RequestContext {
        let mut ctx = RequestContext::new(method, json!({}), json!(1));
        ctx.principal = Principal::User(UserPrincipal {
            id: "u-1".into(),
            email: None,
            roles: vec!["user".into()],
        });
        ctx
    }

    #[tokio::test]
    async fn denies_after_burst_with_retry_after() {
        let stage = stage(2, 2);
        assert!(stage.before(&mut ctx("tools/call")).await.is_ok());
        assert!(stage.before(&mut ctx("tools/call")).await.is_ok());

        let err = stage.before(&mut ctx("tools/call")).await.unwrap_err();
        match err {
            Error::RateLimit { retry_after } => {
                assert!(retry_after.as_secs() >= 25);
            }
            other => panic!("expected rate limit error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exempt_methods_are_never_limited() {
        let stage = stage(1, 1);
        for _ in 0..5 {
            assert!(stage.before(&mut ctx("ping")).await.is_ok());
        }
    }
}
