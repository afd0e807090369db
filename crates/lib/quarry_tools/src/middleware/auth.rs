//! Authentication stage.
//!
//! Resolves the request principal: internal-trust headers first, then the
//! bearer access credential. Configured public methods pass through
//! anonymously (a bearer presented on them is still honored so responses
//! can be principal-filtered, but an invalid one does not fail the call).
//!
//! Rejects debit the caller's network-identity rate bucket so credential
//! brute-forcing is bounded even though the authorization stage has not run
//! yet.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use quarry_core::credentials::CredentialService;
use quarry_core::principal::{Principal, RequestContext};
use quarry_core::ratelimit::RateLimiter;
use quarry_core::{Error, Result};

use super::{Flow, Stage};

pub struct AuthStage {
    credentials: Arc<CredentialService>,
    limiter: Arc<RateLimiter>,
    public_methods: Vec<String>,
}

impl AuthStage {
    pub fn new(
        credentials: Arc<CredentialService>,
        limiter: Arc<RateLimiter>,
        public_methods: Vec<String>,
    ) -> Self {
        Self {
            credentials,
            limiter,
            public_methods,
        }
    }

    fn is_public(&self, method: &str) -> bool {
        self.public_methods.iter().any(|m| m == method)
    }

    /// Failed authentication still consumes network-identity budget.
    async fn reject(&self, ctx: &RequestContext) -> Error {
        let identity = format!(
            "addr:{}",
            ctx.client_addr.as_deref().unwrap_or("unknown")
        );
        let decision = self.limiter.check(&identity).await;
        if !decision.allowed {
            return Error::RateLimit {
                retry_after: decision
                    .retry_after
                    .unwrap_or(std::time::Duration::from_secs(1)),
            };
        }
        Error::Authentication
    }
}

#[async_trait]
impl Stage for AuthStage {
    fn name(&self) -> &'static str {
        "authentication"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<Flow> {
        // The gateway already verified this principal; the trust token was
        // checked at the transport layer.
        if let Some(principal) = ctx.trusted_principal.clone() {
            ctx.principal = Principal::User(principal);
            return Ok(Flow::Continue);
        }

        let public = self.is_public(&ctx.method);
        match ctx.bearer.clone() {
            Some(token) => match self.credentials.verify_access(&token) {
                Ok(principal) => {
                    ctx.principal = Principal::User(principal);
                    Ok(Flow::Continue)
                }
                Err(_) if public => {
                    debug!(method = %ctx.method, "invalid bearer on public method, continuing anonymously");
                    Ok(Flow::Continue)
                }
                Err(_) => Err(self.reject(ctx).await),
            },
            None if public => Ok(Flow::Continue),
            None => Err(self.reject(ctx).await),
        }
    }
}
