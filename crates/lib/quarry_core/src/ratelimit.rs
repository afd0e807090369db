//! Token-bucket rate limiting per (scope, identity).
//!
//! Each identity owns a per-minute and a per-hour bucket; a request is
//! admitted iff both hold at least one token, and only then are both
//! debited. Refill is lazy on access. An optional KV backing turns the
//! limiter into a fixed-window distributed counter; if that backing fails
//! the limiter fails OPEN so a dependency outage never locks out traffic.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::warn;

use crate::kv::KVStore;

/// Limiter parameters.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub per_minute: u32,
    pub per_hour: u32,
    /// Burst capacity of the per-minute bucket.
    pub burst: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 1000,
            burst: 10,
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Time until the most-constrained bucket accrues one token.
    pub retry_after: Option<Duration>,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }

    fn deny(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after: Some(retry_after),
        }
    }
}

#[derive(Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, capacity: u32, rate_per_sec: f64, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate_per_sec).min(capacity as f64);
        self.last_refill = now;
    }

    /// Seconds until one token is available at the given rate.
    fn time_to_one_token(&self, rate_per_sec: f64) -> f64 {
        if self.tokens >= 1.0 || rate_per_sec <= 0.0 {
            0.0
        } else {
            (1.0 - self.tokens) / rate_per_sec
        }
    }
}

/// Both buckets for one identity, kept under a single map entry so the
/// two-bucket admission check is atomic.
struct IdentityBuckets {
    minute: TokenBucket,
    hour: TokenBucket,
    last_seen: Instant,
}

pub struct RateLimiter {
    buckets: DashMap<String, IdentityBuckets>,
    settings: RateLimitSettings,
    kv: Option<Arc<dyn KVStore>>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            buckets: DashMap::new(),
            settings,
            kv: None,
        }
    }

    /// Share admission state through a KV store (fixed-window counters).
    pub fn with_kv(settings: RateLimitSettings, kv: Arc<dyn KVStore>) -> Self {
        Self {
            buckets: DashMap::new(),
            settings,
            kv: Some(kv),
        }
    }

    fn minute_capacity(&self) -> u32 {
        self.settings.burst.max(1)
    }

    fn minute_rate(&self) -> f64 {
        self.settings.per_minute as f64 / 60.0
    }

    fn hour_capacity(&self) -> u32 {
        self.settings.per_hour.max(1)
    }

    fn hour_rate(&self) -> f64 {
        self.settings.per_hour as f64 / 3600.0
    }

    /// Admit or deny one request for `identity`.
    pub async fn check(&self, identity: &str) -> RateDecision {
        if self.settings.per_minute == 0 && self.settings.per_hour == 0 {
            return RateDecision::allow();
        }
        match &self.kv {
            Some(kv) => self.check_distributed(kv.clone(), identity).await,
            None => self.check_local(identity),
        }
    }

    fn check_local(&self, identity: &str) -> RateDecision {
        let now = Instant::now();
        let mut entry = self
            .buckets
            .entry(identity.to_string())
            .or_insert_with(|| IdentityBuckets {
                minute: TokenBucket::new(self.minute_capacity()),
                hour: TokenBucket::new(self.hour_capacity()),
                last_seen: now,
            });
        entry.last_seen = now;

        entry.minute.refill(self.minute_capacity(), self.minute_rate(), now);
        entry.hour.refill(self.hour_capacity(), self.hour_rate(), now);

        if entry.minute.tokens >= 1.0 && entry.hour.tokens >= 1.0 {
            entry.minute.tokens -= 1.0;
            entry.hour.tokens -= 1.0;
            return RateDecision::allow();
        }

        let wait = entry
            .minute
            .time_to_one_token(self.minute_rate())
            .max(entry.hour.time_to_one_token(self.hour_rate()));
        RateDecision::deny(Duration::from_secs_f64(wait.max(0.001)))
    }

    /// Fixed-window counters in the KV store, one per scope. The KV being
    /// unreachable admits the request with a warning.
    async fn check_distributed(&self, kv: Arc<dyn KVStore>, identity: &str) -> RateDecision {
        let epoch = chrono::Utc::now().timestamp().max(0) as u64;
        let windows = [
            ("minute", 60u64, self.settings.per_minute as u64),
            ("hour", 3600u64, self.settings.per_hour as u64),
        ];

        let mut worst_wait: Option<Duration> = None;
        for (scope, window_secs, limit) in windows {
            if limit == 0 {
                continue;
            }
            let window = epoch / window_secs;
            let key = format!("rl:{scope}:{identity}:{window}");
            match kv
                .atomic_incr_with_expiry(&key, Duration::from_secs(window_secs))
                .await
            {
                Ok(count) if count > limit => {
                    let wait = Duration::from_secs(window_secs - epoch % window_secs);
                    worst_wait = Some(worst_wait.map_or(wait, |w| w.max(wait)));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, scope, "rate-limit backing store unavailable, failing open");
                    return RateDecision::allow();
                }
            }
        }

        match worst_wait {
            Some(wait) => RateDecision::deny(wait),
            None => RateDecision::allow(),
        }
    }

    /// Drop buckets idle for longer than `max_idle`. Returns how many were
    /// removed.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        if max_idle.is_zero() {
            return 0;
        }
        let now = Instant::now();
        let stale: Vec<String> = self
            .buckets
            .iter()
            .filter(|e| now.duration_since(e.value().last_seen) >= max_idle)
            .map(|e| e.key().clone())
            .collect();
        let mut removed = 0;
        for key in stale {
            if self.buckets.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }
}
