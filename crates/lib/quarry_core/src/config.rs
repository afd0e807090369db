//! Typed configuration with profile-based feature selection.
//!
//! A profile picks a default middleware set; individual `QUARRY_ENABLE_*`
//! variables override it. Startup validation collects every violation at
//! once instead of failing on the first.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ratelimit::RateLimitSettings;

/// Minimum length for the signing key and the internal trust token.
pub const MIN_SECRET_LEN: usize = 32;

/// Server profile: a named middleware preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    Minimal,
    AuthOnly,
    AuthWithContext,
    AuthWithCache,
    Full,
    Custom,
}

impl Profile {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "minimal" => Some(Profile::Minimal),
            "auth_only" => Some(Profile::AuthOnly),
            "auth_with_context" => Some(Profile::AuthWithContext),
            "auth_with_cache" => Some(Profile::AuthWithCache),
            "full" => Some(Profile::Full),
            "custom" => Some(Profile::Custom),
            _ => None,
        }
    }

    /// Default feature set for the profile. `Custom` starts from `Full` and
    /// relies on explicit flag overrides.
    pub fn default_flags(&self) -> FeatureFlags {
        match self {
            Profile::Minimal => FeatureFlags {
                enable_auth: false,
                enable_cache: false,
                enable_rate_limit: false,
                enable_metrics: false,
                enable_validation: true,
                enable_error_handler: true,
                enable_enhanced_logging: false,
            },
            Profile::AuthOnly => FeatureFlags {
                enable_auth: true,
                enable_cache: false,
                enable_rate_limit: false,
                enable_metrics: false,
                enable_validation: true,
                enable_error_handler: true,
                enable_enhanced_logging: false,
            },
            Profile::AuthWithContext => FeatureFlags {
                enable_auth: true,
                enable_cache: false,
                enable_rate_limit: false,
                enable_metrics: true,
                enable_validation: true,
                enable_error_handler: true,
                enable_enhanced_logging: true,
            },
            Profile::AuthWithCache => FeatureFlags {
                enable_auth: true,
                enable_cache: true,
                enable_rate_limit: false,
                enable_metrics: false,
                enable_validation: true,
                enable_error_handler: true,
                enable_enhanced_logging: false,
            },
            Profile::Full | Profile::Custom => FeatureFlags {
                enable_auth: true,
                enable_cache: true,
                enable_rate_limit: true,
                enable_metrics: true,
                enable_validation: true,
                enable_error_handler: true,
                enable_enhanced_logging: true,
            },
        }
    }
}

/// Which middleware participate. The error handler cannot actually be
/// disabled (the pipeline driver always maps errors) but the flag is kept
/// so a misconfiguration is visible in validation rather than silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    pub enable_auth: bool,
    pub enable_cache: bool,
    pub enable_rate_limit: bool,
    pub enable_metrics: bool,
    pub enable_validation: bool,
    pub enable_error_handler: bool,
    pub enable_enhanced_logging: bool,
}

/// Secrets and credential lifetimes.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub signing_key: String,
    pub internal_trust_token: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// When false, public methods (tools/list, health) skip authentication.
    pub require_auth: bool,
    pub bcrypt_cost: u32,
}

/// Per-tool cache TTLs.
#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub web: Duration,
    pub vector: Duration,
    pub database: Duration,
    pub composite: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            web: Duration::from_secs(300),
            vector: Duration::from_secs(900),
            database: Duration::from_secs(600),
            composite: Duration::from_secs(300),
        }
    }
}

impl CacheTtls {
    pub fn for_tool(&self, tool: &str) -> Duration {
        match tool {
            "search_web" => self.web,
            "search_vectors" => self.vector,
            "search_database" => self.database,
            "search_all" => self.composite,
            _ => self.web,
        }
    }
}

/// Backing store DSNs. `memory://` selects the in-process implementations.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub session_dsn: String,
    pub user_dsn: String,
    pub kv_dsn: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            session_dsn: "memory://".into(),
            user_dsn: "memory://".into(),
            kv_dsn: "memory://".into(),
        }
    }
}

/// Complete configuration for both tiers.
#[derive(Debug, Clone)]
pub struct Config {
    pub profile: Profile,
    pub flags: FeatureFlags,
    pub security: SecurityConfig,
    pub rate: RateLimitSettings,
    pub cache_ttl: CacheTtls,
    /// Keys redacted by the logging middleware.
    pub sensitive_fields: Vec<String>,
    /// JSON-RPC methods that bypass authentication.
    pub public_methods: Vec<String>,
    pub decision_cache_ttl: Duration,
    pub stores: StoreConfig,
    pub gateway_bind: String,
    pub tools_bind: String,
    /// Where the gateway proxies tool calls.
    pub tool_server_url: String,
}

impl Default for Config {
    fn default() -> Self {
        let profile = Profile::Full;
        Self {
            profile,
            flags: profile.default_flags(),
            security: SecurityConfig {
                signing_key: String::new(),
                internal_trust_token: String::new(),
                access_ttl: Duration::from_secs(30 * 60),
                refresh_ttl: Duration::from_secs(7 * 24 * 3600),
                require_auth: true,
                bcrypt_cost: crate::users::password::DEFAULT_BCRYPT_COST,
            },
            rate: RateLimitSettings::default(),
            cache_ttl: CacheTtls::default(),
            sensitive_fields: default_sensitive_fields(),
            public_methods: vec![
                "health_check".into(),
                "initialize".into(),
                "ping".into(),
            ],
            decision_cache_ttl: Duration::from_secs(30),
            stores: StoreConfig::default(),
            gateway_bind: "127.0.0.1:8000".into(),
            tools_bind: "127.0.0.1:8010".into(),
            tool_server_url: "http://127.0.0.1:8010".into(),
        }
    }
}

fn default_sensitive_fields() -> Vec<String> {
    ["password", "token", "api_key", "secret", "auth"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Config {
    /// Reads configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `QUARRY_PROFILE` | `full` |
    /// | `QUARRY_SIGNING_KEY` | empty (validation fails when auth is on) |
    /// | `QUARRY_INTERNAL_TRUST_TOKEN` | empty (validation fails when auth is on) |
    /// | `QUARRY_ACCESS_TTL_SECS` / `QUARRY_REFRESH_TTL_SECS` | `1800` / `604800` |
    /// | `QUARRY_REQUIRE_AUTH` | `true` |
    /// | `RATE_LIMIT_PER_MINUTE` / `RATE_LIMIT_PER_HOUR` / `RATE_LIMIT_BURST` | `60` / `1000` / `10` |
    /// | `CACHE_TTL_WEB` / `CACHE_TTL_VECTOR` / `CACHE_TTL_DB` / `CACHE_TTL_ALL` | `300` / `900` / `600` / `300` |
    /// | `SENSITIVE_FIELDS` | `password,token,api_key,secret,auth` |
    /// | `SESSION_STORE_DSN` / `USER_STORE_DSN` / `KV_STORE_DSN` | `memory://` |
    /// | `GATEWAY_BIND_ADDR` / `TOOLS_BIND_ADDR` | `127.0.0.1:8000` / `127.0.0.1:8010` |
    /// | `TOOL_SERVER_URL` | `http://127.0.0.1:8010` |
    /// | `QUARRY_ENABLE_AUTH` … `QUARRY_ENABLE_ENHANCED_LOGGING` | profile default |
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Some(profile) = env_str("QUARRY_PROFILE").as_deref().and_then(Profile::parse) {
            config.profile = profile;
            config.flags = profile.default_flags();
        } else if env_str("QUARRY_PROFILE").is_some() {
            warn!("unknown QUARRY_PROFILE, keeping 'full'");
        }

        apply_flag(&mut config.flags.enable_auth, "QUARRY_ENABLE_AUTH");
        apply_flag(&mut config.flags.enable_cache, "QUARRY_ENABLE_CACHE");
        apply_flag(&mut config.flags.enable_rate_limit, "QUARRY_ENABLE_RATE_LIMIT");
        apply_flag(&mut config.flags.enable_metrics, "QUARRY_ENABLE_METRICS");
        apply_flag(&mut config.flags.enable_validation, "QUARRY_ENABLE_VALIDATION");
        apply_flag(&mut config.flags.enable_error_handler, "QUARRY_ENABLE_ERROR_HANDLER");
        apply_flag(
            &mut config.flags.enable_enhanced_logging,
            "QUARRY_ENABLE_ENHANCED_LOGGING",
        );

        match env_str("QUARRY_SIGNING_KEY").as_deref() {
            // Dev convenience: an ephemeral key per process.
            Some("generate") => {
                config.security.signing_key = generate_secret();
                warn!("generated an ephemeral signing key; set QUARRY_SIGNING_KEY in production");
            }
            Some(key) => config.security.signing_key = key.to_string(),
            None => {}
        }
        match env_str("QUARRY_INTERNAL_TRUST_TOKEN").as_deref() {
            Some("generate") => {
                config.security.internal_trust_token = generate_secret();
                warn!("generated an ephemeral internal trust token");
            }
            Some(token) => config.security.internal_trust_token = token.to_string(),
            None => {}
        }
        if let Some(secs) = env_u64("QUARRY_ACCESS_TTL_SECS") {
            config.security.access_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("QUARRY_REFRESH_TTL_SECS") {
            config.security.refresh_ttl = Duration::from_secs(secs);
        }
        if let Some(require) = env_bool("QUARRY_REQUIRE_AUTH") {
            config.security.require_auth = require;
        }
        if let Some(cost) = env_u64("QUARRY_BCRYPT_COST") {
            config.security.bcrypt_cost = cost as u32;
        }

        if let Some(n) = env_u64("RATE_LIMIT_PER_MINUTE") {
            config.rate.per_minute = n as u32;
        }
        if let Some(n) = env_u64("RATE_LIMIT_PER_HOUR") {
            config.rate.per_hour = n as u32;
        }
        if let Some(n) = env_u64("RATE_LIMIT_BURST") {
            config.rate.burst = n as u32;
        }

        if let Some(secs) = env_u64("CACHE_TTL_WEB") {
            config.cache_ttl.web = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CACHE_TTL_VECTOR") {
            config.cache_ttl.vector = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CACHE_TTL_DB") {
            config.cache_ttl.database = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CACHE_TTL_ALL") {
            config.cache_ttl.composite = Duration::from_secs(secs);
        }

        if let Some(fields) = env_str("SENSITIVE_FIELDS") {
            config.sensitive_fields = fields
                .split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect();
        }

        if let Some(dsn) = env_str("SESSION_STORE_DSN") {
            config.stores.session_dsn = dsn;
        }
        if let Some(dsn) = env_str("USER_STORE_DSN") {
            config.stores.user_dsn = dsn;
        }
        if let Some(dsn) = env_str("KV_STORE_DSN") {
            config.stores.kv_dsn = dsn;
        }

        if let Some(addr) = env_str("GATEWAY_BIND_ADDR") {
            config.gateway_bind = addr;
        }
        if let Some(addr) = env_str("TOOLS_BIND_ADDR") {
            config.tools_bind = addr;
        }
        if let Some(url) = env_str("TOOL_SERVER_URL") {
            config.tool_server_url = url;
        }

        // The safer default requires auth for tools/list; opting out adds it
        // to the bypass set.
        if !config.security.require_auth {
            config.public_methods.push("tools/list".into());
        }

        config
    }

    /// Startup validation. Returns every violation, not just the first.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.flags.enable_auth {
            if self.security.signing_key.len() < MIN_SECRET_LEN {
                errors.push(format!(
                    "signing key must be at least {MIN_SECRET_LEN} bytes"
                ));
            }
            if self.security.internal_trust_token.len() < MIN_SECRET_LEN {
                errors.push(format!(
                    "internal trust token must be at least {MIN_SECRET_LEN} bytes"
                ));
            }
            if self.security.access_ttl.is_zero() || self.security.refresh_ttl.is_zero() {
                errors.push("credential TTLs must be non-zero".into());
            }
        }

        if self.flags.enable_cache && !dsn_supported(&self.stores.kv_dsn) {
            errors.push(format!("unsupported kv store DSN '{}'", self.stores.kv_dsn));
        }
        if !dsn_supported(&self.stores.session_dsn) {
            errors.push(format!(
                "unsupported session store DSN '{}'",
                self.stores.session_dsn
            ));
        }
        if !dsn_supported(&self.stores.user_dsn) {
            errors.push(format!(
                "unsupported user store DSN '{}'",
                self.stores.user_dsn
            ));
        }

        if !self.flags.enable_error_handler {
            errors.push("the error handler cannot be disabled".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// A valid full-profile config with test secrets and memory stores.
    pub fn for_tests() -> Self {
        let mut config = Config::default();
        config.security.signing_key = "test-signing-key-0123456789abcdef".into();
        config.security.internal_trust_token = "test-trust-token-0123456789abcdef".into();
        config.security.bcrypt_cost = 4;
        config
    }
}

fn dsn_supported(dsn: &str) -> bool {
    dsn.starts_with("memory://") || dsn.starts_with("postgres://") || dsn.starts_with("postgresql://")
}

/// 64 random alphanumeric characters.
fn generate_secret() -> String {
    use rand::distr::Alphanumeric;
    use rand::Rng;
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    env_str(name).and_then(|v| v.parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env_str(name).map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

fn apply_flag(flag: &mut bool, name: &str) {
    if let Some(value) = env_bool(name) {
        *flag = value;
    }
}
