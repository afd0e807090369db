//! Quarry server binary.
//!
//! Binds the client-facing gateway and the tool server on two ports and
//! prints the bound ports as JSON on stdout so a supervisor can discover
//! them. Backing stores are selected by DSN: `memory://` for in-process,
//! `postgres://` for sqlx-backed persistence.

use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use quarry_core::authz::AuthzEngine;
use quarry_core::config::Config;
use quarry_core::credentials::{CredentialConfig, CredentialService};
use quarry_core::kv::MemoryKv;
use quarry_core::observer::TracingObserver;
use quarry_core::ratelimit::RateLimiter;
use quarry_core::retriever::RetrieverFactory;
use quarry_core::session::{MemorySessionStore, PgSessionStore, SessionStore};
use quarry_core::users::{MemoryUserDirectory, PgUserDirectory, UserDirectory};

/// CLI arguments. Everything else comes from the environment
/// (see `quarry_core::config::Config::from_env`).
#[derive(Parser, Debug)]
#[command(name = "quarry_server", about = "Quarry access-control plane")]
struct Args {
    /// Gateway bind address (overrides GATEWAY_BIND_ADDR).
    #[arg(long)]
    gateway_bind: Option<String>,

    /// Tool server bind address (overrides TOOLS_BIND_ADDR).
    #[arg(long)]
    tools_bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout is reserved for the JSON port message.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,quarry_gateway=debug,quarry_tools=debug,quarry_core=debug"
                    .parse()
                    .unwrap()
            }),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(bind) = args.gateway_bind {
        config.gateway_bind = bind;
    }
    if let Some(bind) = args.tools_bind {
        config.tools_bind = bind;
    }

    if let Err(violations) = config.validate() {
        for violation in &violations {
            error!(%violation, "configuration invalid");
        }
        return Err("configuration validation failed".into());
    }

    info!(profile = ?config.profile, "starting quarry_server");

    // Backing stores by DSN.
    let sessions: Arc<dyn SessionStore> = if config.stores.session_dsn.starts_with("memory://") {
        Arc::new(MemorySessionStore::new())
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(&config.stores.session_dsn)
            .await?;
        let store = PgSessionStore::new(pool);
        store.migrate().await?;
        Arc::new(store)
    };

    let directory: Arc<dyn UserDirectory> = if config.stores.user_dsn.starts_with("memory://") {
        Arc::new(MemoryUserDirectory::new(config.security.bcrypt_cost))
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(&config.stores.user_dsn)
            .await?;
        let store = PgUserDirectory::new(pool, config.security.bcrypt_cost);
        store.migrate().await?;
        Arc::new(store)
    };

    let kv = Arc::new(MemoryKv::new());
    let observer = Arc::new(TracingObserver);

    let mut cred_config = CredentialConfig::new(config.security.signing_key.clone());
    cred_config.access_ttl = chrono::Duration::from_std(config.security.access_ttl)?;
    cred_config.refresh_ttl = chrono::Duration::from_std(config.security.refresh_ttl)?;
    let credentials = Arc::new(CredentialService::new(cred_config, sessions.clone()));

    let engine = Arc::new(AuthzEngine::with_defaults().await);
    let limiter = Arc::new(RateLimiter::new(config.rate));
    let factory = RetrieverFactory::with_static_defaults();

    // Bind both listeners before wiring the proxy URL, so an ephemeral
    // tools port is still discoverable.
    let gateway_listener = tokio::net::TcpListener::bind(&config.gateway_bind).await?;
    let gateway_addr = gateway_listener.local_addr()?;
    let tools_listener = tokio::net::TcpListener::bind(&config.tools_bind).await?;
    let tools_addr = tools_listener.local_addr()?;

    if std::env::var("TOOL_SERVER_URL").is_err() {
        config.tool_server_url = format!("http://{tools_addr}");
    }
    let config = Arc::new(config);

    let tool_app = quarry_tools::router(
        config.clone(),
        quarry_tools::ToolServices {
            credentials: credentials.clone(),
            engine: engine.clone(),
            limiter: limiter.clone(),
            observer: observer.clone(),
            factory,
            kv,
        },
    );

    let gateway_state = quarry_gateway::AppState {
        config: config.clone(),
        directory,
        sessions,
        credentials,
        engine,
        http: reqwest::Client::new(),
    };
    let gateway_app = quarry_gateway::router(gateway_state);

    println!(
        "{}",
        serde_json::json!({"gatewayPort": gateway_addr.port(), "toolsPort": tools_addr.port()})
    );
    info!(addr = %gateway_addr, "gateway listening");
    info!(addr = %tools_addr, "tool server listening");

    let ct = CancellationToken::new();
    let tools_handle = tokio::spawn({
        let ct = ct.clone();
        async move {
            axum::serve(tools_listener, tool_app)
                .with_graceful_shutdown(async move { ct.cancelled().await })
                .await
        }
    });

    let gateway_ct = ct.clone();
    let gateway_result = axum::serve(gateway_listener, gateway_app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = gateway_ct.cancelled() => {}
            }
        })
        .await;

    // When the gateway exits, take the tool server down too.
    ct.cancel();
    let _ = tools_handle.await;

    gateway_result?;
    Ok(())
}
