//! blr-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, resolves config,
//! picks the log store, starts the heartbeat monitor, wires middleware, and
//! starts the HTTP/WebSocket server.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use blr_daemon::{config::RelayConfig, heartbeat, routes, state};
use blr_db::{LogStore, MemLogStore, PgLogStore};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config = RelayConfig::from_env().context("invalid relay configuration")?;
    let store = open_store(&config).await?;

    let shared = Arc::new(state::AppState::new(store, &config));
    let heartbeat_task =
        heartbeat::spawn_heartbeat(shared.sessions.clone(), config.heartbeat_interval);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    info!(
        poll_ms = config.poll_interval.as_millis() as u64,
        heartbeat_ms = config.heartbeat_interval.as_millis() as u64,
        "blr-daemon listening on http://{}",
        config.bind_addr
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    heartbeat_task.abort();
    info!("blr-daemon stopped");
    Ok(())
}

async fn open_store(config: &RelayConfig) -> anyhow::Result<Arc<dyn LogStore>> {
    match &config.database_url {
        Some(url) => {
            let pool = blr_db::connect(url).await?;
            blr_db::migrate(&pool).await?;
            info!("log store: postgres");
            Ok(Arc::new(PgLogStore::new(pool)))
        }
        None => {
            warn!(
                "{} not set; using in-memory log store (entries are lost on restart)",
                blr_db::ENV_DB_URL
            );
            Ok(Arc::new(MemLogStore::new()))
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
