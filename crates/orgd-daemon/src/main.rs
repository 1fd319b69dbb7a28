//! orgd entry point.
//!
//! This file is intentionally thin: it sets up tracing, connects the
//! database pool, builds the shared state, wires middleware, and runs the
//! HTTP server until shutdown. All route handlers live in `routes.rs`; all
//! shared state types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use orgd_daemon::{routes, state};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let pool = orgd_db::connect_from_env().await?;
    orgd_db::migrate(&pool).await?;

    let shared = Arc::new(state::AppState::new(pool));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 10321)));
    info!("orgd listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&shared)))
        .await
        .context("server crashed")?;

    // The listener is gone; drain once more so a subscription that raced in
    // during shutdown does not outlive the server.
    shared.registry.drain();
    info!("orgd stopped");

    Ok(())
}

async fn shutdown_signal(shared: Arc<state::AppState>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested; draining in-flight calls");
    // Request every streaming subscription to finish before the join: the
    // update streams never complete on their own, and the join waits for
    // all open connections.
    shared.registry.drain();
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("ORGD_ADDR").ok()?.parse().ok()
}

/// CORS: allow only localhost origins (the desktop client's webview).
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:1420",
        "http://127.0.0.1:1420",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}
