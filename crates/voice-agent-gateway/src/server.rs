//! Axum-based WebSocket server.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use voice_agent_core::protocol::SERVICE_VERSION;

use crate::connection::handle_ws_connection;
use crate::state::GatewayState;

/// Start the gateway server on `port`, with the background session reaper
/// and an initial signal bus connection attempt.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state.config.bind();

    let bus_state = state.clone();
    tokio::task::spawn_blocking(move || {
        if bus_state.executor.bridge().connect() {
            info!("Connected to signal bus");
        } else {
            warn!("Signal bus unavailable; will retry on the next command");
        }
    });

    let reaper = tokio::spawn(reap_sessions(
        state.clone(),
        Duration::from_secs(state.config.session_ttl_secs()),
    ));

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    reaper.abort();
    served?;

    Ok(())
}

/// Sweep at most every 30s, never faster than once a second.
fn reap_period(ttl: Duration) -> Duration {
    ttl.min(Duration::from_secs(30)).max(Duration::from_secs(1))
}

async fn reap_sessions(state: Arc<GatewayState>, ttl: Duration) {
    let mut interval = tokio::time::interval(reap_period(ttl));
    loop {
        interval.tick().await;
        let sessions = state.sessions.clone();
        match tokio::task::spawn_blocking(move || sessions.reap_expired(ttl)).await {
            Ok(0) => {}
            Ok(n) => info!(reaped = n, "Expired sessions removed"),
            Err(e) => error!(%e, "Session reaper failed"),
        }
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(state, socket))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let connections = state.connections.read().await.len();

    axum::Json(json!({
        "status": "ok",
        "version": SERVICE_VERSION,
        "connections": connections,
        "sessions": state.sessions.len(),
        "bus": state.executor.bridge().state(),
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(%e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
