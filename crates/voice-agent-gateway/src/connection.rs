//! WebSocket connection lifecycle: read/write loops.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use voice_agent_core::protocol::{GatewayFrame, PROTOCOL_VERSION, SERVICE_VERSION};

use crate::methods::{dispatch_method, error_response};
use crate::state::{ConnectionState, GatewayState};

/// Handle a new WebSocket connection.
///
/// Requests are served concurrently, each on its own task; responses and
/// stream events share the connection's outbound queue.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "New WebSocket connection");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<String>();

    {
        let mut connections = state.connections.write().await;
        connections.insert(
            conn_id.clone(),
            ConnectionState {
                conn_id: conn_id.clone(),
                event_tx: event_tx.clone(),
            },
        );
    }

    let hello = GatewayFrame::Event {
        event: "hello".into(),
        id: None,
        payload: Some(serde_json::json!({
            "protocol": PROTOCOL_VERSION,
            "version": SERVICE_VERSION,
            "conn_id": conn_id,
            "methods": [
                "check_status",
                "detect_wake_word",
                "detect_wake_word.cancel",
                "recognize_voice",
                "recognize_text",
                "execute_command",
            ],
        })),
        seq: Some(0),
    };
    if let Ok(msg) = serde_json::to_string(&hello) {
        if ws_tx.send(Message::Text(msg.into())).await.is_err() {
            cleanup_connection(&state, &conn_id).await;
            return;
        }
    }

    let send_task = tokio::spawn(async move {
        while let Some(msg) = event_rx.recv().await {
            if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg_result) = ws_rx.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<GatewayFrame>(text.as_str()) {
                Ok(GatewayFrame::Request { id, method, params }) => {
                    let state = state.clone();
                    let conn_id = conn_id.clone();
                    let event_tx = event_tx.clone();
                    tokio::spawn(async move {
                        let response =
                            dispatch_method(&state, &conn_id, &id, &method, params).await;
                        if let Ok(response_json) = serde_json::to_string(&response) {
                            let _ = event_tx.send(response_json);
                        }
                    });
                }
                Ok(_) => {
                    debug!("Received non-request frame, ignoring");
                }
                Err(e) => {
                    warn!(%e, "Invalid frame received");
                    let error_frame =
                        error_response("unknown", "parse_error", &format!("Invalid frame: {e}"));
                    if let Ok(msg) = serde_json::to_string(&error_frame) {
                        let _ = event_tx.send(msg);
                    }
                }
            },
            Ok(Message::Close(_)) => {
                debug!(conn_id = %conn_id, "Client requested close");
                break;
            }
            Err(e) => {
                error!(conn_id = %conn_id, %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    send_task.abort();
    cleanup_connection(&state, &conn_id).await;
    info!(conn_id = %conn_id, "WebSocket connection closed");
}

async fn cleanup_connection(state: &Arc<GatewayState>, conn_id: &str) {
    state.cancel_connection_streams(conn_id);
    let mut connections = state.connections.write().await;
    connections.remove(conn_id);
}
