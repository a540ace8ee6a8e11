//! Gateway method handlers.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};

use voice_agent_core::protocol::{
    CancelParams, EVENT_WAKE_WORD, ErrorShape, ExecuteParams, GatewayFrame, RecognizeTextParams,
    RecognizeVoiceParams, SERVICE_VERSION, StatusResult, WakeWordStatus,
};
use voice_agent_core::short_id;
use voice_agent_media::wake_word::{WakeWordDetector, WakeWordEnd};

use crate::state::GatewayState;
use crate::voice;

/// Poll interval of the wake word stream.
const WAKE_WORD_POLL: Duration = Duration::from_millis(500);

/// Dispatch a method request and return the response frame.
pub async fn dispatch_method(
    state: &Arc<GatewayState>,
    conn_id: &str,
    request_id: &str,
    method: &str,
    params: Option<serde_json::Value>,
) -> GatewayFrame {
    let req_id = short_id(8);
    debug!(req_id = %req_id, method, request_id, "Dispatching method");

    match method {
        "check_status" => handle_check_status(state, request_id),
        "detect_wake_word" => handle_detect_wake_word(state, conn_id, request_id, &req_id).await,
        "detect_wake_word.cancel" => handle_cancel_wake_word(state, conn_id, request_id, params),
        "recognize_voice" => handle_recognize_voice(state, request_id, &req_id, params).await,
        "recognize_text" => handle_recognize_text(state, request_id, &req_id, params).await,
        "execute_command" => handle_execute_command(state, request_id, &req_id, params).await,
        _ => error_response(
            request_id,
            "method_not_found",
            &format!("Unknown method: {method}"),
        ),
    }
}

fn parse_params<T: DeserializeOwned>(
    request_id: &str,
    params: Option<serde_json::Value>,
) -> Result<T, GatewayFrame> {
    serde_json::from_value(params.unwrap_or_default())
        .map_err(|e| error_response(request_id, "invalid_params", &e.to_string()))
}

fn handle_check_status(state: &Arc<GatewayState>, request_id: &str) -> GatewayFrame {
    let status = StatusResult {
        version: SERVICE_VERSION.to_string(),
        up: true,
        wake_word: state.config.wake_word(),
    };
    to_response(request_id, &status)
}

/// Stream `wake_word.status` events until detection, cancellation or
/// disconnect; the response closes the stream.
async fn handle_detect_wake_word(
    state: &Arc<GatewayState>,
    conn_id: &str,
    request_id: &str,
    req_id: &str,
) -> GatewayFrame {
    let Some(event_tx) = state.event_sender(conn_id).await else {
        return error_response(request_id, "not_found", "Connection not found");
    };
    let cancel = state.register_wake_stream(conn_id, request_id);
    info!(req_id, request_id, "wake word stream opened");

    let worker_state = state.clone();
    let stream_id = request_id.to_string();
    let outcome = tokio::task::spawn_blocking(move || {
        let wake_word = worker_state.config.wake_word();
        let detector = WakeWordDetector {
            pipeline: worker_state.pipeline.as_ref(),
            registry: worker_state.transcriber.registry(),
            engine: worker_state.config.default_stt_engine(),
            wake_word: &wake_word,
            poll: WAKE_WORD_POLL,
        };
        let mut seq = 0u64;
        detector.run(&cancel, |detected| {
            seq += 1;
            let frame = GatewayFrame::Event {
                event: EVENT_WAKE_WORD.into(),
                id: Some(stream_id.clone()),
                payload: serde_json::to_value(WakeWordStatus { detected }).ok(),
                seq: Some(seq),
            };
            serde_json::to_string(&frame)
                .map(|msg| event_tx.send(msg).is_ok())
                .unwrap_or(false)
        })
    })
    .await;
    state.finish_wake_stream(conn_id, request_id);

    match outcome {
        Ok(Ok(end)) => {
            let ended = match end {
                WakeWordEnd::Detected => "detected",
                WakeWordEnd::Cancelled => "cancelled",
                WakeWordEnd::Abandoned => "abandoned",
            };
            info!(req_id, request_id, ended, "wake word stream closed");
            ok_response(request_id, json!({ "ended": ended }))
        }
        Ok(Err(e)) => {
            warn!(req_id, error = %e, "wake word detection failed");
            error_response(request_id, "recording_error", &e.to_string())
        }
        Err(e) => error_response(request_id, "internal_error", &e.to_string()),
    }
}

fn handle_cancel_wake_word(
    state: &Arc<GatewayState>,
    conn_id: &str,
    request_id: &str,
    params: Option<serde_json::Value>,
) -> GatewayFrame {
    let params: CancelParams = match parse_params(request_id, params) {
        Ok(p) => p,
        Err(frame) => return frame,
    };
    let cancelled = state.cancel_wake_stream(conn_id, &params.id);
    ok_response(request_id, json!({ "cancelled": cancelled }))
}

async fn handle_recognize_voice(
    state: &Arc<GatewayState>,
    request_id: &str,
    req_id: &str,
    params: Option<serde_json::Value>,
) -> GatewayFrame {
    let params: RecognizeVoiceParams = match parse_params(request_id, params) {
        Ok(p) => p,
        Err(frame) => return frame,
    };
    let state = state.clone();
    let req_id = req_id.to_string();
    let task = move || voice::recognize_voice(&state, &req_id, &params);
    match tokio::task::spawn_blocking(task).await {
        Ok(result) => to_response(request_id, &result),
        Err(e) => error_response(request_id, "internal_error", &e.to_string()),
    }
}

async fn handle_recognize_text(
    state: &Arc<GatewayState>,
    request_id: &str,
    req_id: &str,
    params: Option<serde_json::Value>,
) -> GatewayFrame {
    let params: RecognizeTextParams = match parse_params(request_id, params) {
        Ok(p) => p,
        Err(frame) => return frame,
    };
    let state = state.clone();
    let req_id = req_id.to_string();
    match tokio::task::spawn_blocking(move || {
        voice::interpret(&state, &req_id, &params.text, params.nlu_engine)
    })
    .await
    {
        Ok(result) => to_response(request_id, &result),
        Err(e) => error_response(request_id, "internal_error", &e.to_string()),
    }
}

async fn handle_execute_command(
    state: &Arc<GatewayState>,
    request_id: &str,
    req_id: &str,
    params: Option<serde_json::Value>,
) -> GatewayFrame {
    let params: ExecuteParams = match parse_params(request_id, params) {
        Ok(p) => p,
        Err(frame) => return frame,
    };
    let executor = state.executor.clone();
    let req_id = req_id.to_string();
    match tokio::task::spawn_blocking(move || {
        executor.execute(&req_id, &params.intent, &params.slots)
    })
    .await
    {
        Ok(result) => to_response(request_id, &result),
        Err(e) => error_response(request_id, "internal_error", &e.to_string()),
    }
}

fn to_response<T: serde::Serialize>(id: &str, payload: &T) -> GatewayFrame {
    match serde_json::to_value(payload) {
        Ok(value) => ok_response(id, value),
        Err(e) => error_response(id, "internal_error", &e.to_string()),
    }
}

fn ok_response(id: &str, payload: serde_json::Value) -> GatewayFrame {
    GatewayFrame::Response {
        id: id.to_string(),
        ok: true,
        payload: Some(payload),
        error: None,
    }
}

pub(crate) fn error_response(id: &str, code: &str, message: &str) -> GatewayFrame {
    GatewayFrame::Response {
        id: id.to_string(),
        ok: false,
        payload: None,
        error: Some(ErrorShape {
            code: code.to_string(),
            message: message.to_string(),
            details: None,
        }),
    }
}
