//! Voice agent wire protocol.
//!
//! All RPC traffic uses JSON-over-WebSocket with three frame types:
//! Request, Response, and Event. Server streams (wake word detection)
//! are delivered as events carrying the id of the request that opened them.

use serde::{Deserialize, Serialize};

use crate::types::{
    NluEngine, OnlineMode, RecognizeStatus, RecordAction, RecordMode, Slot, SttEngine,
};

/// Protocol version implemented by this service.
pub const PROTOCOL_VERSION: u32 = 1;

/// Service version reported by `check_status` and `/health`.
pub const SERVICE_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

/// Event emitted for every wake word poll.
pub const EVENT_WAKE_WORD: &str = "wake_word.status";

/// A wire frame: the top-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayFrame {
    /// Client -> Server request.
    #[serde(rename = "req")]
    Request {
        id: String,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<serde_json::Value>,
    },

    /// Server -> Client response.
    #[serde(rename = "res")]
    Response {
        id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorShape>,
    },

    /// Server -> Client stream item.
    #[serde(rename = "event")]
    Event {
        event: String,
        /// Id of the request this event belongs to.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
}

/// Error shape returned in response frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResult {
    pub version: String,
    pub up: bool,
    pub wake_word: String,
}

/// One item of the wake word stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeWordStatus {
    pub detected: bool,
}

/// Parameters of `detect_wake_word.cancel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelParams {
    /// Id of the `detect_wake_word` request to cancel.
    pub id: String,
}

/// Parameters of one `recognize_voice` control message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizeVoiceParams {
    pub action: RecordAction,
    #[serde(default)]
    pub record_mode: RecordMode,
    #[serde(default)]
    pub stt_engine: SttEngine,
    #[serde(default)]
    pub online_mode: OnlineMode,
    #[serde(default)]
    pub nlu_engine: NluEngine,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizeTextParams {
    pub text: String,
    #[serde(default)]
    pub nlu_engine: NluEngine,
}

/// Result of a voice or text recognition call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognizeResult {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub slots: Vec<Slot>,
    #[serde(default)]
    pub session_id: String,
    pub status: RecognizeStatus,
}

impl RecognizeResult {
    pub fn status(status: RecognizeStatus) -> Self {
        Self {
            transcript: String::new(),
            intent: String::new(),
            slots: Vec::new(),
            session_id: String::new(),
            status,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = transcript.into();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteParams {
    pub intent: String,
    #[serde(default)]
    pub slots: Vec<Slot>,
}
