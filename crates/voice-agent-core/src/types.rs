//! Domain types shared by the recognition and execution paths.

use serde::{Deserialize, Serialize};

/// Intent name that is routed to the media backend instead of the signal bus.
pub const MEDIA_CONTROL_INTENT: &str = "MediaControl";

/// Slot carrying the requested media action for [`MEDIA_CONTROL_INTENT`].
pub const MEDIA_ACTION_SLOT: &str = "media_control_action";

/// Named parameter attached to an intent (e.g. `action=increase`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub name: String,
    pub value: String,
}

impl Slot {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Normalized command category with its ordered slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    #[serde(default)]
    pub slots: Vec<Slot>,
}

impl Intent {
    pub fn new(name: impl Into<String>, slots: Vec<Slot>) -> Self {
        Self {
            name: name.into(),
            slots,
        }
    }

    /// Value of the first slot with the given name.
    pub fn slot(&self, name: &str) -> Option<&str> {
        slot_value(&self.slots, name)
    }
}

/// Value of the first slot named `name` in `slots`.
pub fn slot_value<'a>(slots: &'a [Slot], name: &str) -> Option<&'a str> {
    slots
        .iter()
        .find(|s| s.name == name)
        .map(|s| s.value.as_str())
}

/// Recording control action of a two-phase voice request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordAction {
    Start,
    Stop,
}

/// How the end of a voice command is determined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordMode {
    /// The client sends an explicit STOP.
    #[default]
    Manual,
    /// The server stops when voice activity ends.
    Auto,
}

/// Local speech-to-text engine profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SttEngine {
    #[default]
    #[serde(alias = "VOSK")]
    Vosk,
    #[serde(alias = "WHISPER")]
    Whisper,
}

impl SttEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vosk => "vosk",
            Self::Whisper => "whisper",
        }
    }
}

/// Whether the remote recognizer may be used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnlineMode {
    Online,
    #[default]
    Offline,
}

/// Intent extraction engine selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NluEngine {
    #[default]
    #[serde(alias = "SNIPS")]
    Snips,
    #[serde(alias = "RASA")]
    Rasa,
}

impl NluEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snips => "snips",
            Self::Rasa => "rasa",
        }
    }
}

/// Status of a recognition call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecognizeStatus {
    Error,
    Success,
    Processing,
    VoiceNotRecognized,
    IntentNotRecognized,
    TextNotRecognized,
    NluModelNotSupported,
}

/// Status of an execution call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecuteStatus {
    Error,
    Success,
    BusConnError,
    IntentNotSupported,
    SlotsIncomplete,
}

/// Kind of a planned signal action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Set,
    Adjust,
}

/// What an action writes: a value known at plan time, or a signed factor
/// applied to the value currently on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Value(String),
    Factor(i64),
}

/// One step of an execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionAction {
    pub kind: ActionKind,
    pub path: String,
    pub operand: Operand,
}

impl ExecutionAction {
    pub fn set(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Set,
            path: path.into(),
            operand: Operand::Value(value.into()),
        }
    }

    pub fn adjust_to(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Adjust,
            path: path.into(),
            operand: Operand::Value(value.into()),
        }
    }

    pub fn adjust_by(path: impl Into<String>, factor: i64) -> Self {
        Self {
            kind: ActionKind::Adjust,
            path: path.into(),
            operand: Operand::Factor(factor),
        }
    }
}

/// Outcome of one `execute_command` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub message: String,
    pub status: ExecuteStatus,
}

impl ExecutionResult {
    pub fn new(status: ExecuteStatus, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecuteStatus::Success
    }
}
