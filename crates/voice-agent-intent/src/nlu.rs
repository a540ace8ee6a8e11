//! Intent extraction engine interface and selector registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use voice_agent_core::types::{Intent, NluEngine};

use crate::error::NluError;

/// An intent extraction engine: `extract` runs the model, `process`
/// normalizes its raw output.
pub trait IntentEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Raw engine output for `text`. Blocking.
    fn extract(&self, text: &str) -> Result<Value, NluError>;

    /// Intent and ordered slots, or `None` when no intent was found.
    fn process(&self, raw: &Value) -> Option<Intent>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextOutcome {
    Recognized(Intent),
    TextNotRecognized,
    IntentNotRecognized,
    ModelNotSupported,
    Failed(String),
}

#[derive(Default)]
pub struct NluRegistry {
    engines: HashMap<NluEngine, Arc<dyn IntentEngine>>,
}

impl NluRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, selector: NluEngine, engine: Arc<dyn IntentEngine>) {
        self.engines.insert(selector, engine);
    }

    pub fn get(&self, selector: NluEngine) -> Option<&Arc<dyn IntentEngine>> {
        self.engines.get(&selector)
    }

    pub fn selectors(&self) -> Vec<NluEngine> {
        self.engines.keys().copied().collect()
    }

    /// Extract an intent from `text` with the selected engine.
    pub fn interpret(&self, req_id: &str, selector: NluEngine, text: &str) -> TextOutcome {
        let text = text.trim();
        if text.is_empty() {
            return TextOutcome::TextNotRecognized;
        }
        let Some(engine) = self.get(selector) else {
            warn!(req_id, nlu = selector.as_str(), "nlu engine not configured");
            return TextOutcome::ModelNotSupported;
        };

        let raw = match engine.extract(text) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(req_id, nlu = engine.name(), error = %e, "intent extraction failed");
                return TextOutcome::Failed(e.to_string());
            }
        };

        match engine.process(&raw) {
            Some(intent) if !intent.name.is_empty() => {
                debug!(req_id, nlu = engine.name(), intent = %intent.name, slots = intent.slots.len(), "intent extracted");
                TextOutcome::Recognized(intent)
            }
            _ => {
                debug!(req_id, nlu = engine.name(), "no intent recognized");
                TextOutcome::IntentNotRecognized
            }
        }
    }
}
