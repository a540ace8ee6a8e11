//! Recognition fallback chain: remote engine first when requested, local
//! engine otherwise or when the remote yields nothing.
//!
//! The result is tagged with the engine that produced it, so the caller
//! always knows whether a local recognizer must be cleaned up.

use std::sync::Arc;

use tracing::{debug, info, warn};

use voice_agent_core::types::{OnlineMode, SttEngine};

use crate::audio::Recording;
use crate::registry::{RecognitionOutcome, RecognizerRegistry};
use crate::remote::RemoteEngine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineUsed {
    /// A local recognizer with this registry id; it must be cleaned up.
    Local(String),
    Remote,
    /// No recognizer ran (no audio, or no local engine available).
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcription {
    pub outcome: RecognitionOutcome,
    pub engine: EngineUsed,
    /// Set when recognition failed inside the engine.
    pub error: Option<String>,
}

impl Transcription {
    /// Recognizer id to release, if a local recognizer was used.
    pub fn needs_cleanup(&self) -> Option<&str> {
        match &self.engine {
            EngineUsed::Local(id) => Some(id),
            _ => None,
        }
    }

    pub fn transcript(&self) -> Option<&str> {
        match &self.outcome {
            RecognitionOutcome::Transcript(t) => Some(t),
            _ => None,
        }
    }
}

pub struct Transcriber {
    registry: Arc<RecognizerRegistry>,
    remote: Option<Arc<dyn RemoteEngine>>,
}

impl Transcriber {
    pub fn new(registry: Arc<RecognizerRegistry>, remote: Option<Arc<dyn RemoteEngine>>) -> Self {
        Self { registry, remote }
    }

    pub fn registry(&self) -> &Arc<RecognizerRegistry> {
        &self.registry
    }

    /// Transcribe a finished recording. Blocking.
    pub fn transcribe(
        &self,
        req_id: &str,
        recording: &Recording,
        engine: SttEngine,
        online: OnlineMode,
    ) -> Transcription {
        if recording.is_empty() {
            debug!(req_id, "no audio captured");
            return Transcription {
                outcome: RecognitionOutcome::NoAudio,
                engine: EngineUsed::None,
                error: None,
            };
        }

        if online == OnlineMode::Online {
            if let Some(text) = self.try_remote(req_id, recording) {
                return Transcription {
                    outcome: RecognitionOutcome::Transcript(text),
                    engine: EngineUsed::Remote,
                    error: None,
                };
            }
        }

        self.local(req_id, recording, engine)
    }

    fn try_remote(&self, req_id: &str, recording: &Recording) -> Option<String> {
        let Some(remote) = &self.remote else {
            debug!(req_id, "online mode requested but no remote engine configured");
            return None;
        };
        if !remote.is_initialized() && !remote.initialize() {
            warn!(req_id, engine = remote.name(), "remote engine unavailable, falling back to local");
            return None;
        }
        match remote.recognize(recording) {
            Some(text) => {
                info!(req_id, engine = remote.name(), "remote transcription succeeded");
                Some(text)
            }
            None => {
                warn!(req_id, engine = remote.name(), "remote engine returned no transcript, falling back to local");
                None
            }
        }
    }

    fn local(&self, req_id: &str, recording: &Recording, engine: SttEngine) -> Transcription {
        let id = match self.registry.create(engine) {
            Ok(id) => id,
            Err(e) => {
                warn!(req_id, error = %e, "no local recognizer available");
                return Transcription {
                    outcome: RecognitionOutcome::NotRecognized,
                    engine: EngineUsed::None,
                    error: Some(e.to_string()),
                };
            }
        };

        match self.registry.recognize(&id, recording) {
            Ok(outcome) => Transcription {
                outcome,
                engine: EngineUsed::Local(id),
                error: None,
            },
            Err(e) => {
                warn!(req_id, recognizer_id = %id, error = %e, "local recognition failed");
                Transcription {
                    outcome: RecognitionOutcome::NotRecognized,
                    engine: EngineUsed::Local(id),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
