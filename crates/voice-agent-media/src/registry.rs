//! Registry of live local recognizers.
//!
//! Each recognizer is bound to a fresh id on `create` and released exactly
//! once by `cleanup`; any use of an id after cleanup is an error. The map
//! lock only guards insert/lookup/remove; feeding and decoding take the
//! per-recognizer lock so distinct ids never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use voice_agent_core::types::SttEngine;

use crate::audio::Recording;
use crate::engine::{LocalEngine, LocalRecognizer};
use crate::error::{MediaError, Result};
use crate::lock;

/// Mutually exclusive classification of a recognition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    Transcript(String),
    NoAudio,
    NotRecognized,
}

struct Entry {
    engine: SttEngine,
    created_at: DateTime<Utc>,
    recognizer: Arc<Mutex<Box<dyn LocalRecognizer>>>,
}

pub struct RecognizerRegistry {
    engines: HashMap<SttEngine, Arc<dyn LocalEngine>>,
    default_engine: SttEngine,
    sample_rate: u32,
    active: Mutex<HashMap<String, Entry>>,
}

impl RecognizerRegistry {
    pub fn new(default_engine: SttEngine, sample_rate: u32) -> Self {
        Self {
            engines: HashMap::new(),
            default_engine,
            sample_rate,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_engine(mut self, key: SttEngine, engine: Arc<dyn LocalEngine>) -> Self {
        self.engines.insert(key, engine);
        self
    }

    pub fn has_engine(&self, key: SttEngine) -> bool {
        self.engines.contains_key(&key)
    }

    /// Pick the requested engine, or the default when it is not configured.
    fn resolve(&self, requested: SttEngine) -> Result<(SttEngine, &Arc<dyn LocalEngine>)> {
        if let Some(engine) = self.engines.get(&requested) {
            return Ok((requested, engine));
        }
        let engine = self
            .engines
            .get(&self.default_engine)
            .ok_or_else(|| MediaError::NoEngine(requested.as_str().to_string()))?;
        warn!(
            requested = requested.as_str(),
            fallback = self.default_engine.as_str(),
            "stt engine not configured, using default"
        );
        Ok((self.default_engine, engine))
    }

    /// Allocate a recognizer bound to a fresh id.
    pub fn create(&self, requested: SttEngine) -> Result<String> {
        let (key, engine) = self.resolve(requested)?;
        let recognizer = engine.new_recognizer(self.sample_rate)?;
        let id = voice_agent_core::short_id(16);
        lock(&self.active).insert(
            id.clone(),
            Entry {
                engine: key,
                created_at: Utc::now(),
                recognizer: Arc::new(Mutex::new(recognizer)),
            },
        );
        debug!(recognizer_id = %id, engine = engine.name(), "recognizer created");
        Ok(id)
    }

    fn get(&self, id: &str) -> Result<Arc<Mutex<Box<dyn LocalRecognizer>>>> {
        lock(&self.active)
            .get(id)
            .map(|e| e.recognizer.clone())
            .ok_or_else(|| MediaError::UnknownRecognizer(id.to_string()))
    }

    /// Feed streamed audio. Returns `true` when a decode happened.
    pub fn accept(&self, id: &str, pcm: &[i16]) -> Result<bool> {
        let recognizer = self.get(id)?;
        let mut rec = lock(&recognizer);
        rec.accept_waveform(pcm)
    }

    pub fn partial(&self, id: &str) -> Result<String> {
        let recognizer = self.get(id)?;
        let mut rec = lock(&recognizer);
        rec.partial_result()
    }

    pub fn reset(&self, id: &str) -> Result<()> {
        let recognizer = self.get(id)?;
        lock(&recognizer).reset();
        Ok(())
    }

    /// Run a complete recording through the recognizer and classify it.
    pub fn recognize(&self, id: &str, recording: &Recording) -> Result<RecognitionOutcome> {
        let recognizer = self.get(id)?;
        if recording.is_empty() {
            return Ok(RecognitionOutcome::NoAudio);
        }
        let mut rec = lock(&recognizer);
        rec.accept_waveform(&recording.pcm)?;
        let text = rec.final_result()?;
        let text = text.trim();
        if text.is_empty() {
            Ok(RecognitionOutcome::NotRecognized)
        } else {
            Ok(RecognitionOutcome::Transcript(text.to_string()))
        }
    }

    /// Release the recognizer. A second cleanup of the same id is an error.
    pub fn cleanup(&self, id: &str) -> Result<()> {
        let entry = lock(&self.active)
            .remove(id)
            .ok_or_else(|| MediaError::UnknownRecognizer(id.to_string()))?;
        let age_ms = (Utc::now() - entry.created_at).num_milliseconds();
        debug!(
            recognizer_id = %id,
            engine = entry.engine.as_str(),
            age_ms,
            "recognizer released"
        );
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }

    pub fn is_active(&self, id: &str) -> bool {
        lock(&self.active).contains_key(id)
    }

    /// Engine a live recognizer was created with.
    pub fn engine_of(&self, id: &str) -> Option<SttEngine> {
        lock(&self.active).get(id).map(|e| e.engine)
    }
}
