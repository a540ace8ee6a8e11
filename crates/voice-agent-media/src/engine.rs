//! Local speech recognition engines.
//!
//! A [`LocalEngine`] creates one stateful [`LocalRecognizer`] per utterance
//! or wake word stream. [`CommandEngine`] drives any offline recognizer that
//! can be invoked as `program args... <file.wav>` and prints the transcript.

use std::io::Write;
use std::process::Command;

use tracing::{debug, trace};

use voice_agent_core::config::LocalEngineConfig;

use crate::audio::pcm_to_wav;
use crate::error::{MediaError, Result};

/// Placeholder in engine arguments replaced by the WAV file path.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Stateful recognizer for one utterance.
pub trait LocalRecognizer: Send {
    /// Feed audio. Returns `true` when enough audio arrived for a decode.
    fn accept_waveform(&mut self, pcm: &[i16]) -> Result<bool>;

    /// Transcript of the most recent decode.
    fn partial_result(&mut self) -> Result<String>;

    /// Decode everything fed so far and return the transcript.
    fn final_result(&mut self) -> Result<String>;

    /// Drop buffered audio and decode state.
    fn reset(&mut self);
}

pub trait LocalEngine: Send + Sync {
    fn name(&self) -> &str;

    fn new_recognizer(&self, sample_rate: u32) -> Result<Box<dyn LocalRecognizer>>;
}

/// Engine backed by an external recognizer command.
pub struct CommandEngine {
    name: String,
    program: String,
    args: Vec<String>,
    window_secs: f32,
}

impl CommandEngine {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            window_secs: 2.0,
        }
    }

    pub fn from_config(name: impl Into<String>, config: &LocalEngineConfig) -> Self {
        let mut engine = Self::new(name, config.program.clone(), config.args.clone());
        if let Some(w) = config.window_secs.filter(|w| *w > 0.0) {
            engine.window_secs = w;
        }
        engine
    }

    pub fn with_window_secs(mut self, window_secs: f32) -> Self {
        self.window_secs = window_secs;
        self
    }
}

impl LocalEngine for CommandEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn new_recognizer(&self, sample_rate: u32) -> Result<Box<dyn LocalRecognizer>> {
        let window = (self.window_secs * sample_rate as f32) as usize;
        Ok(Box::new(CommandRecognizer {
            program: self.program.clone(),
            args: self.args.clone(),
            sample_rate,
            window: window.max(1),
            buffer: Vec::new(),
            undecoded: 0,
            last_text: String::new(),
        }))
    }
}

struct CommandRecognizer {
    program: String,
    args: Vec<String>,
    sample_rate: u32,
    window: usize,
    buffer: Vec<i16>,
    /// Samples fed since the last decode.
    undecoded: usize,
    last_text: String,
}

impl CommandRecognizer {
    fn decode(&mut self) -> Result<String> {
        let mut file = tempfile::Builder::new()
            .prefix("voice-agent-")
            .suffix(".wav")
            .tempfile()?;
        file.write_all(&pcm_to_wav(&self.buffer, self.sample_rate, 1, 16))?;
        file.flush()?;
        let path = file.path().to_string_lossy().into_owned();

        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(INPUT_PLACEHOLDER, &path))
            .collect();
        if !self.args.iter().any(|a| a.contains(INPUT_PLACEHOLDER)) {
            args.push(path.clone());
        }

        trace!(program = %self.program, samples = self.buffer.len(), "decoding");
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| MediaError::Engine(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::Engine(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(program = %self.program, chars = text.len(), "decode finished");
        self.undecoded = 0;
        self.last_text = text.clone();
        Ok(text)
    }
}

impl LocalRecognizer for CommandRecognizer {
    fn accept_waveform(&mut self, pcm: &[i16]) -> Result<bool> {
        self.buffer.extend_from_slice(pcm);
        self.undecoded += pcm.len();
        if self.undecoded >= self.window {
            self.decode()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn partial_result(&mut self) -> Result<String> {
        Ok(self.last_text.clone())
    }

    fn final_result(&mut self) -> Result<String> {
        if self.buffer.is_empty() {
            return Ok(String::new());
        }
        if self.undecoded == 0 {
            return Ok(self.last_text.clone());
        }
        self.decode()
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.undecoded = 0;
        self.last_text.clear();
    }
}
