//! Media pipeline: audio capture, speech recognition with fallback,
//! VAD, wake word detection, and media playback control.

pub mod audio;
pub mod engine;
pub mod error;
pub mod playback;
pub mod recorder;
pub mod registry;
pub mod remote;
pub mod transcriber;
pub mod vad;
pub mod wake_word;

pub use audio::Recording;
pub use error::MediaError;
pub use registry::{RecognitionOutcome, RecognizerRegistry};
pub use transcriber::{EngineUsed, Transcriber, Transcription};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
