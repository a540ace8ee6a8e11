//! Wake word detection loop.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voice_agent_core::types::SttEngine;

use crate::error::Result;
use crate::recorder::{Recorder, RecordingPipeline};
use crate::registry::RecognizerRegistry;

/// How the detection loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeWordEnd {
    Detected,
    Cancelled,
    /// The status sink went away (client disconnected).
    Abandoned,
}

pub struct WakeWordDetector<'a> {
    pub pipeline: &'a dyn RecordingPipeline,
    pub registry: &'a RecognizerRegistry,
    pub engine: SttEngine,
    pub wake_word: &'a str,
    /// Poll interval of the loop.
    pub poll: Duration,
}

impl WakeWordDetector<'_> {
    /// Record and decode until the wake word is heard or `cancel` fires.
    ///
    /// `emit` receives every poll's `detected` flag; returning `false` stops
    /// the loop. On cancellation the recording pipeline receives an
    /// end-of-stream before the loop exits. Blocking.
    pub fn run(
        &self,
        cancel: &CancellationToken,
        mut emit: impl FnMut(bool) -> bool,
    ) -> Result<WakeWordEnd> {
        let wake_word = self.wake_word.to_lowercase();
        let mut recorder = self.pipeline.open();
        recorder.start()?;

        let id = match self.registry.create(self.engine) {
            Ok(id) => id,
            Err(e) => {
                let _ = recorder.stop();
                return Err(e);
            }
        };
        debug!(recognizer_id = %id, wake_word = %wake_word, "wake word detection started");

        let result = self.poll_loop(&id, &wake_word, cancel, &mut emit, recorder.as_mut());

        if let Err(e) = recorder.stop() {
            debug!(error = %e, "recorder already stopped");
        }
        if let Err(e) = self.registry.cleanup(&id) {
            warn!(recognizer_id = %id, error = %e, "wake word recognizer cleanup failed");
        }
        result
    }

    fn poll_loop(
        &self,
        id: &str,
        wake_word: &str,
        cancel: &CancellationToken,
        emit: &mut impl FnMut(bool) -> bool,
        recorder: &mut dyn Recorder,
    ) -> Result<WakeWordEnd> {
        loop {
            std::thread::sleep(self.poll);
            if cancel.is_cancelled() {
                // EOS into the pipeline before terminating.
                let _ = recorder.stop();
                info!("wake word detection cancelled");
                return Ok(WakeWordEnd::Cancelled);
            }

            let chunk = recorder.take_chunk();
            let mut detected = false;
            if !chunk.is_empty() && self.registry.accept(id, &chunk)? {
                let text = self.registry.partial(id)?.to_lowercase();
                detected = text.contains(wake_word);
                if !detected {
                    self.registry.reset(id)?;
                }
            }

            if !emit(detected) {
                return Ok(WakeWordEnd::Abandoned);
            }
            if detected {
                info!("wake word detected");
                return Ok(WakeWordEnd::Detected);
            }
        }
    }
}
