//! Recognition orchestration behind `recognize_voice` and `recognize_text`.
//!
//! Everything here blocks (recording, recognition, HTTP engines) and runs
//! on the blocking pool.

use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use voice_agent_core::protocol::{RecognizeResult, RecognizeVoiceParams};
use voice_agent_core::types::{NluEngine, RecognizeStatus, RecordAction, RecordMode};
use voice_agent_intent::TextOutcome;
use voice_agent_media::Recording;
use voice_agent_media::RecognitionOutcome;
use voice_agent_media::vad::{AutoStop, VoiceActivityDetector, record_until_silence};

use crate::session::SessionError;
use crate::state::GatewayState;

pub fn recognize_voice(
    state: &GatewayState,
    req_id: &str,
    params: &RecognizeVoiceParams,
) -> RecognizeResult {
    match (params.action, params.record_mode) {
        (RecordAction::Start, RecordMode::Manual) => {
            match state.sessions.start(state.pipeline.as_ref()) {
                Ok(session_id) => {
                    debug!(req_id, session_id = %session_id, "recording until STOP");
                    RecognizeResult::status(RecognizeStatus::Processing).with_session(session_id)
                }
                Err(e) => {
                    warn!(req_id, error = %e, "failed to start recording");
                    RecognizeResult::status(RecognizeStatus::Error)
                }
            }
        }
        (RecordAction::Start, RecordMode::Auto) => {
            let session_id = Uuid::new_v4().to_string();
            match record_auto(state) {
                Ok(recording) => finish(state, req_id, &session_id, &recording, params),
                Err(e) => {
                    warn!(req_id, error = %e, "auto recording failed");
                    RecognizeResult::status(RecognizeStatus::Error).with_session(session_id)
                }
            }
        }
        (RecordAction::Stop, _) => {
            let Some(session_id) = params.session_id.as_deref().filter(|s| !s.is_empty()) else {
                warn!(req_id, "STOP without a session id");
                return RecognizeResult::status(RecognizeStatus::Error);
            };
            match state.sessions.stop(session_id) {
                Ok(recording) => finish(state, req_id, session_id, &recording, params),
                Err(SessionError::Unknown(_)) => {
                    warn!(req_id, session_id, "STOP for unknown session");
                    RecognizeResult::status(RecognizeStatus::Error).with_session(session_id)
                }
                Err(e) => {
                    warn!(req_id, session_id, error = %e, "failed to stop recording");
                    RecognizeResult::status(RecognizeStatus::Error).with_session(session_id)
                }
            }
        }
    }
}

fn record_auto(state: &GatewayState) -> voice_agent_media::error::Result<Recording> {
    let config = &state.config;
    let mut vad = VoiceActivityDetector::new(
        f64::from(config.vad_threshold()),
        config.vad_silence_frames() as usize,
    );
    let bounds = AutoStop::new(
        state.pipeline.sample_rate(),
        Duration::from_secs(config.auto_max_secs()),
    );
    let mut recorder = state.pipeline.open();
    record_until_silence(recorder.as_mut(), &mut vad, bounds)
}

/// Retain, transcribe and interpret a finished recording.
fn finish(
    state: &GatewayState,
    req_id: &str,
    session_id: &str,
    recording: &Recording,
    params: &RecognizeVoiceParams,
) -> RecognizeResult {
    if let Some(dir) = state.retention_dir() {
        let path = dir.join(format!("{session_id}.wav"));
        match recording.save_wav(&path) {
            Ok(()) => debug!(req_id, path = %path.display(), "voice command stored"),
            Err(e) => warn!(req_id, path = %path.display(), error = %e, "failed to store voice command"),
        }
    }

    let transcription =
        state
            .transcriber
            .transcribe(req_id, recording, params.stt_engine, params.online_mode);
    if let Some(recognizer_id) = transcription.needs_cleanup() {
        if let Err(e) = state.transcriber.registry().cleanup(recognizer_id) {
            warn!(req_id, recognizer_id, error = %e, "recognizer cleanup failed");
        }
    }

    let transcript = match transcription.outcome {
        RecognitionOutcome::Transcript(text) => text,
        RecognitionOutcome::NoAudio | RecognitionOutcome::NotRecognized => {
            info!(req_id, session_id, engine = ?transcription.engine, "voice not recognized");
            return RecognizeResult::status(RecognizeStatus::VoiceNotRecognized)
                .with_session(session_id);
        }
    };
    info!(req_id, session_id, engine = ?transcription.engine, transcript = %transcript, "voice recognized");

    interpret(state, req_id, &transcript, params.nlu_engine).with_session(session_id)
}

/// Extract an intent from `text` and shape the response.
pub fn interpret(
    state: &GatewayState,
    req_id: &str,
    text: &str,
    nlu_engine: NluEngine,
) -> RecognizeResult {
    let result = match state.nlu.interpret(req_id, nlu_engine, text) {
        TextOutcome::Recognized(intent) => RecognizeResult {
            intent: intent.name,
            slots: intent.slots,
            ..RecognizeResult::status(RecognizeStatus::Success)
        },
        TextOutcome::TextNotRecognized => {
            RecognizeResult::status(RecognizeStatus::TextNotRecognized)
        }
        TextOutcome::IntentNotRecognized => {
            RecognizeResult::status(RecognizeStatus::IntentNotRecognized)
        }
        TextOutcome::ModelNotSupported => {
            RecognizeResult::status(RecognizeStatus::NluModelNotSupported)
        }
        TextOutcome::Failed(_) => RecognizeResult::status(RecognizeStatus::Error),
    };
    result.with_transcript(text)
}
