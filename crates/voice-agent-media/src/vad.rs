//! Energy-based voice activity detection and AUTO-mode recording.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::audio::Recording;
use crate::error::Result;
use crate::recorder::Recorder;

/// Voice Activity Detector using RMS energy threshold on 16-bit PCM.
pub struct VoiceActivityDetector {
    threshold: f64,
    /// Consecutive silent frames before declaring speech end.
    min_silent_frames: usize,
    speech_active: bool,
    silent_count: usize,
}

impl VoiceActivityDetector {
    pub fn new(threshold: f64, min_silent_frames: usize) -> Self {
        Self {
            threshold,
            min_silent_frames,
            speech_active: false,
            silent_count: 0,
        }
    }

    /// Defaults for 20ms frames: ~300ms of silence ends an utterance.
    pub fn default_16khz() -> Self {
        Self::new(300.0, 15)
    }

    pub fn rms(samples: &[i16]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    /// Process a single audio frame.
    ///
    /// Returns:
    /// - `Some(true)`: speech just ended (utterance complete)
    /// - `Some(false)`: speech just started
    /// - `None`: no state change
    pub fn process_frame(&mut self, pcm: &[i16]) -> Option<bool> {
        let is_speech = Self::rms(pcm) > self.threshold;

        if is_speech {
            self.silent_count = 0;
            if !self.speech_active {
                self.speech_active = true;
                return Some(false);
            }
        } else if self.speech_active {
            self.silent_count += 1;
            if self.silent_count >= self.min_silent_frames {
                self.speech_active = false;
                self.silent_count = 0;
                return Some(true);
            }
        }

        None
    }

    pub fn is_active(&self) -> bool {
        self.speech_active
    }

    pub fn reset(&mut self) {
        self.speech_active = false;
        self.silent_count = 0;
    }
}

/// Bounds for an AUTO-mode recording.
#[derive(Debug, Clone, Copy)]
pub struct AutoStop {
    /// Samples per VAD frame (20ms).
    pub frame_size: usize,
    pub poll: Duration,
    pub max: Duration,
}

impl AutoStop {
    pub fn new(sample_rate: u32, max: Duration) -> Self {
        Self {
            frame_size: (sample_rate as usize / 50).max(1),
            poll: Duration::from_millis(100),
            max,
        }
    }
}

/// Record until the VAD reports end of speech or `bounds.max` elapses,
/// then stop the recorder and return the recording.
pub fn record_until_silence(
    recorder: &mut dyn Recorder,
    vad: &mut VoiceActivityDetector,
    bounds: AutoStop,
) -> Result<Recording> {
    recorder.start()?;
    let started = Instant::now();
    let mut pending: Vec<i16> = Vec::new();

    'capture: loop {
        std::thread::sleep(bounds.poll);
        pending.extend(recorder.take_chunk());

        while pending.len() >= bounds.frame_size {
            let frame: Vec<i16> = pending.drain(..bounds.frame_size).collect();
            if vad.process_frame(&frame) == Some(true) {
                debug!(elapsed_ms = started.elapsed().as_millis() as u64, "end of speech");
                break 'capture;
            }
        }

        if started.elapsed() >= bounds.max {
            debug!("auto recording hit max duration");
            break;
        }
    }

    recorder.stop()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MediaError;

    #[test]
    fn test_rms_calculation() {
        let silence = vec![0i16; 320];
        assert_eq!(VoiceActivityDetector::rms(&silence), 0.0);

        let signal = vec![100i16; 320];
        let rms = VoiceActivityDetector::rms(&signal);
        assert!((rms - 100.0).abs() < 0.01);

        assert_eq!(VoiceActivityDetector::rms(&[]), 0.0);
    }

    #[test]
    fn test_vad_transitions() {
        let mut vad = VoiceActivityDetector::new(50.0, 3);
        let silence = vec![0i16; 320];
        let speech = vec![500i16; 320];

        assert_eq!(vad.process_frame(&silence), None);
        assert_eq!(vad.process_frame(&speech), Some(false));
        assert_eq!(vad.process_frame(&speech), None);
        assert_eq!(vad.process_frame(&silence), None);
        assert_eq!(vad.process_frame(&silence), None);
        assert_eq!(vad.process_frame(&silence), Some(true));
        assert!(!vad.is_active());
    }

    #[test]
    fn test_vad_reset() {
        let mut vad = VoiceActivityDetector::new(50.0, 3);
        vad.process_frame(&[500i16; 320]);
        assert!(vad.is_active());
        vad.reset();
        assert!(!vad.is_active());
    }

    /// Replays fixed chunks, one per `take_chunk`.
    struct ScriptedRecorder {
        chunks: Vec<Vec<i16>>,
        all: Vec<i16>,
        stopped: bool,
    }

    impl Recorder for ScriptedRecorder {
        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn take_chunk(&mut self) -> Vec<i16> {
            if self.chunks.is_empty() {
                return vec![0; 320];
            }
            let chunk = self.chunks.remove(0);
            self.all.extend(&chunk);
            chunk
        }

        fn stop(&mut self) -> Result<Recording> {
            if self.stopped {
                return Err(MediaError::Capture("stopped".into()));
            }
            self.stopped = true;
            Ok(Recording::new(self.all.clone(), 16000, 1))
        }
    }

    #[test]
    fn test_record_until_silence_stops_at_speech_end() {
        let mut recorder = ScriptedRecorder {
            chunks: vec![vec![0; 320], vec![800; 640], vec![0; 960], vec![800; 320]],
            all: Vec::new(),
            stopped: false,
        };
        let mut vad = VoiceActivityDetector::new(300.0, 3);
        let bounds = AutoStop {
            frame_size: 320,
            poll: Duration::from_millis(1),
            max: Duration::from_secs(5),
        };
        let rec = record_until_silence(&mut recorder, &mut vad, bounds).unwrap();
        assert!(recorder.stopped);
        assert_eq!(rec.pcm.len(), 320 + 640 + 960);
    }

    #[test]
    fn test_record_until_silence_max_duration() {
        let mut recorder = ScriptedRecorder {
            chunks: Vec::new(),
            all: Vec::new(),
            stopped: false,
        };
        let mut vad = VoiceActivityDetector::default_16khz();
        let bounds = AutoStop {
            frame_size: 320,
            poll: Duration::from_millis(5),
            max: Duration::from_millis(30),
        };
        let rec = record_until_silence(&mut recorder, &mut vad, bounds).unwrap();
        assert!(recorder.stopped);
        assert!(rec.is_empty());
    }
}
