//! Recording pipeline: a capture process whose stdout is raw PCM.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::audio::{Recording, samples_from_le_bytes};
use crate::error::{MediaError, Result};
use crate::lock;

/// One recording in progress.
pub trait Recorder: Send {
    fn start(&mut self) -> Result<()>;

    /// Samples captured since the previous call. Chunks taken here are
    /// still part of the final recording.
    fn take_chunk(&mut self) -> Vec<i16>;

    /// Send end-of-stream, stop capturing and return everything captured.
    fn stop(&mut self) -> Result<Recording>;
}

/// Source of recorders, one per utterance or wake word stream.
pub trait RecordingPipeline: Send + Sync {
    fn open(&self) -> Box<dyn Recorder>;

    fn sample_rate(&self) -> u32;
}

/// Pipeline that spawns an external capture command (e.g. `arecord`).
pub struct CommandPipeline {
    command: Vec<String>,
    sample_rate: u32,
    channels: u16,
}

impl CommandPipeline {
    pub fn new(command: Vec<String>, sample_rate: u32, channels: u16) -> Self {
        Self {
            command,
            sample_rate,
            channels,
        }
    }
}

impl RecordingPipeline for CommandPipeline {
    fn open(&self) -> Box<dyn Recorder> {
        Box::new(CommandRecorder {
            command: self.command.clone(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            child: None,
            reader: None,
            captured: Arc::new(Mutex::new(Captured::default())),
            stopped: false,
        })
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[derive(Default)]
struct Captured {
    samples: Vec<i16>,
    cursor: usize,
}

pub struct CommandRecorder {
    command: Vec<String>,
    sample_rate: u32,
    channels: u16,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    captured: Arc<Mutex<Captured>>,
    stopped: bool,
}

impl Recorder for CommandRecorder {
    fn start(&mut self) -> Result<()> {
        if self.child.is_some() || self.stopped {
            return Err(MediaError::Capture("recorder already used".into()));
        }
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| MediaError::Capture("empty capture command".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| MediaError::Capture(format!("failed to spawn {program}: {e}")))?;

        let Some(mut stdout) = child.stdout.take() else {
            reap(&mut child);
            return Err(MediaError::Capture("capture command has no stdout".into()));
        };
        let captured = self.captured.clone();

        let spawned = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let mut buf = [0u8; 4096];
                let mut carry: Option<u8> = None;
                loop {
                    match stdout.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            let mut bytes = Vec::with_capacity(n + 1);
                            bytes.extend(carry.take());
                            bytes.extend_from_slice(&buf[..n]);
                            if bytes.len() % 2 == 1 {
                                carry = bytes.pop();
                            }
                            lock(&captured)
                                .samples
                                .extend(samples_from_le_bytes(&bytes));
                        }
                        Err(e) => {
                            warn!(error = %e, "audio capture read failed");
                            break;
                        }
                    }
                }
            });
        let reader = match spawned {
            Ok(reader) => reader,
            Err(e) => {
                reap(&mut child);
                return Err(e.into());
            }
        };

        debug!(program = %program, "audio capture started");
        self.child = Some(child);
        self.reader = Some(reader);
        Ok(())
    }

    fn take_chunk(&mut self) -> Vec<i16> {
        let mut captured = lock(&self.captured);
        let chunk = captured.samples[captured.cursor..].to_vec();
        captured.cursor = captured.samples.len();
        chunk
    }

    fn stop(&mut self) -> Result<Recording> {
        let Some(mut child) = self.child.take() else {
            return Err(MediaError::Capture("recorder not running".into()));
        };
        self.stopped = true;

        // EOS: terminate the capture process, then drain its pipe.
        if let Err(e) = child.kill() {
            debug!(error = %e, "capture process already exited");
        }
        let _ = child.wait();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }

        let samples = std::mem::take(&mut lock(&self.captured).samples);
        debug!(samples = samples.len(), "audio capture stopped");
        Ok(Recording::new(samples, self.sample_rate, self.channels))
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            reap(&mut child);
        }
    }
}

/// Kill a capture process that will never be stopped normally.
fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn test_command_recorder_captures_stdout() {
        // Four bytes = two samples: 1 and -1.
        let pipeline =
            CommandPipeline::new(sh(r"printf '\001\000\377\377'; exec sleep 5"), 16000, 1);
        let mut rec = pipeline.open();
        rec.start().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(300));
        assert_eq!(rec.take_chunk(), vec![1, -1]);
        assert!(rec.take_chunk().is_empty());

        let recording = rec.stop().unwrap();
        assert_eq!(recording.pcm, vec![1, -1]);
        assert_eq!(recording.sample_rate, 16000);
    }

    #[test]
    fn test_stop_twice_is_error() {
        let pipeline = CommandPipeline::new(sh("exec sleep 5"), 16000, 1);
        let mut rec = pipeline.open();
        rec.start().unwrap();
        assert!(rec.stop().unwrap().is_empty());
        assert!(matches!(rec.stop(), Err(MediaError::Capture(_))));
        assert!(rec.start().is_err());
    }

    #[test]
    fn test_reap_kills_orphaned_capture() {
        let mut child = Command::new("sh")
            .args(["-c", "exec sleep 5"])
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        assert!(child.try_wait().unwrap().is_none());
        reap(&mut child);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_missing_program() {
        let pipeline = CommandPipeline::new(vec!["/nonexistent/arecord".into()], 16000, 1);
        let mut rec = pipeline.open();
        assert!(matches!(rec.start(), Err(MediaError::Capture(_))));
    }
}
