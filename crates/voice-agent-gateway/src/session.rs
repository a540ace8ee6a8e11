//! Streaming session table: correlates a START/STOP pair to the recording
//! made in between.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use voice_agent_media::Recording;
use voice_agent_media::error::MediaError;
use voice_agent_media::recorder::{Recorder, RecordingPipeline};

#[derive(Debug, Error)]
pub enum SessionError {
    /// STOP for an id that was never started or is already stopped.
    #[error("unknown session '{0}'")]
    Unknown(String),

    #[error("recording failed: {0}")]
    Recording(#[from] MediaError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Recording,
    Stopped,
}

pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
    recorder: Box<dyn Recorder>,
}

impl Session {
    fn finish(mut self) -> Result<Recording, SessionError> {
        self.state = SessionState::Stopped;
        let recording = self.recorder.stop()?;
        let age_ms = (Utc::now() - self.created_at).num_milliseconds();
        debug!(session_id = %self.id, age_ms, samples = recording.pcm.len(), "session stopped");
        Ok(recording)
    }
}

/// Open sessions keyed by id. Structural changes happen under one lock;
/// recorders are started and stopped outside it.
#[derive(Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a recorder, start it and register it under a fresh id. Blocking.
    pub fn start(&self, pipeline: &dyn RecordingPipeline) -> Result<String, SessionError> {
        let mut recorder = pipeline.open();
        recorder.start()?;

        let id = Uuid::new_v4().to_string();
        let session = Session {
            id: id.clone(),
            created_at: Utc::now(),
            state: SessionState::Recording,
            recorder,
        };
        self.table().insert(id.clone(), session);
        info!(session_id = %id, "session started");
        Ok(id)
    }

    /// Remove the session and return its finished recording. An unknown id
    /// leaves the table untouched. Blocking.
    pub fn stop(&self, id: &str) -> Result<Recording, SessionError> {
        let session = self
            .table()
            .remove(id)
            .ok_or_else(|| SessionError::Unknown(id.to_string()))?;
        session.finish()
    }

    /// Stop and drop sessions older than `ttl`. Returns how many were reaped.
    pub fn reap_expired(&self, ttl: Duration) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let cutoff = Utc::now() - ttl;
        let expired: Vec<Session> = {
            let mut table = self.table();
            let ids: Vec<String> = table
                .values()
                .filter(|s| s.created_at < cutoff)
                .map(|s| s.id.clone())
                .collect();
            ids.iter().filter_map(|id| table.remove(id)).collect()
        };

        let count = expired.len();
        for session in expired {
            let id = session.id.clone();
            match session.finish() {
                Ok(_) => info!(session_id = %id, "abandoned session reaped"),
                Err(e) => warn!(session_id = %id, error = %e, "failed to stop abandoned session"),
            }
        }
        count
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.table().contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    struct FakeRecorder {
        counters: Arc<Counters>,
        fail_start: bool,
    }

    impl Recorder for FakeRecorder {
        fn start(&mut self) -> voice_agent_media::error::Result<()> {
            if self.fail_start {
                return Err(MediaError::Capture("no device".into()));
            }
            self.counters.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn take_chunk(&mut self) -> Vec<i16> {
            Vec::new()
        }
        fn stop(&mut self) -> voice_agent_media::error::Result<Recording> {
            self.counters.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(Recording::new(vec![1, 2, 3], 16000, 1))
        }
    }

    struct FakePipeline {
        counters: Arc<Counters>,
        fail_start: bool,
    }

    impl RecordingPipeline for FakePipeline {
        fn open(&self) -> Box<dyn Recorder> {
            Box::new(FakeRecorder {
                counters: self.counters.clone(),
                fail_start: self.fail_start,
            })
        }
        fn sample_rate(&self) -> u32 {
            16000
        }
    }

    fn pipeline() -> FakePipeline {
        FakePipeline {
            counters: Arc::new(Counters::default()),
            fail_start: false,
        }
    }

    #[test]
    fn test_start_stop_roundtrip() {
        let table = SessionTable::new();
        let p = pipeline();
        let id = table.start(&p).unwrap();
        assert!(table.contains(&id));
        assert_eq!(p.counters.started.load(Ordering::SeqCst), 1);

        let recording = table.stop(&id).unwrap();
        assert_eq!(recording.pcm, vec![1, 2, 3]);
        assert!(table.is_empty());
        assert_eq!(p.counters.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_or_repeated_stop_leaves_table_unchanged() {
        let table = SessionTable::new();
        let p = pipeline();
        let keep = table.start(&p).unwrap();
        let gone = table.start(&p).unwrap();
        table.stop(&gone).unwrap();

        assert!(matches!(table.stop(&gone), Err(SessionError::Unknown(id)) if id == gone));
        assert!(matches!(table.stop("never-started"), Err(SessionError::Unknown(_))));
        assert_eq!(table.len(), 1);
        assert!(table.contains(&keep));
        assert_eq!(p.counters.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_start_registers_nothing() {
        let table = SessionTable::new();
        let p = FakePipeline {
            counters: Arc::new(Counters::default()),
            fail_start: true,
        };
        assert!(matches!(table.start(&p), Err(SessionError::Recording(_))));
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_stops_have_one_winner() {
        let table = Arc::new(SessionTable::new());
        let p = pipeline();
        let id = table.start(&p).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                let id = id.clone();
                std::thread::spawn(move || table.stop(&id).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(p.counters.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reap_expired() {
        let table = SessionTable::new();
        let p = pipeline();
        let id = table.start(&p).unwrap();
        assert_eq!(table.reap_expired(Duration::from_secs(60)), 0);
        assert!(table.contains(&id));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(table.reap_expired(Duration::from_millis(1)), 1);
        assert!(table.is_empty());
        assert_eq!(p.counters.stopped.load(Ordering::SeqCst), 1);
    }
}
