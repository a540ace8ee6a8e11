//! Remote (online) speech-to-text.

use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};

use voice_agent_core::config::OnlineSttConfig;

use crate::audio::Recording;
use crate::error::{MediaError, Result};
use crate::lock;

/// Stateless remote recognizer. `None` from `recognize` means no transcript
/// (timeout, empty result, or transport failure).
pub trait RemoteEngine: Send + Sync {
    fn name(&self) -> &str;

    fn is_initialized(&self) -> bool;

    /// Attempt (re)initialization. Returns whether the engine is usable.
    fn initialize(&self) -> bool;

    fn recognize(&self, recording: &Recording) -> Option<String>;
}

/// OpenAI-compatible `/audio/transcriptions` endpoint.
///
/// The blocking HTTP client is built lazily on first use, from a
/// blocking thread.
pub struct HttpTranscriber {
    url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    client: Mutex<Option<reqwest::blocking::Client>>,
}

impl HttpTranscriber {
    pub fn new(url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key,
            model: model.into(),
            timeout: Duration::from_secs(10),
            client: Mutex::new(None),
        }
    }

    pub fn from_config(config: &OnlineSttConfig) -> Self {
        let mut t = Self::new(
            config.url.clone(),
            config.resolve_api_key(),
            config
                .model
                .clone()
                .unwrap_or_else(|| "whisper-1".to_string()),
        );
        if let Some(secs) = config.timeout_secs {
            t.timeout = Duration::from_secs(secs);
        }
        t
    }

    fn transcribe(
        &self,
        client: &reqwest::blocking::Client,
        recording: &Recording,
    ) -> Result<String> {
        let wav = recording.to_wav();
        debug!(url = %self.url, model = %self.model, wav_bytes = wav.len(), "sending audio for transcription");

        let part = reqwest::blocking::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| MediaError::Remote(e.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "text")
            .part("file", part);

        let mut req = client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().map_err(|e| MediaError::Remote(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            return Err(MediaError::Remote(format!("transcription API error {status}: {body}")));
        }

        let text = resp.text().map_err(|e| MediaError::Remote(e.to_string()))?;
        Ok(text.trim().to_string())
    }
}

impl RemoteEngine for HttpTranscriber {
    fn name(&self) -> &str {
        "http"
    }

    fn is_initialized(&self) -> bool {
        lock(&self.client).is_some()
    }

    fn initialize(&self) -> bool {
        let mut client = lock(&self.client);
        if client.is_some() {
            return true;
        }
        match reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
        {
            Ok(c) => {
                *client = Some(c);
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to initialize transcription client");
                false
            }
        }
    }

    fn recognize(&self, recording: &Recording) -> Option<String> {
        let client = lock(&self.client).clone()?;
        match self.transcribe(&client, recording) {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "remote transcription failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// One-shot HTTP server answering with `status` and `body`.
    fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 65536];
            let mut seen = Vec::new();
            // Read until the multipart body terminator arrives.
            while !seen.windows(4).any(|w| w == b"--\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            let resp = format!(
                "HTTP/1.1 {status}\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(resp.as_bytes()).unwrap();
        });
        format!("http://{addr}/v1/audio/transcriptions")
    }

    #[test]
    fn test_lazy_initialization() {
        let t = HttpTranscriber::new("http://127.0.0.1:9/", None, "whisper-1");
        assert!(!t.is_initialized());
        assert_eq!(t.recognize(&Recording::new(vec![1; 10], 16000, 1)), None);
        assert!(t.initialize());
        assert!(t.is_initialized());
    }

    #[test]
    fn test_transcript_returned() {
        let url = serve_once("200 OK", "turn on the headlights\n");
        let t = HttpTranscriber::new(url, Some("key".into()), "whisper-1");
        assert!(t.initialize());
        let text = t.recognize(&Recording::new(vec![1; 160], 16000, 1));
        assert_eq!(text.as_deref(), Some("turn on the headlights"));
    }

    #[test]
    fn test_server_error_is_none() {
        let url = serve_once("500 Internal Server Error", "boom");
        let t = HttpTranscriber::new(url, None, "whisper-1");
        assert!(t.initialize());
        assert_eq!(t.recognize(&Recording::new(vec![1; 160], 16000, 1)), None);
    }
}
