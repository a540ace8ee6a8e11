//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::VoiceAgentError;
use crate::types::SttEngine;

/// Default RPC port of the voice agent service.
pub const DEFAULT_PORT: u16 = 51053;

/// Signal bus endpoint used when no `bus` section is configured.
pub const DEFAULT_BUS_URL: &str = "ws://127.0.0.1:8090";

/// Top-level voice agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    /// Phrase that wakes the agent up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wake_word: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt: Option<SttConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub nlu: Option<NluConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus: Option<BusConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaConfig>,

    /// Path of the intent to signal mapping file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Abandoned streaming sessions are reaped after this many seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_ttl_secs: Option<u64>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,

    /// Capture command and arguments. Must write raw S16LE PCM to stdout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_command: Option<Vec<String>>,

    /// Directory for retained voice commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<String>,

    #[serde(default)]
    pub store_voice_commands: bool,

    /// Upper bound for an AUTO-mode recording.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_max_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vad_threshold: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vad_silence_frames: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default)]
    pub default_engine: SttEngine,

    #[serde(default)]
    pub engines: SttEnginesConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<OnlineSttConfig>,
}

/// Local engine profiles addressable by the `stt_engine` selector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SttEnginesConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vosk: Option<LocalEngineConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub whisper: Option<LocalEngineConfig>,
}

impl SttEnginesConfig {
    pub fn get(&self, engine: SttEngine) -> Option<&LocalEngineConfig> {
        match engine {
            SttEngine::Vosk => self.vosk.as_ref(),
            SttEngine::Whisper => self.whisper.as_ref(),
        }
    }
}

/// A command-line recognizer: `program args...` where `{input}` is
/// replaced by the path of a WAV file; the transcript is read from stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalEngineConfig {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Audio window (seconds) after which a partial decode is attempted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<f32>,
}

/// OpenAI-compatible remote transcription endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineSttConfig {
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl OnlineSttConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NluConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snips: Option<SnipsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rasa: Option<RasaConfig>,
}

/// Offline rule-based intent engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnipsConfig {
    /// Path of the JSON5 rule file.
    pub rules: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasaConfig {
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Intents below this confidence are treated as not recognized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// VISS WebSocket endpoint, e.g. `ws://localhost:8090`.
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// File holding an authorization token (JWT).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_file: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl BusConfig {
    /// Resolve the token from the direct value, env var, or token file, in that order.
    pub fn resolve_token(&self) -> Option<String> {
        if let Some(token) = resolve_secret_field(&self.token, &self.token_env) {
            return Some(token);
        }
        let path = self.token_file.as_ref()?;
        let expanded = shellexpand::tilde(path);
        std::fs::read_to_string(expanded.as_ref())
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpd_host: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpd_port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "voice_agent_bus=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| VoiceAgentError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned())
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    /// A missing file yields the default config.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse config text (JSON5 with `${ENV_VAR}` references).
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let substituted = substitute_env_vars(raw)?;
        json5::from_str(&substituted).map_err(|e| VoiceAgentError::Config(e.to_string()))
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json5")
    }

    pub fn port(&self) -> u16 {
        self.server.as_ref().map(|s| s.port).unwrap_or(DEFAULT_PORT)
    }

    pub fn bind(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    pub fn session_ttl_secs(&self) -> u64 {
        self.server
            .as_ref()
            .and_then(|s| s.session_ttl_secs)
            .unwrap_or(300)
    }

    pub fn wake_word(&self) -> String {
        self.wake_word
            .clone()
            .unwrap_or_else(|| "hello auto".to_string())
    }

    pub fn sample_rate(&self) -> u32 {
        self.audio
            .as_ref()
            .and_then(|a| a.sample_rate)
            .unwrap_or(16_000)
    }

    pub fn channels(&self) -> u16 {
        self.audio.as_ref().and_then(|a| a.channels).unwrap_or(1)
    }

    /// Capture command line; defaults to `arecord` emitting raw mono S16LE.
    pub fn capture_command(&self) -> Vec<String> {
        if let Some(cmd) = self
            .audio
            .as_ref()
            .and_then(|a| a.capture_command.clone())
            .filter(|c| !c.is_empty())
        {
            return cmd;
        }
        vec![
            "arecord".to_string(),
            "-q".to_string(),
            "-t".to_string(),
            "raw".to_string(),
            "-f".to_string(),
            "S16_LE".to_string(),
            "-c".to_string(),
            self.channels().to_string(),
            "-r".to_string(),
            self.sample_rate().to_string(),
        ]
    }

    pub fn store_voice_commands(&self) -> bool {
        self.audio
            .as_ref()
            .map(|a| a.store_voice_commands)
            .unwrap_or(false)
    }

    pub fn store_dir(&self) -> PathBuf {
        self.audio
            .as_ref()
            .and_then(|a| a.store_dir.as_deref())
            .map(expand_path)
            .unwrap_or_else(|| data_dir().join("voice_commands"))
    }

    pub fn auto_max_secs(&self) -> u64 {
        self.audio
            .as_ref()
            .and_then(|a| a.auto_max_secs)
            .unwrap_or(10)
    }

    pub fn vad_threshold(&self) -> f32 {
        self.audio
            .as_ref()
            .and_then(|a| a.vad_threshold)
            .unwrap_or(300.0)
    }

    pub fn vad_silence_frames(&self) -> u32 {
        self.audio
            .as_ref()
            .and_then(|a| a.vad_silence_frames)
            .unwrap_or(15)
    }

    pub fn default_stt_engine(&self) -> SttEngine {
        self.stt
            .as_ref()
            .map(|s| s.default_engine)
            .unwrap_or_default()
    }

    pub fn local_engine(&self, engine: SttEngine) -> Option<&LocalEngineConfig> {
        self.stt.as_ref().and_then(|s| s.engines.get(engine))
    }

    pub fn online_stt(&self) -> Option<&OnlineSttConfig> {
        self.stt.as_ref().and_then(|s| s.online.as_ref())
    }

    pub fn snips_rules(&self) -> Option<PathBuf> {
        self.nlu
            .as_ref()
            .and_then(|n| n.snips.as_ref())
            .map(|s| expand_path(&s.rules))
    }

    pub fn rasa(&self) -> Option<&RasaConfig> {
        self.nlu.as_ref().and_then(|n| n.rasa.as_ref())
    }

    pub fn bus_url(&self) -> String {
        self.bus
            .as_ref()
            .map(|b| b.url.clone())
            .unwrap_or_else(|| DEFAULT_BUS_URL.to_string())
    }

    pub fn bus_timeout_secs(&self) -> u64 {
        self.bus
            .as_ref()
            .and_then(|b| b.timeout_secs)
            .unwrap_or(5)
    }

    pub fn mpd_host(&self) -> String {
        self.media
            .as_ref()
            .and_then(|m| m.mpd_host.clone())
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn mpd_port(&self) -> u16 {
        self.media.as_ref().and_then(|m| m.mpd_port).unwrap_or(6600)
    }

    pub fn media_timeout_secs(&self) -> u64 {
        self.media
            .as_ref()
            .and_then(|m| m.timeout_secs)
            .unwrap_or(3)
    }

    pub fn mapping_path(&self) -> Option<PathBuf> {
        self.mapping.as_deref().map(expand_path)
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.port() == 0 {
            errors.push("Server port cannot be 0".to_string());
        }

        if self.sample_rate() == 0 {
            errors.push("Audio sample rate cannot be 0".to_string());
        }

        let default_engine = self.default_stt_engine();
        if self.local_engine(default_engine).is_none() {
            warnings.push(format!(
                "Default STT engine '{}' has no engine profile configured",
                default_engine.as_str()
            ));
        }

        if self.bus.is_none() {
            warnings.push(format!("No signal bus configured; using {DEFAULT_BUS_URL}"));
        }

        match self.mapping_path() {
            None => warnings.push("No intent mapping file configured".to_string()),
            Some(path) if !path.exists() => {
                errors.push(format!("Mapping file not found: {}", path.display()));
            }
            Some(_) => {}
        }

        if let Some(rules) = self.snips_rules() {
            if !rules.exists() {
                errors.push(format!("Intent rule file not found: {}", rules.display()));
            }
        }

        if let Some(online) = self.online_stt() {
            if online.resolve_api_key().is_none() {
                warnings.push(format!(
                    "Online STT endpoint '{}' has no API key configured",
                    online.url
                ));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for voice agent data: `~/.voice_agent/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voice_agent")
}
