//! Gateway shared state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use voice_agent_bus::{SignalBridge, VisClient};
use voice_agent_core::config::Config;
use voice_agent_core::types::{NluEngine, SttEngine};
use voice_agent_intent::rasa::RasaEngine;
use voice_agent_intent::rules::RuleEngine;
use voice_agent_intent::{CommandExecutor, Mapping, MappingPlanner, NluRegistry};
use voice_agent_media::engine::CommandEngine;
use voice_agent_media::playback::MpdBackend;
use voice_agent_media::recorder::{CommandPipeline, RecordingPipeline};
use voice_agent_media::remote::{HttpTranscriber, RemoteEngine};
use voice_agent_media::{RecognizerRegistry, Transcriber};

use crate::session::SessionTable;

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionTable>,
    pub pipeline: Arc<dyn RecordingPipeline>,
    pub transcriber: Arc<Transcriber>,
    pub nlu: Arc<NluRegistry>,
    pub executor: Arc<CommandExecutor>,
    pub connections: RwLock<HashMap<String, ConnectionState>>,
    /// Live wake word streams, keyed by (connection id, request id).
    wake_streams: Mutex<HashMap<(String, String), CancellationToken>>,
}

/// Per-connection state.
pub struct ConnectionState {
    pub conn_id: String,
    pub event_tx: mpsc::UnboundedSender<String>,
}

impl GatewayState {
    pub fn new(
        config: Arc<Config>,
        pipeline: Arc<dyn RecordingPipeline>,
        transcriber: Arc<Transcriber>,
        nlu: Arc<NluRegistry>,
        executor: Arc<CommandExecutor>,
    ) -> Self {
        Self {
            config,
            sessions: Arc::new(SessionTable::new()),
            pipeline,
            transcriber,
            nlu,
            executor,
            connections: RwLock::new(HashMap::new()),
            wake_streams: Mutex::new(HashMap::new()),
        }
    }

    /// Wire up the production collaborators described by `config`.
    ///
    /// Spawns the signal bus loop thread; the bus is not connected yet.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let sample_rate = config.sample_rate();
        let pipeline: Arc<dyn RecordingPipeline> = Arc::new(CommandPipeline::new(
            config.capture_command(),
            sample_rate,
            config.channels(),
        ));

        let mut registry = RecognizerRegistry::new(config.default_stt_engine(), sample_rate);
        for engine in [SttEngine::Vosk, SttEngine::Whisper] {
            if let Some(profile) = config.local_engine(engine) {
                info!(engine = engine.as_str(), program = %profile.program, "local stt engine configured");
                registry = registry.with_engine(
                    engine,
                    Arc::new(CommandEngine::from_config(engine.as_str(), profile)),
                );
            }
        }
        let remote = config.online_stt().map(|online| {
            info!(url = %online.url, "online stt engine configured");
            Arc::new(HttpTranscriber::from_config(online)) as Arc<dyn RemoteEngine>
        });
        let transcriber = Arc::new(Transcriber::new(Arc::new(registry), remote));

        let mut nlu = NluRegistry::new();
        if let Some(rules) = config.snips_rules() {
            let engine = RuleEngine::load(&rules)
                .map_err(|e| anyhow::anyhow!("{}: {e}", rules.display()))?;
            info!(rules = engine.len(), "offline intent rules loaded");
            nlu.register(NluEngine::Snips, Arc::new(engine));
        }
        if let Some(rasa) = config.rasa() {
            info!(url = %rasa.url, "rasa intent engine configured");
            nlu.register(NluEngine::Rasa, Arc::new(RasaEngine::from_config(rasa)));
        }

        let mapping = match config.mapping_path() {
            Some(path) => Mapping::load(&path)?,
            None => {
                warn!("no intent mapping configured; vehicle intents are unsupported");
                Mapping::default()
            }
        };

        let token = config.bus.as_ref().and_then(|b| b.resolve_token());
        let bridge = SignalBridge::spawn(
            VisClient::new(config.bus_url(), token),
            Duration::from_secs(config.bus_timeout_secs()),
        )?;
        let media = MpdBackend::new(
            config.mpd_host(),
            config.mpd_port(),
            Duration::from_secs(config.media_timeout_secs()),
        );
        let executor = CommandExecutor::new(
            Arc::new(bridge),
            Arc::new(MappingPlanner::new(mapping)),
            Arc::new(media),
        );

        Ok(Self::new(
            Arc::new(config),
            pipeline,
            transcriber,
            Arc::new(nlu),
            Arc::new(executor),
        ))
    }

    /// Directory voice commands are kept in, when retention is enabled.
    pub fn retention_dir(&self) -> Option<PathBuf> {
        self.config
            .store_voice_commands()
            .then(|| self.config.store_dir())
    }

    fn streams(&self) -> MutexGuard<'_, HashMap<(String, String), CancellationToken>> {
        self.wake_streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_wake_stream(&self, conn_id: &str, request_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.streams()
            .insert((conn_id.to_string(), request_id.to_string()), token.clone());
        token
    }

    pub fn finish_wake_stream(&self, conn_id: &str, request_id: &str) {
        self.streams()
            .remove(&(conn_id.to_string(), request_id.to_string()));
    }

    /// Cancel one stream. Returns `false` when it is not running.
    pub fn cancel_wake_stream(&self, conn_id: &str, request_id: &str) -> bool {
        match self
            .streams()
            .get(&(conn_id.to_string(), request_id.to_string()))
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every stream owned by a closed connection.
    pub fn cancel_connection_streams(&self, conn_id: &str) {
        for ((owner, _), token) in self.streams().iter() {
            if owner == conn_id {
                token.cancel();
            }
        }
    }

    pub async fn event_sender(&self, conn_id: &str) -> Option<mpsc::UnboundedSender<String>> {
        self.connections
            .read()
            .await
            .get(conn_id)
            .map(|c| c.event_tx.clone())
    }
}
