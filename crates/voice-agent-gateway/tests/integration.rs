//! Gateway integration tests: start a real gateway over in-process fakes
//! and drive it via WS + HTTP.
//!
//! Run with: `cargo test -p voice-agent-gateway --test integration`

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use voice_agent_bus::{BusError, ServerInfo, SignalBridge, SignalBusClient};
use voice_agent_core::config::{AudioConfig, Config};
use voice_agent_core::types::{ExecutionAction, NluEngine, SttEngine};
use voice_agent_gateway::GatewayState;
use voice_agent_intent::rules::RuleEngine;
use voice_agent_intent::{
    ActionPlanner, CommandExecutor, Mapping, MappingPlanner, NluRegistry, PlanError,
};
use voice_agent_media::Recording;
use voice_agent_media::engine::{LocalEngine, LocalRecognizer};
use voice_agent_media::error::Result as MediaResult;
use voice_agent_media::playback::MediaBackend;
use voice_agent_media::recorder::{Recorder, RecordingPipeline};
use voice_agent_media::remote::RemoteEngine;
use voice_agent_media::{RecognizerRegistry, Transcriber};

type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const TEMPERATURE: &str = "Vehicle.Cabin.HVAC.Station.Row1.Driver.Temperature";

const RULES: &str = r#"{
    intents: [
        { intent: "HeadlightsControl", patterns: ["turn (?P<action>on|off) the (head)?lights"] },
        { intent: "ClimateControl", patterns: ["(?P<action>increase|decrease) the temperature(?: by (?P<factor>\\d+))?"] },
    ],
}"#;

const MAPPING: &str = r#"{
    intents: {
        HeadlightsControl: [{
            signal: "Vehicle.Body.Lights.Beam.Low.IsOn",
            action_slot: "action",
            actions: { on: { value: "true" }, off: { value: "false" } },
        }],
        ClimateControl: [{
            signal: "Vehicle.Cabin.HVAC.Station.Row1.Driver.Temperature",
            action_slot: "action",
            default_factor: 1,
            actions: { increase: { kind: "increase" }, decrease: { kind: "decrease" } },
        }],
    },
}"#;

// ---- fakes ----

#[derive(Default)]
struct RecorderLog {
    started: AtomicUsize,
    stopped: AtomicUsize,
}

struct FakeRecorder {
    log: Arc<RecorderLog>,
    captured: Vec<i16>,
}

impl Recorder for FakeRecorder {
    fn start(&mut self) -> MediaResult<()> {
        self.log.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn take_chunk(&mut self) -> Vec<i16> {
        let chunk = vec![500i16; 320];
        self.captured.extend_from_slice(&chunk);
        chunk
    }
    fn stop(&mut self) -> MediaResult<Recording> {
        self.log.stopped.fetch_add(1, Ordering::SeqCst);
        let mut pcm = std::mem::take(&mut self.captured);
        pcm.extend(vec![500i16; 1600]);
        Ok(Recording::new(pcm, 16000, 1))
    }
}

struct FakePipeline {
    log: Arc<RecorderLog>,
}

impl RecordingPipeline for FakePipeline {
    fn open(&self) -> Box<dyn Recorder> {
        Box::new(FakeRecorder {
            log: self.log.clone(),
            captured: Vec::new(),
        })
    }
    fn sample_rate(&self) -> u32 {
        16000
    }
}

/// Local engine that "hears" a fixed utterance.
struct ScriptedEngine {
    transcript: &'static str,
    partial: &'static str,
    decodes: Arc<AtomicUsize>,
}

struct ScriptedRecognizer {
    transcript: &'static str,
    partial: &'static str,
    decodes: Arc<AtomicUsize>,
}

impl LocalRecognizer for ScriptedRecognizer {
    fn accept_waveform(&mut self, _pcm: &[i16]) -> MediaResult<bool> {
        Ok(true)
    }
    fn partial_result(&mut self) -> MediaResult<String> {
        Ok(self.partial.to_string())
    }
    fn final_result(&mut self) -> MediaResult<String> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        Ok(self.transcript.to_string())
    }
    fn reset(&mut self) {}
}

impl LocalEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }
    fn new_recognizer(&self, _sample_rate: u32) -> MediaResult<Box<dyn LocalRecognizer>> {
        Ok(Box::new(ScriptedRecognizer {
            transcript: self.transcript,
            partial: self.partial,
            decodes: self.decodes.clone(),
        }))
    }
}

/// Remote engine that never produces a transcript.
#[derive(Default)]
struct SilentRemote {
    initialized: AtomicUsize,
    calls: AtomicUsize,
}

impl RemoteEngine for SilentRemote {
    fn name(&self) -> &str {
        "silent"
    }
    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst) > 0
    }
    fn initialize(&self) -> bool {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        true
    }
    fn recognize(&self, _recording: &Recording) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        None
    }
}

#[derive(Default)]
struct BusLog {
    values: HashMap<String, String>,
    writes: Vec<(String, String)>,
    calls: usize,
    refuse_connect: bool,
}

struct FakeBus(Arc<Mutex<BusLog>>);

#[async_trait]
impl SignalBusClient for FakeBus {
    async fn connect(&mut self) -> Result<(), BusError> {
        let mut log = self.0.lock().unwrap();
        log.calls += 1;
        if log.refuse_connect {
            Err(BusError::Connection("connection refused".into()))
        } else {
            Ok(())
        }
    }
    async fn disconnect(&mut self) -> Result<(), BusError> {
        Ok(())
    }
    async fn read(&mut self, path: &str) -> Result<Option<String>, BusError> {
        let mut log = self.0.lock().unwrap();
        log.calls += 1;
        Ok(log.values.get(path).cloned())
    }
    async fn write(&mut self, path: &str, value: &str) -> Result<(), BusError> {
        let mut log = self.0.lock().unwrap();
        log.calls += 1;
        log.writes.push((path.into(), value.into()));
        log.values.insert(path.into(), value.into());
        Ok(())
    }
    async fn server_info(&mut self) -> Result<ServerInfo, BusError> {
        Ok(ServerInfo {
            endpoint: "fake".into(),
            protocol: "test".into(),
        })
    }
}

#[derive(Default)]
struct FakeMedia {
    calls: Mutex<Vec<&'static str>>,
}

impl FakeMedia {
    fn called(&self, name: &'static str) -> bool {
        self.calls.lock().unwrap().push(name);
        true
    }
}

impl MediaBackend for FakeMedia {
    fn resume(&self) -> bool {
        self.called("resume")
    }
    fn pause(&self) -> bool {
        self.called("pause")
    }
    fn next(&self) -> bool {
        self.called("next")
    }
    fn previous(&self) -> bool {
        self.called("previous")
    }
    fn stop(&self) -> bool {
        self.called("stop")
    }
}

struct CountingPlanner {
    inner: MappingPlanner,
    calls: AtomicUsize,
}

impl ActionPlanner for CountingPlanner {
    fn plan(
        &self,
        intent: &str,
        slots: &[voice_agent_core::types::Slot],
    ) -> Result<Vec<ExecutionAction>, PlanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.plan(intent, slots)
    }
}

// ---- harness ----

struct Options {
    transcript: &'static str,
    partial: &'static str,
    bus: BusLog,
    store_dir: Option<std::path::PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            transcript: "turn on the headlights",
            partial: "",
            bus: BusLog::default(),
            store_dir: None,
        }
    }
}

struct TestGateway {
    state: Arc<GatewayState>,
    port: u16,
    recorder: Arc<RecorderLog>,
    remote: Arc<SilentRemote>,
    decodes: Arc<AtomicUsize>,
    bus: Arc<Mutex<BusLog>>,
    media: Arc<FakeMedia>,
    planner: Arc<CountingPlanner>,
}

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn build_state(opts: Options) -> TestGateway {
    let mut config = Config::default();
    if let Some(dir) = &opts.store_dir {
        config.audio = Some(AudioConfig {
            store_dir: Some(dir.display().to_string()),
            store_voice_commands: true,
            ..Default::default()
        });
    }

    let recorder = Arc::new(RecorderLog::default());
    let pipeline = Arc::new(FakePipeline {
        log: recorder.clone(),
    });

    let decodes = Arc::new(AtomicUsize::new(0));
    let registry = RecognizerRegistry::new(SttEngine::Vosk, 16000).with_engine(
        SttEngine::Vosk,
        Arc::new(ScriptedEngine {
            transcript: opts.transcript,
            partial: opts.partial,
            decodes: decodes.clone(),
        }),
    );
    let remote = Arc::new(SilentRemote::default());
    let transcriber = Arc::new(Transcriber::new(
        Arc::new(registry),
        Some(remote.clone() as Arc<dyn RemoteEngine>),
    ));

    let mut nlu = NluRegistry::new();
    nlu.register(NluEngine::Snips, Arc::new(RuleEngine::parse(RULES).unwrap()));

    let bus = Arc::new(Mutex::new(opts.bus));
    let bridge =
        Arc::new(SignalBridge::spawn(FakeBus(bus.clone()), Duration::from_secs(2)).unwrap());
    let planner = Arc::new(CountingPlanner {
        inner: MappingPlanner::new(Mapping::parse(MAPPING).unwrap()),
        calls: AtomicUsize::new(0),
    });
    let media = Arc::new(FakeMedia::default());
    let executor = Arc::new(CommandExecutor::new(bridge, planner.clone(), media.clone()));

    let state = Arc::new(GatewayState::new(
        Arc::new(config),
        pipeline,
        transcriber,
        Arc::new(nlu),
        executor,
    ));

    TestGateway {
        state,
        port: find_free_port(),
        recorder,
        remote,
        decodes,
        bus,
        media,
        planner,
    }
}

async fn start_test_gateway(opts: Options) -> TestGateway {
    let gw = build_state(opts);
    let port = gw.port;

    let state_clone = gw.state.clone();
    tokio::spawn(async move {
        let _ = voice_agent_gateway::start_gateway(state_clone, port).await;
    });

    // Wait for gateway to be ready
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .is_ok()
        {
            break;
        }
    }

    gw
}

async fn connect(port: u16) -> Ws {
    let url = format!("ws://127.0.0.1:{port}/ws");
    let (mut ws, _) = connect_async(&url).await.expect("WS connect failed");
    let hello = next_frame(&mut ws).await;
    assert_eq!(hello["event"], "hello");
    ws
}

async fn next_frame(ws: &mut Ws) -> Value {
    let msg = tokio::time::timeout(Duration::from_secs(10), ws.next())
        .await
        .expect("timed out waiting for frame")
        .unwrap()
        .unwrap();
    serde_json::from_str(msg.to_text().unwrap()).unwrap()
}

async fn send(ws: &mut Ws, id: &str, method: &str, params: Value) {
    let req = json!({ "type": "req", "id": id, "method": method, "params": params });
    ws.send(Message::Text(req.to_string().into())).await.unwrap();
}

/// Read until the response to `id` arrives; returns it with the events seen.
async fn response_for(ws: &mut Ws, id: &str) -> (Value, Vec<Value>) {
    let mut events = Vec::new();
    loop {
        let frame = next_frame(ws).await;
        if frame["type"] == "res" && frame["id"] == id {
            return (frame, events);
        }
        events.push(frame);
    }
}

async fn call(ws: &mut Ws, id: &str, method: &str, params: Value) -> Value {
    send(ws, id, method, params).await;
    let (frame, _) = response_for(ws, id).await;
    assert_eq!(frame["ok"], true, "{frame}");
    frame["payload"].clone()
}

// ---- tests ----

#[tokio::test]
async fn test_health_endpoint() {
    let gw = start_test_gateway(Options::default()).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{}/health", gw.port))
        .await
        .expect("Health request failed");

    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].as_str().unwrap().starts_with('v'));
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn test_check_status_and_unknown_method() {
    let gw = start_test_gateway(Options::default()).await;
    let mut ws = connect(gw.port).await;

    let status = call(&mut ws, "s1", "check_status", json!({})).await;
    assert_eq!(status["up"], true);
    assert_eq!(status["wake_word"], "hello auto");

    send(&mut ws, "s2", "teleport", json!({})).await;
    let (frame, _) = response_for(&mut ws, "s2").await;
    assert_eq!(frame["ok"], false);
    assert_eq!(frame["error"]["code"], "method_not_found");
}

#[tokio::test]
async fn test_start_stop_recognizes_headlights() {
    let gw = start_test_gateway(Options::default()).await;
    let mut ws = connect(gw.port).await;

    let started = call(&mut ws, "v1", "recognize_voice", json!({ "action": "START" })).await;
    assert_eq!(started["status"], "PROCESSING");
    let session_id = started["session_id"].as_str().unwrap().to_string();
    assert!(gw.state.sessions.contains(&session_id));

    let result = call(
        &mut ws,
        "v2",
        "recognize_voice",
        json!({ "action": "STOP", "session_id": session_id, "nlu_engine": "SNIPS" }),
    )
    .await;
    assert_eq!(result["status"], "SUCCESS");
    assert_eq!(result["intent"], "HeadlightsControl");
    assert_eq!(result["slots"], json!([{ "name": "action", "value": "on" }]));
    assert_eq!(result["session_id"], session_id.as_str());
    assert_eq!(result["transcript"], "turn on the headlights");

    // The session is gone and the local recognizer was released once.
    assert!(gw.state.sessions.is_empty());
    assert_eq!(gw.state.transcriber.registry().active_count(), 0);
    assert_eq!(gw.decodes.load(Ordering::SeqCst), 1);
    assert_eq!(gw.recorder.started.load(Ordering::SeqCst), 1);
    assert_eq!(gw.recorder.stopped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_unknown_session_is_usage_error() {
    let gw = start_test_gateway(Options::default()).await;
    let mut ws = connect(gw.port).await;

    let started = call(&mut ws, "v1", "recognize_voice", json!({ "action": "START" })).await;
    let live = started["session_id"].as_str().unwrap().to_string();

    let result = call(
        &mut ws,
        "v2",
        "recognize_voice",
        json!({ "action": "STOP", "session_id": "never-started" }),
    )
    .await;
    assert_eq!(result["status"], "ERROR");
    assert_eq!(gw.state.sessions.len(), 1);
    assert!(gw.state.sessions.contains(&live));

    let first = call(
        &mut ws,
        "v3",
        "recognize_voice",
        json!({ "action": "STOP", "session_id": live }),
    )
    .await;
    assert_eq!(first["status"], "SUCCESS");
    let again = call(
        &mut ws,
        "v4",
        "recognize_voice",
        json!({ "action": "STOP", "session_id": live }),
    )
    .await;
    assert_eq!(again["status"], "ERROR");
    assert_eq!(gw.recorder.stopped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_online_mode_falls_back_to_local() {
    let gw = start_test_gateway(Options::default()).await;
    let mut ws = connect(gw.port).await;

    let started = call(&mut ws, "v1", "recognize_voice", json!({ "action": "START" })).await;
    let session_id = started["session_id"].as_str().unwrap().to_string();
    let result = call(
        &mut ws,
        "v2",
        "recognize_voice",
        json!({ "action": "STOP", "session_id": session_id, "online_mode": "ONLINE" }),
    )
    .await;

    assert_eq!(result["status"], "SUCCESS");
    assert_eq!(result["intent"], "HeadlightsControl");
    assert_eq!(gw.remote.initialized.load(Ordering::SeqCst), 1);
    assert_eq!(gw.remote.calls.load(Ordering::SeqCst), 1);
    assert_eq!(gw.decodes.load(Ordering::SeqCst), 1);
    assert_eq!(gw.state.transcriber.registry().active_count(), 0);
}

#[tokio::test]
async fn test_unrecognized_voice_and_text_statuses() {
    let gw = start_test_gateway(Options {
        transcript: "",
        ..Default::default()
    })
    .await;
    let mut ws = connect(gw.port).await;

    let started = call(&mut ws, "v1", "recognize_voice", json!({ "action": "START" })).await;
    let session_id = started["session_id"].as_str().unwrap().to_string();
    let result = call(
        &mut ws,
        "v2",
        "recognize_voice",
        json!({ "action": "STOP", "session_id": session_id }),
    )
    .await;
    assert_eq!(result["status"], "VOICE_NOT_RECOGNIZED");
    assert_eq!(gw.state.transcriber.registry().active_count(), 0);

    let text = call(
        &mut ws,
        "t1",
        "recognize_text",
        json!({ "text": "increase the temperature by 2", "nlu_engine": "SNIPS" }),
    )
    .await;
    assert_eq!(text["status"], "SUCCESS");
    assert_eq!(text["intent"], "ClimateControl");
    assert_eq!(
        text["slots"],
        json!([{ "name": "action", "value": "increase" }, { "name": "factor", "value": "2" }])
    );

    let text = call(&mut ws, "t2", "recognize_text", json!({ "text": "sing a song" })).await;
    assert_eq!(text["status"], "INTENT_NOT_RECOGNIZED");
    let text = call(&mut ws, "t3", "recognize_text", json!({ "text": "  " })).await;
    assert_eq!(text["status"], "TEXT_NOT_RECOGNIZED");
    let text = call(
        &mut ws,
        "t4",
        "recognize_text",
        json!({ "text": "turn on the lights", "nlu_engine": "RASA" }),
    )
    .await;
    assert_eq!(text["status"], "NLU_MODEL_NOT_SUPPORTED");
}

#[tokio::test]
async fn test_voice_commands_are_retained() {
    let dir = tempfile::tempdir().unwrap();
    let gw = start_test_gateway(Options {
        store_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    })
    .await;
    let mut ws = connect(gw.port).await;

    let started = call(&mut ws, "v1", "recognize_voice", json!({ "action": "START" })).await;
    let session_id = started["session_id"].as_str().unwrap().to_string();
    call(
        &mut ws,
        "v2",
        "recognize_voice",
        json!({ "action": "STOP", "session_id": session_id }),
    )
    .await;

    let wav = std::fs::read(dir.path().join(format!("{session_id}.wav"))).unwrap();
    assert_eq!(&wav[..4], b"RIFF");
}

#[tokio::test]
async fn test_execute_increase_reads_and_writes() {
    let mut bus = BusLog::default();
    bus.values.insert(TEMPERATURE.into(), "20".into());
    let gw = start_test_gateway(Options {
        bus,
        ..Default::default()
    })
    .await;
    let mut ws = connect(gw.port).await;

    let result = call(
        &mut ws,
        "e1",
        "execute_command",
        json!({
            "intent": "ClimateControl",
            "slots": [{ "name": "action", "value": "increase" }, { "name": "factor", "value": "2" }],
        }),
    )
    .await;
    assert_eq!(result["status"], "SUCCESS");
    assert_eq!(
        gw.bus.lock().unwrap().writes,
        vec![(TEMPERATURE.to_string(), "22".to_string())]
    );
}

#[tokio::test]
async fn test_execute_without_prior_value_never_writes() {
    let gw = start_test_gateway(Options::default()).await;
    let mut ws = connect(gw.port).await;

    let result = call(
        &mut ws,
        "e1",
        "execute_command",
        json!({
            "intent": "ClimateControl",
            "slots": [{ "name": "action", "value": "decrease" }],
        }),
    )
    .await;
    assert_eq!(result["status"], "BUS_CONN_ERROR");
    assert!(result["message"].as_str().unwrap().contains("setting a value first"));
    assert!(gw.bus.lock().unwrap().writes.is_empty());
}

#[tokio::test]
async fn test_failed_reconnect_skips_planner() {
    let gw = start_test_gateway(Options {
        bus: BusLog {
            refuse_connect: true,
            ..Default::default()
        },
        ..Default::default()
    })
    .await;
    let mut ws = connect(gw.port).await;

    let result = call(
        &mut ws,
        "e1",
        "execute_command",
        json!({ "intent": "HeadlightsControl", "slots": [{ "name": "action", "value": "on" }] }),
    )
    .await;
    assert_eq!(result["status"], "BUS_CONN_ERROR");
    assert_eq!(gw.planner.calls.load(Ordering::SeqCst), 0);
    assert!(gw.bus.lock().unwrap().writes.is_empty());

    let health: Value = reqwest::get(format!("http://127.0.0.1:{}/health", gw.port))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["bus"], "DISCONNECTED");
}

#[test]
fn test_media_pause_never_touches_bus() {
    let gw = build_state(Options::default());
    let result = gw.state.executor.execute(
        "m1",
        "MediaControl",
        &[voice_agent_core::types::Slot::new("media_control_action", "pause")],
    );
    assert!(result.is_success());
    assert_eq!(*gw.media.calls.lock().unwrap(), vec!["pause"]);
    assert_eq!(gw.bus.lock().unwrap().calls, 0);
    assert_eq!(gw.planner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_wake_word_stream_detects() {
    let gw = start_test_gateway(Options {
        partial: "Hello Auto",
        ..Default::default()
    })
    .await;
    let mut ws = connect(gw.port).await;

    send(&mut ws, "w1", "detect_wake_word", json!({})).await;
    let (frame, events) = response_for(&mut ws, "w1").await;
    assert_eq!(frame["payload"]["ended"], "detected");
    let last = events.last().unwrap();
    assert_eq!(last["event"], "wake_word.status");
    assert_eq!(last["id"], "w1");
    assert_eq!(last["payload"]["detected"], true);
    assert_eq!(gw.recorder.stopped.load(Ordering::SeqCst), 1);
    assert_eq!(gw.state.transcriber.registry().active_count(), 0);
}

#[tokio::test]
async fn test_wake_word_stream_cancel_sends_end_of_stream() {
    let gw = start_test_gateway(Options::default()).await;
    let mut ws = connect(gw.port).await;

    send(&mut ws, "w1", "detect_wake_word", json!({})).await;
    let event = next_frame(&mut ws).await;
    assert_eq!(event["event"], "wake_word.status");
    assert_eq!(event["payload"]["detected"], false);

    send(&mut ws, "c1", "detect_wake_word.cancel", json!({ "id": "w1" })).await;
    // Both responses arrive, in either order, possibly after more events.
    let mut cancel = Value::Null;
    let mut ended = Value::Null;
    while cancel.is_null() || ended.is_null() {
        let frame = next_frame(&mut ws).await;
        match (frame["type"].as_str(), frame["id"].as_str()) {
            (Some("res"), Some("c1")) => cancel = frame,
            (Some("res"), Some("w1")) => ended = frame,
            _ => {}
        }
    }
    assert_eq!(cancel["payload"]["cancelled"], true);
    assert_eq!(ended["payload"]["ended"], "cancelled");

    assert!(gw.recorder.stopped.load(Ordering::SeqCst) >= 1);
    assert_eq!(gw.state.transcriber.registry().active_count(), 0);
}
