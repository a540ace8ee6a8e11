use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use voice_agent_core::config::Config;
use voice_agent_core::protocol::SERVICE_VERSION;
use voice_agent_gateway::GatewayState;

#[derive(Parser)]
#[command(
    name = "voice-agent",
    about = "Voice command service: speech and text to vehicle signals and media control",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the voice agent service
    Serve {
        /// Port to listen on (default: 51053)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show configuration and service status
    Status,

    /// Talk to a running service
    Client {
        /// WebSocket endpoint, e.g. ws://127.0.0.1:51053/ws
        url: String,

        #[command(subcommand)]
        action: ClientAction,
    },
}

#[derive(Subcommand)]
enum ClientAction {
    /// Query service status
    Status,
    /// Recognize an intent in a text command
    Text {
        text: String,
        /// Intent engine: SNIPS or RASA
        #[arg(long, default_value = "SNIPS")]
        nlu: String,
    },
    /// Execute an intent; slots are given as name=value
    Execute { intent: String, slots: Vec<String> },
}

fn init_logging(config: &Config, verbose: bool) {
    let logging = config.logging.clone().unwrap_or_default();
    let level = if verbose {
        "debug".to_string()
    } else {
        logging.level.clone().unwrap_or_else(|| "info".to_string())
    };
    let directives = std::iter::once(level)
        .chain(logging.filters.iter().cloned())
        .collect::<Vec<_>>()
        .join(",");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&directives))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (logging.format.as_str(), logging.output.as_str()) {
        ("json", "stdout") => builder.json().with_writer(std::io::stdout).init(),
        ("json", _) => builder.json().with_writer(std::io::stderr).init(),
        (_, "stdout") => builder.with_writer(std::io::stdout).init(),
        _ => builder.with_writer(std::io::stderr).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Serve { port } => {
            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("{w}");
            }
            if !errors.is_empty() {
                for e in &errors {
                    tracing::error!("{e}");
                }
                anyhow::bail!("invalid configuration: {}", config_path.display());
            }

            let port = port.unwrap_or_else(|| config.port());
            tracing::info!(version = SERVICE_VERSION, config = %config_path.display(), "Starting voice agent on port {port}");
            let state = Arc::new(GatewayState::from_config(config)?);
            voice_agent_gateway::start_gateway(state.clone(), port).await?;
            tokio::task::spawn_blocking(move || state.executor.bridge().shutdown()).await?;
        }
        Commands::Status => {
            println!("Voice agent {SERVICE_VERSION}");
            println!("Config: {}", config_path.display());
            println!("Listen: {}:{}", config.bind(), config.port());
            println!("Wake word: {}", config.wake_word());
            println!("Signal bus: {}", config.bus_url());
            let (warnings, errors) = config.validate();
            for w in warnings {
                println!("  warning: {w}");
            }
            for e in errors {
                println!("  error: {e}");
            }

            let url = format!("http://127.0.0.1:{}/health", config.port());
            match reqwest::get(&url).await {
                Ok(resp) => {
                    let body: Value = resp.json().await.unwrap_or_default();
                    println!(
                        "Status: running ({} connections, bus {})",
                        body["connections"], body["bus"]
                    );
                }
                Err(_) => println!("Status: not running"),
            }
        }
        Commands::Client { url, action } => {
            let (method, params) = match action {
                ClientAction::Status => ("check_status", json!({})),
                ClientAction::Text { text, nlu } => (
                    "recognize_text",
                    json!({ "text": text, "nlu_engine": nlu.to_uppercase() }),
                ),
                ClientAction::Execute { intent, slots } => {
                    let slots = slots
                        .iter()
                        .map(|s| {
                            let (name, value) = s
                                .split_once('=')
                                .ok_or_else(|| anyhow::anyhow!("slot '{s}' is not name=value"))?;
                            Ok(json!({ "name": name, "value": value }))
                        })
                        .collect::<anyhow::Result<Vec<_>>>()?;
                    ("execute_command", json!({ "intent": intent, "slots": slots }))
                }
            };
            let payload = request(&url, method, params).await?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
    }

    Ok(())
}

/// Send one request and wait for its response frame.
async fn request(url: &str, method: &str, params: Value) -> anyhow::Result<Value> {
    let (mut ws, _) = connect_async(url).await?;
    let frame = json!({ "type": "req", "id": "cli-1", "method": method, "params": params });
    ws.send(Message::Text(frame.to_string().into())).await?;

    while let Some(msg) = ws.next().await {
        let Message::Text(text) = msg? else {
            continue;
        };
        let frame: Value = serde_json::from_str(text.as_str())?;
        if frame["type"] == "res" && frame["id"] == "cli-1" {
            if frame["ok"] == true {
                return Ok(frame["payload"].clone());
            }
            anyhow::bail!(
                "{}: {}",
                frame["error"]["code"].as_str().unwrap_or("error"),
                frame["error"]["message"].as_str().unwrap_or_default()
            );
        }
    }
    anyhow::bail!("connection closed before a response arrived")
}
