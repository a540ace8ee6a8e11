use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classes reported by a signal bus client.
#[derive(Debug, Error)]
pub enum BusError {
    /// Network, authorization handshake, or stale connection.
    #[error("bus connection error: {0}")]
    Connection(String),

    /// The server answered but refused the request.
    #[error("bus rejected request: {0}")]
    Rejected(String),

    #[error("bus operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The bridge's event loop is gone.
    #[error("bus event loop is not running")]
    LoopClosed,
}

impl BusError {
    /// Whether this failure means the connection can no longer be trusted.
    pub fn drops_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

/// What the client is talking to: the endpoint it dialed and the protocol
/// spoken there. Not every bus can report a server identity, so this is
/// filled from client-side knowledge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub endpoint: String,
    pub protocol: String,
}

/// Asynchronous, connection-stateful signal bus client.
///
/// Implementations are driven from a single task; they never need to be
/// shared between threads.
#[async_trait]
pub trait SignalBusClient: Send + 'static {
    async fn connect(&mut self) -> Result<(), BusError>;

    async fn disconnect(&mut self) -> Result<(), BusError>;

    /// Current value of `path`, or `None` when the signal has no value.
    async fn read(&mut self, path: &str) -> Result<Option<String>, BusError>;

    async fn write(&mut self, path: &str, value: &str) -> Result<(), BusError>;

    async fn server_info(&mut self) -> Result<ServerInfo, BusError>;
}
