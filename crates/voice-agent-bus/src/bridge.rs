//! Synchronous facade over an asynchronous signal bus client.
//!
//! One dedicated thread runs a current-thread tokio runtime that owns the
//! client. Callers send a [`Command`] over a channel and block on a
//! oneshot reply; only the loop thread touches the client or mutates the
//! connection state. Every operation is bounded by the configured timeout.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::client::{BusError, ServerInfo, SignalBusClient};

/// Connection state of the bus, as last observed by the loop thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl BusConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
        }
    }
}

enum Command {
    Connect(oneshot::Sender<bool>),
    Disconnect(oneshot::Sender<bool>),
    Read {
        path: String,
        reply: oneshot::Sender<Option<String>>,
    },
    Write {
        path: String,
        value: String,
        reply: oneshot::Sender<bool>,
    },
    ServerInfo(oneshot::Sender<Option<ServerInfo>>),
    Shutdown,
}

/// Process-wide handle to the signal bus. Construct once at startup and
/// share via `Arc`.
///
/// All methods block the calling thread and must not be called from inside
/// an async context; use `tokio::task::spawn_blocking` there.
pub struct SignalBridge {
    tx: mpsc::UnboundedSender<Command>,
    state: Arc<AtomicU8>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SignalBridge {
    /// Start the loop thread that drives `client`.
    pub fn spawn<C: SignalBusClient>(client: C, timeout: Duration) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(BusConnectionState::Disconnected.as_u8()));

        let loop_state = state.clone();
        let thread = std::thread::Builder::new()
            .name("signal-bus".into())
            .spawn(move || {
                runtime.block_on(run_loop(client, rx, loop_state, timeout));
            })?;

        Ok(Self {
            tx,
            state,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn state(&self) -> BusConnectionState {
        BusConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == BusConnectionState::Connected
    }

    /// Attempt a connection. Failures are reported, never retried here.
    pub fn connect(&self) -> bool {
        self.call(Command::Connect).unwrap_or(false)
    }

    pub fn disconnect(&self) -> bool {
        self.call(Command::Disconnect).unwrap_or(false)
    }

    /// Current value of `path`; `None` when absent or on any failure.
    pub fn read(&self, path: &str) -> Option<String> {
        self.call(|reply| Command::Read {
            path: path.to_string(),
            reply,
        })
        .flatten()
    }

    pub fn write(&self, path: &str, value: &str) -> bool {
        self.call(|reply| Command::Write {
            path: path.to_string(),
            value: value.to_string(),
            reply,
        })
        .unwrap_or(false)
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.call(Command::ServerInfo).flatten()
    }

    /// Stop the loop thread and wait for it to exit. Later calls fail.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
        let handle = self.thread.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("signal bus loop thread panicked");
            }
        }
    }

    fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(make(reply_tx)).is_err() {
            warn!(error = %BusError::LoopClosed, "bus command not delivered");
            return None;
        }
        match reply_rx.blocking_recv() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(error = %BusError::LoopClosed, "bus command dropped");
                None
            }
        }
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

fn set_state(state: &AtomicU8, s: BusConnectionState) {
    state.store(s.as_u8(), Ordering::SeqCst);
}

async fn bounded<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T, BusError>>,
) -> Result<T, BusError> {
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or(Err(BusError::Timeout(timeout)))
}

/// Record a failed operation; connection-class failures drop the connection.
fn on_error(state: &AtomicU8, op: &str, e: &BusError) {
    warn!(op, error = %e, "signal bus operation failed");
    if e.drops_connection() {
        set_state(state, BusConnectionState::Disconnected);
    }
}

async fn run_loop<C: SignalBusClient>(
    mut client: C,
    mut rx: mpsc::UnboundedReceiver<Command>,
    state: Arc<AtomicU8>,
    timeout: Duration,
) {
    debug!("signal bus loop started");
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Connect(reply) => {
                set_state(&state, BusConnectionState::Connecting);
                let ok = match bounded(timeout, client.connect()).await {
                    Ok(()) => {
                        set_state(&state, BusConnectionState::Connected);
                        info!("connected to signal bus");
                        true
                    }
                    Err(e) => {
                        on_error(&state, "connect", &e);
                        set_state(&state, BusConnectionState::Disconnected);
                        false
                    }
                };
                let _ = reply.send(ok);
            }
            Command::Disconnect(reply) => {
                let result = bounded(timeout, client.disconnect()).await;
                set_state(&state, BusConnectionState::Disconnected);
                if let Err(e) = &result {
                    warn!(error = %e, "signal bus disconnect failed");
                }
                let _ = reply.send(result.is_ok());
            }
            Command::Read { path, reply } => {
                let value = match bounded(timeout, client.read(&path)).await {
                    Ok(v) => v,
                    Err(e) => {
                        on_error(&state, "read", &e);
                        None
                    }
                };
                let _ = reply.send(value);
            }
            Command::Write { path, value, reply } => {
                let ok = match bounded(timeout, client.write(&path, &value)).await {
                    Ok(()) => true,
                    Err(e) => {
                        on_error(&state, "write", &e);
                        false
                    }
                };
                let _ = reply.send(ok);
            }
            Command::ServerInfo(reply) => {
                let info = match bounded(timeout, client.server_info()).await {
                    Ok(i) => Some(i),
                    Err(e) => {
                        on_error(&state, "server_info", &e);
                        None
                    }
                };
                let _ = reply.send(info);
            }
            Command::Shutdown => break,
        }
    }
    let _ = bounded(timeout, client.disconnect()).await;
    set_state(&state, BusConnectionState::Disconnected);
    debug!("signal bus loop stopped");
}
