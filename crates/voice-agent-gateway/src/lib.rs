//! Voice agent gateway: the WebSocket RPC surface and the orchestration
//! behind it.
//!
//! Requests arrive as JSON frames on `/ws`. Each one is dispatched on its
//! own task; blocking work (recording, recognition, signal bus calls) runs
//! on tokio's blocking pool.

pub mod connection;
pub mod methods;
pub mod server;
pub mod session;
pub mod state;
pub mod voice;

pub use server::start_gateway;
pub use session::{SessionError, SessionTable};
pub use state::{ConnectionState, GatewayState};
