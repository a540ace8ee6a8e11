//! Signal bus access for the voice agent.
//!
//! [`SignalBusClient`] is the asynchronous, connection-stateful client
//! interface; [`VisClient`] implements it over VISS v2 WebSockets.
//! [`SignalBridge`] owns the single event-loop thread that drives a client
//! and exposes blocking operations to request-handling threads.

pub mod bridge;
pub mod client;
pub mod vis;

pub use bridge::{BusConnectionState, SignalBridge};
pub use client::{BusError, ServerInfo, SignalBusClient};
pub use vis::VisClient;
