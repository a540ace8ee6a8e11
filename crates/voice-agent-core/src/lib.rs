//! Core types, config, errors, and wire protocol for the voice agent.

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

/// Generate a short correlation id (hex, `len` characters, at most 32).
pub fn short_id(len: usize) -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(len.min(32));
    id
}
