//! Server error types.

use quarry_event_system::{EventError, PluginError};
use quarry_net::NetError;
use quarry_protocol::CodecError;

/// Errors produced by the game server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Socket setup failures; fatal to startup.
    #[error("network error: {0}")]
    Network(String),

    #[error("transport error: {0}")]
    Transport(#[from] NetError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("event system error: {0}")]
    Event(#[from] EventError),

    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("internal error: {0}")]
    Internal(String),
}
