//! Event trait, shared lifecycle event types and bus errors.

use crate::PlayerId;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::any::Any;

/// Core trait all events implement: serialization for dispatch plus dynamic
/// typing support. A blanket implementation covers any `Serialize +
/// DeserializeOwned + Debug` type, so most events just derive the serde traits.
pub trait Event: Send + Sync + Any + std::fmt::Debug {
    fn type_name() -> &'static str
    where
        Self: Sized;

    fn serialize(&self) -> Result<Vec<u8>, EventError>;

    fn deserialize(data: &[u8]) -> Result<Self, EventError>
    where
        Self: Sized;

    fn as_any(&self) -> &dyn Any;
}

impl<T> Event for T
where
    T: Serialize + DeserializeOwned + Send + Sync + Any + std::fmt::Debug + 'static,
{
    fn type_name() -> &'static str {
        std::any::type_name::<T>()
    }

    fn serialize(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(EventError::Serialization)
    }

    fn deserialize(data: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(data).map_err(EventError::Deserialization)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Errors that can occur during event system operations.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// Serialization failed when converting an event to bytes.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Deserialization failed when converting bytes to an event.
    #[error("deserialization error: {0}")]
    Deserialization(serde_json::Error),
    /// Handler execution failed during event processing.
    #[error("handler execution error: {0}")]
    HandlerExecution(String),
    /// Priority value outside the `[0, 100]` range.
    #[error("invalid priority value: {0} (must be 0..=100)")]
    InvalidPriority(u8),
    /// A non-host subscriber asked for a reserved priority.
    #[error("priority {0} is reserved for the host")]
    ReservedPriority(u8),
}

// ============================================================================
// Core Lifecycle Events
// ============================================================================

/// Emitted when a connection attempt arrives with an identity hail, before any
/// validation. The host's reserved-initial handler performs the duplicate-login
/// check here and cancels the event to short-circuit the auth round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserLoginRequestedEvent {
    pub player_id: PlayerId,
    pub username: String,
    pub remote_addr: String,
    pub timestamp: u64,
}

/// Emitted when a player's connection has been approved and they joined the
/// roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConnectedEvent {
    pub player_id: PlayerId,
    pub username: String,
    pub remote_addr: String,
    pub timestamp: u64,
}

/// Emitted when a player leaves the roster, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerDisconnectedEvent {
    pub player_id: PlayerId,
    pub username: String,
    pub reason: DisconnectReason,
    pub timestamp: u64,
}

/// Why a player's connection ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Player initiated the disconnect (normal logout).
    ClientDisconnect,
    /// Connection timed out.
    Timeout,
    /// Server is shutting down gracefully.
    ServerShutdown,
    /// The connection was denied or dropped with a human-readable reason.
    Kicked(String),
    /// A transport fault forced the disconnect.
    Error(String),
}

/// Lifecycle state of a plugin record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginStatus {
    /// Metadata read from disk; module not active.
    Discovered,
    /// Module activated and handlers registered.
    Loaded,
    /// Handlers purged; metadata-only stub remains.
    Disabled,
    /// Metadata and files removed.
    Deleted,
}

/// Emitted by the plugin lifecycle manager on every state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginStatusChangedEvent {
    pub identifier: String,
    pub name: String,
    pub status: PluginStatus,
    pub timestamp: u64,
}

/// A decoded inbound message routed to plugins without the core interpreting
/// its gameplay meaning. `message_kind` names the wire variant; `data` is the
/// variant's encoded body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawClientMessageEvent {
    pub player_id: PlayerId,
    pub message_kind: String,
    pub data: Vec<u8>,
    pub timestamp: u64,
}
