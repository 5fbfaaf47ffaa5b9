//! # Quarry Event System
//!
//! A priority-ordered, type-safe event bus designed for game servers with a plugin
//! architecture. Every decoded wire message and every lifecycle occurrence fans out
//! through this bus to zero or more handlers, in ascending priority order, with
//! cooperative cancellation.
//!
//! ## Core Features
//!
//! - **Type Safety**: events are strongly typed; handlers deserialize exactly the
//!   type they subscribed for
//! - **Priority Ordering**: handlers run in non-decreasing [`Priority`] order
//!   (lower first); ties preserve subscription order
//! - **Cancellation**: a handler may cancel the event; later handlers are skipped
//!   unless they opted in with `ignore_cancelled`; cancellation filters, it never
//!   halts the walk
//! - **Owner Scoping**: every registration records an explicit [`HandlerOwner`]
//!   token, enabling bulk purge when a plugin is disabled or deleted
//! - **Reserved Band**: priorities 0 and 100 belong to the host; plugins subscribe
//!   through a [`ScopedRegistrar`] that rejects them, so the core can always run
//!   strictly first and strictly last
//!
//! There is no global registry of event systems: the host (client or server) owns
//! its [`EventSystem`] instance and hands plugins a scoped capability handle.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quarry_event_system::*;
//! use std::sync::Arc;
//!
//! # #[derive(Debug, serde::Serialize, serde::Deserialize)]
//! # struct BlockPlacedEvent { x: i32, y: i32 }
//! #[tokio::main]
//! async fn main() -> Result<(), EventError> {
//!     let events = Arc::new(EventSystem::new());
//!
//!     events.on_core("player_connected", |event: PlayerConnectedEvent| {
//!         println!("{} connected", event.username);
//!         Ok(())
//!     }).await?;
//!
//!     let registrar = ScopedRegistrar::new(events.clone(), "anti_grief");
//!     registrar.on_client_prioritized(
//!         "world", "block_placed",
//!         HandlerConfig { priority: Priority::HIGH, ignore_cancelled: false },
//!         |event: BlockPlacedEvent, flow| {
//!             if event.y < 0 { flow.cancel(); }
//!             Ok(())
//!         },
//!     ).await?;
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Used by the expansion of `create_simple_plugin!` so plugin crates do not
// need their own `futures` dependency.
pub use futures;

pub mod events;
pub mod plugin;
pub mod priority;
pub mod system;

pub use events::{
    DisconnectReason, Event, EventError, PlayerConnectedEvent, PlayerDisconnectedEvent,
    PluginStatus, PluginStatusChangedEvent, RawClientMessageEvent, UserLoginRequestedEvent,
};
pub use plugin::{LogLevel, Plugin, PluginError, ServerContext, ServerError, SimplePlugin};
pub use priority::{EventFlow, HandlerConfig, HandlerId, HandlerOwner, Priority};
pub use system::{EventSystem, EventSystemStats, ScopedRegistrar};

/// Unique identifier for a player identity, stable across sessions.
///
/// A wrapper around the UUID issued by the auth server, providing type safety so
/// player identities cannot be confused with other IDs in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Creates a new random player ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for PlayerId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returns the current Unix timestamp in seconds.
///
/// All events use this for timestamp generation so timestamps are comparable
/// across the whole system.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
