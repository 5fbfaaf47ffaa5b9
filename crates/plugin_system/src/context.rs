//! Host services handed to plugins.
//!
//! The manager is transport-agnostic; whoever embeds it (server or client)
//! supplies a [`PluginHost`] and the manager wraps it, per plugin, in a
//! [`ServerContext`] carrying that plugin's scoped registrar.

use async_trait::async_trait;
use quarry_event_system::{
    EventSystem, LogLevel, PlayerId, ScopedRegistrar, ServerContext, ServerError,
};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Message delivery services the embedding process provides to its plugins.
#[async_trait]
pub trait PluginHost: Send + Sync {
    /// The shared event bus.
    fn events(&self) -> Arc<EventSystem>;

    /// Sends raw bytes to one connected player.
    async fn send_to_player(&self, player_id: PlayerId, data: &[u8]) -> Result<(), ServerError>;

    /// Sends raw bytes to every connected player.
    async fn broadcast(&self, data: &[u8]) -> Result<(), ServerError>;
}

/// Per-plugin [`ServerContext`] implementation.
///
/// Logging is forwarded to the host's tracing subscriber with the plugin's
/// identifier attached, and every subscription made through this context is
/// stamped with the plugin's owner token.
pub struct PluginContext {
    host: Arc<dyn PluginHost>,
    registrar: Arc<ScopedRegistrar>,
    identifier: String,
}

impl PluginContext {
    pub fn new(host: Arc<dyn PluginHost>, identifier: &str) -> Self {
        let registrar = Arc::new(ScopedRegistrar::new(host.events(), identifier));
        Self {
            host,
            registrar,
            identifier: identifier.to_string(),
        }
    }
}

#[async_trait]
impl ServerContext for PluginContext {
    fn events(&self) -> Arc<EventSystem> {
        self.host.events()
    }

    fn registrar(&self) -> Arc<ScopedRegistrar> {
        self.registrar.clone()
    }

    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => error!(plugin = %self.identifier, "{}", message),
            LogLevel::Warn => warn!(plugin = %self.identifier, "{}", message),
            LogLevel::Info => info!(plugin = %self.identifier, "{}", message),
            LogLevel::Debug => debug!(plugin = %self.identifier, "{}", message),
            LogLevel::Trace => trace!(plugin = %self.identifier, "{}", message),
        }
    }

    async fn send_to_player(&self, player_id: PlayerId, data: &[u8]) -> Result<(), ServerError> {
        self.host.send_to_player(player_id, data).await
    }

    async fn broadcast(&self, data: &[u8]) -> Result<(), ServerError> {
        self.host.broadcast(data).await
    }
}
