//! Message-of-the-day plugin.
//!
//! Greets every player who joins with the configured message and, at high
//! priority, filters out login requests with blank usernames before the
//! server spends an auth round trip on them.

use async_trait::async_trait;
use quarry_event_system::{
    create_simple_plugin, HandlerConfig, PlayerConnectedEvent, PluginError, Priority,
    ScopedRegistrar, ServerContext, SimplePlugin, UserLoginRequestedEvent,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

pub struct MotdPlugin {
    motd: String,
    greeted: Arc<AtomicU32>,
    context: Arc<RwLock<Option<Arc<dyn ServerContext>>>>,
}

impl MotdPlugin {
    pub fn new() -> Self {
        Self::with_motd("Welcome to the quarry! Mind the falling blocks.")
    }

    pub fn with_motd(motd: &str) -> Self {
        Self {
            motd: motd.to_string(),
            greeted: Arc::new(AtomicU32::new(0)),
            context: Arc::new(RwLock::new(None)),
        }
    }

    pub fn greeted(&self) -> u32 {
        self.greeted.load(Ordering::SeqCst)
    }
}

impl Default for MotdPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SimplePlugin for MotdPlugin {
    fn name(&self) -> &str {
        "motd"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn register_handlers(
        &mut self,
        registrar: Arc<ScopedRegistrar>,
    ) -> Result<(), PluginError> {
        // Sanity filter, early in the chain: a blank username can never
        // authenticate, so cancel before the auth round trip.
        registrar
            .on_core_prioritized(
                "user_login_requested",
                HandlerConfig {
                    priority: Priority::HIGH,
                    ignore_cancelled: false,
                },
                |event: UserLoginRequestedEvent, flow| {
                    if event.username.trim().is_empty() {
                        warn!("📋 Refusing login with blank username from {}", event.remote_addr);
                        flow.cancel();
                    }
                    Ok(())
                },
            )
            .await
            .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;

        // Greet late, after gameplay plugins have seen the join.
        let motd = self.motd.clone();
        let greeted = self.greeted.clone();
        let context = self.context.clone();
        registrar
            .on_core_prioritized(
                "player_connected",
                HandlerConfig {
                    priority: Priority::LOW,
                    ignore_cancelled: false,
                },
                move |event: PlayerConnectedEvent, _flow| {
                    greeted.fetch_add(1, Ordering::SeqCst);
                    let ctx = context.read().ok().and_then(|guard| guard.clone());
                    if let Some(ctx) = ctx {
                        let motd = motd.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                ctx.send_to_player(event.player_id, motd.as_bytes()).await
                            {
                                warn!("📋 Could not deliver MOTD to {}: {}", event.player_id, e);
                            }
                        });
                    }
                    Ok(())
                },
            )
            .await
            .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;

        Ok(())
    }

    async fn on_init(&mut self, context: Arc<dyn ServerContext>) -> Result<(), PluginError> {
        if let Ok(mut guard) = self.context.write() {
            *guard = Some(context);
        }
        info!("📋 MOTD plugin ready: \"{}\"", self.motd);
        Ok(())
    }

    async fn on_shutdown(&mut self, _context: Arc<dyn ServerContext>) -> Result<(), PluginError> {
        info!("📋 MOTD plugin greeted {} player(s)", self.greeted());
        Ok(())
    }
}

create_simple_plugin!(MotdPlugin);

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_event_system::{current_timestamp, EventSystem, PlayerId};

    #[tokio::test(flavor = "multi_thread")]
    async fn blank_usernames_are_cancelled_and_joins_are_counted() {
        let events = Arc::new(EventSystem::new());
        let registrar = Arc::new(ScopedRegistrar::new(events.clone(), "motd"));
        let mut plugin = MotdPlugin::with_motd("hello");
        plugin.register_handlers(registrar).await.unwrap();

        let flow = events
            .emit_core(
                "user_login_requested",
                &UserLoginRequestedEvent {
                    player_id: PlayerId::new(),
                    username: "   ".to_string(),
                    remote_addr: "127.0.0.1:4000".to_string(),
                    timestamp: current_timestamp(),
                },
            )
            .await
            .unwrap();
        assert!(flow.is_cancelled());

        let flow = events
            .emit_core(
                "user_login_requested",
                &UserLoginRequestedEvent {
                    player_id: PlayerId::new(),
                    username: "alice".to_string(),
                    remote_addr: "127.0.0.1:4000".to_string(),
                    timestamp: current_timestamp(),
                },
            )
            .await
            .unwrap();
        assert!(!flow.is_cancelled());

        events
            .emit_core(
                "player_connected",
                &PlayerConnectedEvent {
                    player_id: PlayerId::new(),
                    username: "alice".to_string(),
                    remote_addr: "127.0.0.1:4000".to_string(),
                    timestamp: current_timestamp(),
                },
            )
            .await
            .unwrap();
        assert_eq!(plugin.greeted(), 1);
    }
}
