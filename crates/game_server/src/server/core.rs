//! Core game server implementation.
//!
//! `GameServer` owns every long-lived component: the event bus, the roster,
//! the pending-session table, the plugin manager and both transport channels.
//! It contains no game logic; gameplay behavior lives in plugins reached
//! through the event bus.

use crate::config::ServerConfig;
use crate::connection::{ConnectionManager, GameServerHost};
use crate::error::ServerError;
use crate::server::handlers::{self, ServerShared};
use crate::session::{PendingSessionTable, SessionVerdict};
use futures::stream::{FuturesUnordered, StreamExt};
use plugin_system::PluginManager;
use quarry_event_system::{
    EventFlow, EventSystem, EventSystemStats, HandlerConfig, HandlerOwner, PlayerConnectedEvent,
    PlayerDisconnectedEvent, Priority, UserLoginRequestedEvent,
};
use quarry_net::DatagramChannel;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::time::interval;
use tracing::{error, info, warn};

/// Addresses the server actually bound, for callers that configured port 0.
#[derive(Debug, Clone, Copy)]
pub struct BoundAddrs {
    pub connection: SocketAddr,
    pub datagram: SocketAddr,
}

/// Snapshot of server counters for the console `stats` command.
#[derive(Debug, Clone)]
pub struct ServerStats {
    pub player_count: usize,
    pub pending_sessions: usize,
    pub plugin_count: usize,
    pub events: EventSystemStats,
}

/// The game server.
pub struct GameServer {
    config: ServerConfig,
    events: Arc<EventSystem>,
    connections: Arc<ConnectionManager>,
    sessions: Arc<PendingSessionTable>,
    plugin_manager: Arc<PluginManager>,
    shutdown_sender: broadcast::Sender<()>,
    bound: watch::Sender<Option<BoundAddrs>>,
}

impl GameServer {
    pub fn new(config: ServerConfig) -> Self {
        let events = Arc::new(EventSystem::new());
        let connections = Arc::new(ConnectionManager::new());
        let sessions = Arc::new(PendingSessionTable::new());
        let host = Arc::new(GameServerHost::new(events.clone(), connections.clone()));
        let plugin_manager = Arc::new(PluginManager::new(host, config.plugin_directory.clone()));
        let (shutdown_sender, _) = broadcast::channel(1);
        let (bound, _) = watch::channel(None);

        Self {
            config,
            events,
            connections,
            sessions,
            plugin_manager,
            shutdown_sender,
            bound,
        }
    }

    /// Runs the server until shutdown: core handlers, plugins, both
    /// transport channels, the session sweep and the accept loop(s).
    pub async fn start(&self) -> Result<(), ServerError> {
        info!("🚀 Starting game server on {}", self.config.bind_address);

        self.register_core_handlers().await?;

        info!(
            "🔌 Loading plugins from: {}",
            self.config.plugin_directory.display()
        );
        let plugin_count = self.plugin_manager.load_all().await?;
        if plugin_count > 0 {
            info!("🎉 {} plugin(s) active", plugin_count);
        } else {
            info!("📭 No plugins loaded");
        }

        let datagram = DatagramChannel::bind(self.config.datagram_bind_address).await?;
        let datagram_addr = datagram.local_addr()?;
        info!(
            "📡 Auth channel bound on {} (trusting {})",
            datagram_addr, self.config.auth_endpoint
        );

        let shared = Arc::new(ServerShared {
            config: self.config.clone(),
            events: self.events.clone(),
            connections: self.connections.clone(),
            sessions: self.sessions.clone(),
            datagram,
        });

        tokio::spawn(handlers::run_auth_listener(
            shared.clone(),
            self.shutdown_sender.subscribe(),
        ));
        tokio::spawn(run_session_sweep(
            shared.clone(),
            self.shutdown_sender.subscribe(),
        ));

        let listeners = self.build_listeners()?;
        let connection_addr = listeners[0]
            .local_addr()
            .map_err(|e| ServerError::Network(format!("listener address unavailable: {e}")))?;
        self.bound.send_replace(Some(BoundAddrs {
            connection: connection_addr,
            datagram: datagram_addr,
        }));

        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        let mut accept_futures = listeners
            .into_iter()
            .map(|listener| {
                let shared = shared.clone();
                async move {
                    loop {
                        match listener.accept().await {
                            Ok((stream, addr)) => {
                                let shared = shared.clone();
                                tokio::spawn(async move {
                                    if let Err(e) =
                                        handlers::handle_connection(stream, addr, shared).await
                                    {
                                        error!("Connection error from {}: {}", addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                                break;
                            }
                        }
                    }
                }
            })
            .collect::<FuturesUnordered<_>>();

        tokio::select! {
            _ = accept_futures.next() => {}
            _ = shutdown_receiver.recv() => {
                info!("Shutdown signal received");
            }
        }

        info!("🧹 Performing server cleanup...");
        self.plugin_manager.shutdown().await;
        for player in self.connections.drain() {
            let event = PlayerDisconnectedEvent {
                player_id: player.player_id,
                username: player.username.clone(),
                reason: quarry_event_system::DisconnectReason::ServerShutdown,
                timestamp: quarry_event_system::current_timestamp(),
            };
            if let Err(e) = self.events.emit_core("player_disconnected", &event).await {
                error!("Failed to emit disconnect for {}: {}", player.player_id, e);
            }
        }
        shared.datagram.shutdown();
        info!("✅ Server cleanup completed");
        Ok(())
    }

    /// Signals every loop to stop; `start` performs the cleanup.
    pub fn shutdown(&self) {
        let _ = self.shutdown_sender.send(());
    }

    /// The addresses `start` bound. Available once startup reached the
    /// accept loop; useful when the config requested port 0.
    pub async fn bound_addrs(&self) -> Result<BoundAddrs, ServerError> {
        let mut receiver = self.bound.subscribe();
        let value = receiver
            .wait_for(|v| v.is_some())
            .await
            .map_err(|_| ServerError::Internal("server was dropped before binding".to_string()))?;
        (*value).ok_or_else(|| ServerError::Internal("bound addresses missing".to_string()))
    }

    pub fn events(&self) -> Arc<EventSystem> {
        self.events.clone()
    }

    pub async fn get_stats(&self) -> ServerStats {
        ServerStats {
            player_count: self.connections.count(),
            pending_sessions: self.sessions.len().await,
            plugin_count: self.plugin_manager.active_count().await,
            events: self.events.get_stats().await,
        }
    }

    /// Registers core infrastructure handlers. The duplicate-login check runs
    /// at the reserved initial priority so it always sees the event first and
    /// can cancel before any plugin or the auth round trip.
    async fn register_core_handlers(&self) -> Result<(), ServerError> {
        let connections = self.connections.clone();
        self.events
            .on_core_prioritized(
                "user_login_requested",
                HandlerOwner::core(),
                HandlerConfig {
                    priority: Priority::INTERNAL_INITIAL,
                    ignore_cancelled: false,
                },
                move |event: UserLoginRequestedEvent, flow: &EventFlow| {
                    if connections.contains(event.player_id) {
                        warn!(
                            "⛔ {} ({}) is already connected, cancelling login",
                            event.username, event.player_id
                        );
                        flow.cancel();
                    }
                    Ok(())
                },
            )
            .await?;

        self.events
            .on_core("player_connected", |event: PlayerConnectedEvent| {
                info!(
                    "👋 Player {} connected from {}",
                    event.player_id, event.remote_addr
                );
                Ok(())
            })
            .await?;

        self.events
            .on_core("player_disconnected", |event: PlayerDisconnectedEvent| {
                info!(
                    "👋 Player {} disconnected ({:?})",
                    event.player_id, event.reason
                );
                Ok(())
            })
            .await?;

        Ok(())
    }

    /// Creates the TCP listener(s). With `use_reuse_port` the kernel balances
    /// accepts across one listener per CPU core.
    fn build_listeners(&self) -> Result<Vec<TcpListener>, ServerError> {
        let core_count = num_cpus::get();
        let num_acceptors = if self.config.use_reuse_port {
            core_count
        } else {
            1
        };
        info!(
            "🧠 Detected {} CPU cores, using {} acceptor(s)",
            core_count, num_acceptors
        );

        let domain = if self.config.bind_address.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let mut listeners = Vec::with_capacity(num_acceptors);
        for i in 0..num_acceptors {
            let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
                .map_err(|e| ServerError::Network(format!("socket creation failed: {e}")))?;
            socket.set_reuse_address(true).ok();

            if self.config.use_reuse_port {
                #[cfg(unix)]
                if let Err(e) = socket.set_reuse_port(true) {
                    warn!("Failed to set SO_REUSEPORT: {}", e);
                }
                #[cfg(not(unix))]
                warn!("SO_REUSEPORT is not supported on this platform");
            }

            socket
                .bind(&self.config.bind_address.into())
                .map_err(|e| ServerError::Network(format!("bind failed: {e}")))?;
            socket
                .listen(1024)
                .map_err(|e| ServerError::Network(format!("listen failed: {e}")))?;

            let std_listener: StdTcpListener = socket.into();
            std_listener.set_nonblocking(true).ok();
            let listener = TcpListener::from_std(std_listener)
                .map_err(|e| ServerError::Network(format!("listener registration failed: {e}")))?;
            listeners.push(listener);
            info!("✅ Listener {} bound on {}", i, self.config.bind_address);
        }
        Ok(listeners)
    }
}

/// Denies and evicts pending logins that outlived the configured timeout.
async fn run_session_sweep(shared: Arc<ServerShared>, mut shutdown: broadcast::Receiver<()>) {
    let max_age = Duration::from_secs(shared.config.pending_session_timeout_secs);
    let mut ticker = interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                for stale in shared.sessions.evict_older_than(max_age).await {
                    warn!(
                        "⏰ Pending session for {} timed out after {:?}",
                        stale.username, max_age
                    );
                    let _ = stale
                        .verdict_tx
                        .send(SessionVerdict::Denied("authentication timed out".to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Player;
    use quarry_event_system::{current_timestamp, PlayerId};
    use tokio::sync::mpsc;

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_login_is_cancelled_before_auth() {
        let server = GameServer::new(ServerConfig::default());
        server.register_core_handlers().await.unwrap();

        let player_id = PlayerId::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        server.connections.insert(Player::new(
            player_id,
            "alice".to_string(),
            "127.0.0.1:5000".parse().unwrap(),
            tx,
        ));

        let flow = server
            .events
            .emit_core(
                "user_login_requested",
                &UserLoginRequestedEvent {
                    player_id,
                    username: "alice".to_string(),
                    remote_addr: "127.0.0.1:5001".to_string(),
                    timestamp: current_timestamp(),
                },
            )
            .await
            .unwrap();
        assert!(flow.is_cancelled());

        // An unknown identity passes through uncancelled.
        let flow = server
            .events
            .emit_core(
                "user_login_requested",
                &UserLoginRequestedEvent {
                    player_id: PlayerId::new(),
                    username: "bob".to_string(),
                    remote_addr: "127.0.0.1:5002".to_string(),
                    timestamp: current_timestamp(),
                },
            )
            .await
            .unwrap();
        assert!(!flow.is_cancelled());
    }
}
