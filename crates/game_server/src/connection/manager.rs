//! The roster of connected players.

use crate::connection::Player;
use crate::error::ServerError;
use async_trait::async_trait;
use dashmap::DashMap;
use plugin_system::PluginHost;
use quarry_event_system::{EventSystem, PlayerId, ServerError as HostError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Tracks every approved connection, keyed by player identity.
///
/// At most one connection may exist per identity; [`insert`](Self::insert)
/// refuses a second one, which backs the duplicate-login denial.
#[derive(Default)]
pub struct ConnectionManager {
    players: DashMap<PlayerId, Player>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a player to the roster. Returns `false` when the identity is
    /// already connected; the caller denies the newcomer.
    pub fn insert(&self, player: Player) -> bool {
        match self.players.entry(player.player_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!("Player {} joined the roster", player.player_id);
                slot.insert(player);
                true
            }
        }
    }

    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.players.contains_key(&player_id)
    }

    /// Removes a player from the roster, returning it if present.
    pub fn remove(&self, player_id: PlayerId) -> Option<Player> {
        self.players.remove(&player_id).map(|(_, player)| player)
    }

    pub fn count(&self) -> usize {
        self.players.len()
    }

    /// Queues a frame for one player.
    pub fn send_to(&self, player_id: PlayerId, data: Vec<u8>) -> Result<(), ServerError> {
        match self.players.get(&player_id) {
            Some(player) => player.send(data),
            None => Err(ServerError::Network(format!(
                "player {} is not connected",
                player_id
            ))),
        }
    }

    /// Queues a frame for every connected player.
    pub fn broadcast(&self, data: &[u8]) {
        for player in self.players.iter() {
            if let Err(e) = player.send(data.to_vec()) {
                warn!("Broadcast to {} failed: {}", player.player_id, e);
            }
        }
    }

    /// Drains the roster, returning every player for shutdown handling.
    pub fn drain(&self) -> Vec<Player> {
        let ids: Vec<PlayerId> = self.players.iter().map(|p| p.player_id).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

/// [`PluginHost`] implementation wiring plugins to the roster and the bus.
pub struct GameServerHost {
    events: Arc<EventSystem>,
    connections: Arc<ConnectionManager>,
}

impl GameServerHost {
    pub fn new(events: Arc<EventSystem>, connections: Arc<ConnectionManager>) -> Self {
        Self {
            events,
            connections,
        }
    }
}

#[async_trait]
impl PluginHost for GameServerHost {
    fn events(&self) -> Arc<EventSystem> {
        self.events.clone()
    }

    async fn send_to_player(&self, player_id: PlayerId, data: &[u8]) -> Result<(), HostError> {
        self.connections
            .send_to(player_id, data.to_vec())
            .map_err(|e| HostError::Network(e.to_string()))
    }

    async fn broadcast(&self, data: &[u8]) -> Result<(), HostError> {
        self.connections.broadcast(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn player(id: PlayerId, name: &str) -> (Player, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Player::new(id, name.to_string(), "127.0.0.1:9999".parse().unwrap(), tx),
            rx,
        )
    }

    #[test]
    fn second_connection_for_same_identity_is_refused() {
        let manager = ConnectionManager::new();
        let id = PlayerId::new();
        let (first, _rx1) = player(id, "alice");
        let (second, _rx2) = player(id, "alice");

        assert!(manager.insert(first));
        assert!(!manager.insert(second));
        assert_eq!(manager.count(), 1);
    }

    #[test]
    fn send_to_reaches_only_the_addressed_player() {
        let manager = ConnectionManager::new();
        let alice = PlayerId::new();
        let bob = PlayerId::new();
        let (p1, mut rx1) = player(alice, "alice");
        let (p2, mut rx2) = player(bob, "bob");
        manager.insert(p1);
        manager.insert(p2);

        manager.send_to(alice, b"hello".to_vec()).unwrap();
        assert_eq!(rx1.try_recv().unwrap(), b"hello");
        assert!(rx2.try_recv().is_err());

        manager.broadcast(b"all");
        assert_eq!(rx1.try_recv().unwrap(), b"all");
        assert_eq!(rx2.try_recv().unwrap(), b"all");
    }

    #[test]
    fn remove_frees_the_identity_for_reconnection() {
        let manager = ConnectionManager::new();
        let id = PlayerId::new();
        let (p1, _rx1) = player(id, "alice");
        manager.insert(p1);

        assert!(manager.remove(id).is_some());
        let (p2, _rx2) = player(id, "alice");
        assert!(manager.insert(p2));
    }
}
