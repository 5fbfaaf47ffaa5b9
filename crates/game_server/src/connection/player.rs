//! A connected, authenticated player.

use crate::error::ServerError;
use quarry_event_system::PlayerId;
use std::net::SocketAddr;
use std::time::SystemTime;
use tokio::sync::mpsc;

/// One approved connection in the roster.
///
/// Outbound frames go through an unbounded channel drained by the
/// connection's writer task, so any task holding the roster can send without
/// waiting on the peer's socket.
#[derive(Debug)]
pub struct Player {
    pub player_id: PlayerId,
    pub username: String,
    pub remote_addr: SocketAddr,
    pub connected_at: SystemTime,
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

impl Player {
    pub fn new(
        player_id: PlayerId,
        username: String,
        remote_addr: SocketAddr,
        sender: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Self {
        Self {
            player_id,
            username,
            remote_addr,
            connected_at: SystemTime::now(),
            sender,
        }
    }

    /// Queues one frame for delivery to this player.
    pub fn send(&self, data: Vec<u8>) -> Result<(), ServerError> {
        self.sender
            .send(data)
            .map_err(|_| ServerError::Network(format!("connection to {} is gone", self.player_id)))
    }
}
