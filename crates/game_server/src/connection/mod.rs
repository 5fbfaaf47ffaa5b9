//! Connection management for client connections.
//!
//! A [`Player`] exists only after the hail handshake was approved; everything
//! before that point lives in the pending-session table.

pub mod manager;
pub mod player;

pub use manager::{ConnectionManager, GameServerHost};
pub use player::Player;
