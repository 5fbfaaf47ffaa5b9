//! # Quarry Game Client
//!
//! Client side of the three-party handshake: login against the auth server
//! over the connectionless channel, session request, then the TCP hail to
//! the game server. See [`AuthClient`] for the state machine.

pub mod auth;
pub mod connection;
pub mod error;

pub use auth::{AuthClient, Identity};
pub use connection::GameConnection;
pub use error::ClientError;
