//! # Quarry Game Server
//!
//! The game-server side of the three-party session handshake plus the
//! infrastructure around it: the connection roster, the pending-session
//! correlation table, plugin hosting and routing of inbound messages onto
//! the event bus.
//!
//! The handshake is deliberately narrow. A client's hail carries only the
//! public half of its identity token; the server never sees credentials. It
//! forwards the public key to the auth server over the connectionless
//! channel, parks the login in the pending-session table and acts solely on
//! the correlated `ValidSession` verdict, authenticated by sender address.

pub mod config;
pub mod connection;
pub mod error;
pub mod server;
pub mod session;

pub use config::{LevelSummary, ServerConfig};
pub use connection::{ConnectionManager, Player};
pub use error::ServerError;
pub use server::{BoundAddrs, GameServer, ServerStats};
pub use session::{PendingSession, PendingSessionTable, SessionVerdict};
