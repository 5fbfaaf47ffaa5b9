//! Server orchestration: accept loops, the handshake and message routing.

pub mod core;
pub mod handlers;

pub use core::{BoundAddrs, GameServer, ServerStats};
