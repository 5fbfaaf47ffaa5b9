//! # Quarry Net
//!
//! Transport abstraction for the Quarry protocol. Two logical channels exist
//! per peer:
//!
//! * a **connection-oriented** channel ([`FramedConnection`]): reliable,
//!   ordered, length-prefixed frames over TCP between a client and its game
//!   server, established through a hail handshake the receiving side can
//!   approve or deny;
//! * a **connectionless** channel ([`DatagramChannel`]): UDP datagrams
//!   addressed by explicit `host:port` with no ordering or delivery guarantee,
//!   used between a peer and the auth server.
//!
//! The transports move opaque byte buffers; encoding and decoding belong to
//! `quarry_protocol`. Faults on an established connection surface as errors the
//! owner turns into a disconnect with a reason, never a panic.

pub mod datagram;
pub mod error;
pub mod framed;

pub use datagram::DatagramChannel;
pub use error::NetError;
pub use framed::FramedConnection;

/// Lifecycle status of a transport channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Created but not yet usable.
    Starting,
    /// Bound/connected and moving bytes.
    Running,
    /// Closed; no further traffic.
    Disconnected,
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}
