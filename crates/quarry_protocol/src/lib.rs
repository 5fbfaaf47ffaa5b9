//! # Quarry Protocol
//!
//! Wire codec shared by every peer in the Quarry session-authentication protocol:
//! the game client, the game server, and the external auth server all speak the
//! same tagged binary message format.
//!
//! ## Framing
//!
//! Every encoded message starts with a one-byte type tag followed by the variant's
//! own field encoding. Strings are u16-length-prefixed UTF-8, integers are
//! little-endian, UUIDs are 16 raw bytes. The transport layer is responsible for
//! delimiting whole messages (length-prefixed frames on TCP, one message per
//! datagram on UDP); the codec always consumes an exact buffer and treats
//! leftover bytes as a protocol violation.
//!
//! ## Context stamping
//!
//! Messages carry a [`MessageContext`] recording whether they were produced by a
//! client or a server. The context never travels on the wire; the receiving side
//! knows who the buffer came from and supplies it to [`Message::decode`]. Encoding
//! stamps the message's context just before writing so a captured message can be
//! replayed with faithful provenance.
//!
//! ## Guarantees
//!
//! * Round-trip: `decode(encode(m, ctx), ctx)` equals `m` in all observable fields.
//! * Fail fast: malformed or truncated buffers produce a [`CodecError`], never a
//!   partially-populated message.

pub mod error;
pub mod message;
pub mod wire;

pub use error::CodecError;
pub use message::{
    AuthInit, AuthLogin, FailedLogin, Init, LevelInfo, Message, MessageBody, MessageContext,
    MessageKind, PingAuth, PluginDownload, PublicKey, Session, ValidSession,
};
pub use wire::{WireReader, WireWriter};

/// Protocol version exchanged in [`AuthLogin`]; bumped on incompatible changes.
pub const PROTOCOL_VERSION: u32 = 3;
