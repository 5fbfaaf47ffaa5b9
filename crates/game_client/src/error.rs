//! Client error types.

use quarry_net::NetError;
use quarry_protocol::CodecError;

/// Errors produced on the client side of the handshake.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] NetError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The auth server rejected the credentials.
    #[error("login failed: {0}")]
    LoginFailed(String),

    /// The game server denied the connection hail.
    #[error("join denied: {0}")]
    JoinDenied(String),

    /// An operation was called in the wrong auth state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The peer answered with a message the protocol does not allow here.
    #[error("unexpected {0} message")]
    UnexpectedMessage(&'static str),

    /// The auth server did not answer in time.
    #[error("timed out waiting for the auth server")]
    Timeout,
}
