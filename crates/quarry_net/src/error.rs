//! Transport error types.

/// Errors produced by the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame length prefix exceeds the protocol maximum.
    #[error("frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// Datagram payload exceeds what a single datagram can carry.
    #[error("datagram of {0} bytes exceeds maximum size")]
    DatagramTooLarge(usize),

    /// Peer closed the connection mid-frame or before the handshake finished.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The hail response frame carried an unknown verdict byte.
    #[error("malformed hail response (verdict byte {0:#04x})")]
    InvalidHailResponse(u8),

    /// The remote side denied the connection hail.
    #[error("connection denied: {0}")]
    HailDenied(String),
}
