//! Codec error types.

/// Errors produced while encoding or decoding wire messages.
///
/// Decode errors are protocol violations: the dispatch loop that owns the
/// connection logs them and drops the buffer, it never lets them propagate
/// across the connection boundary.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Buffer ended before the field being read was complete.
    #[error("unexpected end of buffer: needed {needed} more byte(s), {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// Leading type tag does not name any known message kind.
    #[error("unknown message type tag: {0:#04x}")]
    UnknownTag(u8),

    /// String field was not valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    /// String field exceeds the u16 length prefix.
    #[error("string field too long: {0} bytes")]
    StringTooLong(usize),

    /// Collection field exceeds the u16 count prefix.
    #[error("collection field too large: {0} entries")]
    CollectionTooLarge(usize),

    /// Bytes remained after the variant's fields were fully decoded.
    #[error("{0} trailing byte(s) after message body")]
    TrailingBytes(usize),
}
