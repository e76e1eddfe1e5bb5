//! Error types for the protocol layer.

/// Errors that can occur while decoding wire data.
///
/// Encoding cannot fail: [`BinaryWriter`](crate::BinaryWriter) appends to an
/// owned buffer. Every variant here therefore describes malformed or
/// out-of-contract input, and all of them are fatal for the connection that
/// produced them.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The input ended in the middle of a value.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A ULEB128 integer did not fit the u32 domain.
    #[error("varint exceeds the u32 range")]
    VarIntOverflow,

    /// A length-limited string exceeded its field maximum.
    #[error("string of {len} bytes exceeds the limit of {max}")]
    StringTooLong { len: usize, max: usize },

    /// String bytes were not valid UTF-8.
    #[error("invalid utf-8 in string")]
    InvalidUtf8,

    /// A room id was empty, too long, or contained a disallowed character.
    #[error("invalid room id")]
    InvalidRoomId,

    /// A tagged value carried a tag outside its defined range.
    #[error("unknown {kind} tag {tag}")]
    UnknownTag { kind: &'static str, tag: u8 },
}
