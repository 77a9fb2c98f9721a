//! Error types for the codec.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The input ended before the expected data.
    #[error("unexpected end of input at offset {offset}")]
    Truncated {
        /// Offset at which more bytes were expected.
        offset: usize,
    },

    /// A field name or string value was not valid UTF-8.
    #[error("invalid UTF-8 in encoded string at offset {offset}")]
    InvalidUtf8 {
        /// Offset of the offending string.
        offset: usize,
    },

    /// An unrecognized value-kind tag was encountered.
    #[error("unknown value kind tag {tag:#04x}")]
    UnknownKind {
        /// The tag byte that was read.
        tag: u8,
    },

    /// Bytes remained after the payload was fully decoded.
    #[error("{count} trailing bytes after payload")]
    TrailingBytes {
        /// Number of unconsumed bytes.
        count: usize,
    },

    /// A field name or value exceeds what the wire format can carry.
    #[error("{what} too large to encode")]
    Oversized {
        /// Description of the oversized element.
        what: &'static str,
    },
}

impl CodecError {
    /// Creates a truncation error at the given offset.
    pub(crate) fn truncated(offset: usize) -> Self {
        Self::Truncated { offset }
    }
}
