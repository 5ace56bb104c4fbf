//! # Codec Error Types
//!
//! Everything that can go wrong turning bytes into a message.

use thiserror::Error;

/// Errors produced while encoding or decoding protocol messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer held no bytes at all, not even a tag.
    #[error("empty message")]
    Empty,

    /// The buffer ended before a field could be read.
    #[error("truncated message: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        /// Offset at which the read was attempted.
        offset: usize,
        /// Bytes the field required.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },

    /// The tag byte does not name any message type.
    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),

    /// The tag is valid but its body is not the shape the caller asked for.
    #[error("message type 0x{tag:02x} does not carry a {expected} body")]
    WrongShape {
        /// Tag found in the buffer.
        tag: u8,
        /// Body layout the decoder was asked for.
        expected: &'static str,
    },

    /// The body was fully decoded but bytes remained.
    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),

    /// A string field was not valid UTF-8.
    #[error("field `{0}` is not valid utf-8")]
    InvalidUtf8(&'static str),

    /// A field is too long for its length prefix.
    #[error("field `{field}` is {len} bytes, limit is {max}")]
    FieldTooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Actual length.
        len: usize,
        /// Largest encodable length.
        max: usize,
    },
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
