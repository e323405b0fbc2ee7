//! Codec-level error type.
//!
//! These errors cover structural problems a pure encoder/decoder can detect
//! on its own: bad hex, oversized fields, a codec invoked for the wrong
//! packet generation. Anything that needs connection state (timeouts,
//! rejections, retry policy) lives in `vaultlink-core`.

use thiserror::Error;

use crate::version::PacketVersion;

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced by the packet codecs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input string was not valid hexadecimal.
    #[error("invalid hex input: {0}")]
    InvalidHex(String),

    /// The codec was invoked for a packet generation it does not speak.
    #[error("operation not supported for packet version {0:?}")]
    UnsupportedVersion(PacketVersion),

    /// Encoder was handed no data where some is required.
    #[error("cannot encode empty data")]
    EmptyData,

    /// A fixed-width field cannot hold the requested value.
    #[error("value {value} does not fit in {bits} bits")]
    FieldOverflow {
        /// Value that was being serialized.
        value: u64,
        /// Width of the destination field.
        bits: u32,
    },

    /// Payload region exceeds what the length prefix can describe.
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Actual payload size in bytes.
        size: usize,
        /// Maximum encodable size.
        max: usize,
    },

    /// A status report carried a field value outside its enum range.
    #[error("invalid {field} value {value:#04x} in status payload")]
    InvalidStatusField {
        /// Name of the offending field.
        field: &'static str,
        /// Raw value read from the wire.
        value: u8,
    },

    /// Decoder ran out of bytes before the structure was complete.
    #[error("truncated input: expected {expected} more bytes, found {actual}")]
    Truncated {
        /// Bytes still required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },
}

impl From<hex::FromHexError> for ProtocolError {
    fn from(err: hex::FromHexError) -> Self {
        Self::InvalidHex(err.to_string())
    }
}
