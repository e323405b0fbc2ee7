//! Hex parsing and fixed-width integer serialization.
//!
//! The reference wire format is specified in hex characters; this crate
//! operates on raw bytes internally and only touches strings at API
//! boundaries (firmware images, the SDK-version handshake reply). The
//! helpers here are strict: anything that is not clean hexadecimal is an
//! error, never a silent truncation.

use sha2::{Digest, Sha256};

use crate::errors::{ProtocolError, Result};

/// True when `input` is entirely hexadecimal (an optional `0x` prefix and
/// the empty string are accepted).
#[must_use]
pub fn is_hex(input: &str) -> bool {
    let trimmed = input.strip_prefix("0x").unwrap_or(input);
    trimmed.chars().all(|c| c.is_ascii_hexdigit())
}

/// Normalize a hex string: strip an optional `0x` prefix and left-pad an
/// odd-length string with a single `0`.
pub fn format_hex(input: &str) -> Result<String> {
    let trimmed = input.strip_prefix("0x").unwrap_or(input);

    if !is_hex(trimmed) {
        return Err(ProtocolError::InvalidHex(input.to_string()));
    }

    if trimmed.len() % 2 != 0 {
        Ok(format!("0{trimmed}"))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Decode a hex string into bytes. Case-insensitive; odd lengths are
/// left-padded; empty input yields an empty vector.
pub fn hex_to_bytes(input: &str) -> Result<Vec<u8>> {
    let normalized = format_hex(input)?;
    Ok(hex::decode(normalized)?)
}

/// Encode bytes as lowercase hex.
#[must_use]
pub fn bytes_to_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Serialize an integer as a big-endian field of `bits` width.
///
/// `bits` must be a multiple of 8. Negative inputs are stored in two's
/// complement at that width, matching the firmware's serializer.
pub fn serialize_uint(value: i64, bits: u32) -> Result<Vec<u8>> {
    debug_assert!(bits % 8 == 0, "field width must be whole bytes");

    let width = (bits / 8) as usize;
    let unsigned = if value < 0 {
        // Two's complement within the field width.
        let modulus = 1u128 << bits;
        (modulus - (u128::from(value.unsigned_abs()) % modulus)) % modulus
    } else {
        value as u128
    };

    if bits < 128 && unsigned >> bits != 0 {
        return Err(ProtocolError::FieldOverflow { value: value as u64, bits });
    }

    let full = unsigned.to_be_bytes();
    Ok(full[full.len() - width..].to_vec())
}

/// SHA-256 digest of `data`.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Read a big-endian unsigned integer of up to 8 bytes from a slice.
///
/// Used by the decoders, which have already bounds-checked the slice.
#[must_use]
pub(crate) fn read_be_uint(bytes: &[u8]) -> u64 {
    debug_assert!(bytes.len() <= 8);
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}
