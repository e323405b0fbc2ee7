//! Packet generations and their per-version wire constants.
//!
//! A connection speaks exactly one generation, chosen once during the SDK
//! handshake and immutable afterwards. The constants below are firmware
//! contracts, not tunables: changing a start-of-frame marker or a chunk size
//! breaks interop with shipped devices.

use std::time::Duration;

/// The three packet framing dialects spoken by the device family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PacketVersion {
    /// Legacy byte-stuffed framing, 8-bit command type.
    V1,
    /// Legacy byte-stuffed framing, 32-bit command type.
    V2,
    /// Typed framed packets with sequence numbers and acknowledgements.
    V3,
}

impl PacketVersion {
    /// Wire constants for this generation.
    #[must_use]
    pub fn config(self) -> &'static PacketConfig {
        match self {
            Self::V1 => &V1_CONFIG,
            Self::V2 => &V2_CONFIG,
            Self::V3 => &V3_CONFIG,
        }
    }

    /// True for the byte-stuffed legacy generations.
    #[must_use]
    pub fn is_legacy(self) -> bool {
        matches!(self, Self::V1 | Self::V2)
    }
}

/// Per-generation wire and timing constants.
#[derive(Debug, Clone)]
pub struct PacketConfig {
    /// Start-of-frame marker bytes.
    pub start_of_frame: &'static [u8],
    /// Maximum payload chunk per frame, in raw bytes.
    pub chunk_size: usize,
    /// Byte value escaped by the stuffing codec (legacy generations only).
    pub stuffing_byte: u8,
    /// Width of the legacy command-type field in bits.
    pub command_type_bits: u32,
    /// Time to wait for a frame acknowledgement.
    pub ack_timeout: Duration,
    /// Poll interval while waiting for an acknowledgement.
    pub recheck_interval: Duration,
    /// Time to wait for the device to report an idle state (v3 only).
    pub idle_timeout: Duration,
    /// Poll interval of the idle wait loop (v3 only).
    pub idle_recheck_interval: Duration,
    /// Time to wait for a command response frame (v3 only).
    pub cmd_response_timeout: Duration,
}

static V1_CONFIG: PacketConfig = PacketConfig {
    start_of_frame: &[0xAA],
    chunk_size: 32,
    stuffing_byte: 0xAA,
    command_type_bits: 8,
    ack_timeout: Duration::from_millis(2000),
    recheck_interval: Duration::from_millis(50),
    idle_timeout: Duration::from_millis(4000),
    idle_recheck_interval: Duration::from_millis(200),
    cmd_response_timeout: Duration::from_millis(2000),
};

static V2_CONFIG: PacketConfig = PacketConfig {
    start_of_frame: &[0x5A, 0x5A],
    chunk_size: 32,
    stuffing_byte: 0x5A,
    command_type_bits: 32,
    ack_timeout: Duration::from_millis(2000),
    recheck_interval: Duration::from_millis(50),
    idle_timeout: Duration::from_millis(4000),
    idle_recheck_interval: Duration::from_millis(200),
    cmd_response_timeout: Duration::from_millis(2000),
};

static V3_CONFIG: PacketConfig = PacketConfig {
    start_of_frame: &[0x55, 0x55],
    chunk_size: 48,
    stuffing_byte: 0x5A,
    command_type_bits: 32,
    ack_timeout: Duration::from_millis(2000),
    recheck_interval: Duration::from_millis(2),
    idle_timeout: Duration::from_millis(4000),
    idle_recheck_interval: Duration::from_millis(200),
    cmd_response_timeout: Duration::from_millis(2000),
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_sizes_match_the_wire_contract() {
        assert_eq!(PacketVersion::V1.config().chunk_size, 32);
        assert_eq!(PacketVersion::V2.config().chunk_size, 32);
        assert_eq!(PacketVersion::V3.config().chunk_size, 48);
    }

    #[test]
    fn start_of_frame_markers() {
        assert_eq!(PacketVersion::V1.config().start_of_frame, &[0xAA]);
        assert_eq!(PacketVersion::V2.config().start_of_frame, &[0x5A, 0x5A]);
        assert_eq!(PacketVersion::V3.config().start_of_frame, &[0x55, 0x55]);
    }

    #[test]
    fn legacy_classification() {
        assert!(PacketVersion::V1.is_legacy());
        assert!(PacketVersion::V2.is_legacy());
        assert!(!PacketVersion::V3.is_legacy());
    }
}
