//! The v3 framed packet codec.
//!
//! A v3 frame on the wire:
//!
//! ```text
//! +--------+-------+---------+-------+-------+------+-----------+--------+----------+
//! | SOF    | CRC16 | current | total | seq   | type | timestamp | length | payload  |
//! | 0x5555 | 2 B   | 2 B     | 2 B   | 2 B   | 1 B  | 4 B       | 1 B    | <= 48 B  |
//! +--------+-------+---------+-------+-------+------+-----------+--------+----------+
//! ```
//!
//! The CRC covers every field after itself (current packet number through
//! payload). Payloads larger than one chunk are split across frames sharing
//! a sequence number; the `(current, total)` pair drives reassembly, never
//! arrival order.
//!
//! Decoding is defensive: the decoder scans for the start-of-frame marker,
//! stops quietly when the buffer runs short mid-frame, and records
//! structural problems (bad CRC, inconsistent packet numbers) per packet in
//! [`DecodedPacket::issues`] instead of failing the whole buffer. A single
//! `receive()` buffer may contain several frames.

use std::fmt;

use bytes::Bytes;

use crate::{
    checksum::crc16,
    errors::{ProtocolError, Result},
    hexutil::read_be_uint,
    version::PacketVersion,
};

/// Sequence number reserved for STATUS traffic, which is not tied to any
/// command. Canonical form of the `-1` placeholder in older host software.
pub const STATUS_SEQUENCE_NUMBER: u16 = 0xFFFF;

/// Length of the fields between the CRC and the payload.
const HEADER_AFTER_CRC: usize = 2 + 2 + 2 + 1 + 4 + 1;

/// Typed v3 packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Host requests a status report.
    StatusReq = 1,
    /// Host sends application command data.
    Cmd = 2,
    /// Host requests one fragment of the command output.
    CmdOutputReq = 3,
    /// Device status report (may arrive unsolicited).
    Status = 4,
    /// Device acknowledges a `Cmd` fragment.
    CmdAck = 5,
    /// Device returns one fragment of the command output.
    CmdOutput = 6,
    /// Device rejects the last write; payload carries a [`RejectReason`].
    Error = 7,
    /// Host aborts the command currently being serviced.
    Abort = 8,
}

impl PacketType {
    /// Wire value of this packet type.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire value. `None` for unknown types.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::StatusReq),
            2 => Some(Self::Cmd),
            3 => Some(Self::CmdOutputReq),
            4 => Some(Self::Status),
            5 => Some(Self::CmdAck),
            6 => Some(Self::CmdOutput),
            7 => Some(Self::Error),
            8 => Some(Self::Abort),
            _ => None,
        }
    }
}

/// Reason byte carried in the payload of an [`PacketType::Error`] frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RejectReason {
    /// No error (should not appear in a rejection).
    NoError = 0,
    /// Frame failed the CRC check on the device.
    ChecksumError = 1,
    /// Device is still busy with the previous command.
    BusyPreviousCmd = 2,
    /// Chunk arrived out of order.
    OutOfOrderChunk = 3,
    /// Total chunk count was inconsistent.
    InvalidChunkCount = 4,
    /// Sequence number did not match the command being serviced.
    InvalidSequenceNo = 5,
    /// Payload length field was invalid.
    InvalidPayloadLength = 6,
    /// Application buffer on the device is blocked.
    AppBufferBlocked = 7,
    /// Host requested a chunk past the end of the output.
    NoMoreChunks = 8,
    /// Packet type was not valid in the current state.
    InvalidPacketType = 9,
    /// Requested chunk number was invalid.
    InvalidChunkNo = 10,
    /// Frame ended before the declared payload.
    IncompletePacket = 11,
}

impl RejectReason {
    /// Parse a wire value. `None` for unknown reasons.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NoError),
            1 => Some(Self::ChecksumError),
            2 => Some(Self::BusyPreviousCmd),
            3 => Some(Self::OutOfOrderChunk),
            4 => Some(Self::InvalidChunkCount),
            5 => Some(Self::InvalidSequenceNo),
            6 => Some(Self::InvalidPayloadLength),
            7 => Some(Self::AppBufferBlocked),
            8 => Some(Self::NoMoreChunks),
            9 => Some(Self::InvalidPacketType),
            10 => Some(Self::InvalidChunkNo),
            11 => Some(Self::IncompletePacket),
            _ => None,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NoError => "no error",
            Self::ChecksumError => "checksum error",
            Self::BusyPreviousCmd => "device is busy on previous command",
            Self::OutOfOrderChunk => "chunk out of order",
            Self::InvalidChunkCount => "invalid chunk count",
            Self::InvalidSequenceNo => "invalid sequence number",
            Self::InvalidPayloadLength => "invalid payload length",
            Self::AppBufferBlocked => "application buffer blocked",
            Self::NoMoreChunks => "no more chunks",
            Self::InvalidPacketType => "invalid packet type",
            Self::InvalidChunkNo => "invalid chunk number",
            Self::IncompletePacket => "incomplete packet",
        };
        f.write_str(msg)
    }
}

/// Structural problem found while decoding a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeIssue {
    /// Recomputed CRC did not match the frame's CRC field.
    InvalidCrc,
    /// `current_packet_number` exceeded `total_packet_number`.
    PacketNumberOverflow,
}

impl fmt::Display for DecodeIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCrc => f.write_str("invalid crc"),
            Self::PacketNumberOverflow => {
                f.write_str("current packet number is greater than total packet number")
            },
        }
    }
}

/// One decoded v3 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    /// 1-based index of this fragment.
    pub current_packet_number: u16,
    /// Total fragments in the message.
    pub total_packet_number: u16,
    /// Sequence number being serviced ([`STATUS_SEQUENCE_NUMBER`] for
    /// unsolicited status traffic).
    pub sequence_number: u16,
    /// Raw packet-type byte as received.
    pub packet_type: u8,
    /// Device-supplied timestamp (low 32 bits of epoch milliseconds).
    pub timestamp: u32,
    /// Payload chunk of this frame.
    pub payload: Bytes,
    /// Structural problems found during decoding; empty for clean frames.
    pub issues: Vec<DecodeIssue>,
}

impl DecodedPacket {
    /// True when the frame decoded without structural problems.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Typed packet type, if recognized.
    #[must_use]
    pub fn kind(&self) -> Option<PacketType> {
        PacketType::from_u8(self.packet_type)
    }
}

/// Payload regions of a v3 message after reassembly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PayloadData {
    /// Structured (protobuf-encoded) region.
    pub proto_data: Bytes,
    /// Raw region.
    pub raw_data: Bytes,
}

/// Compose the serialized payload: `proto_len ‖ raw_len ‖ proto ‖ raw`.
///
/// Length prefixes are 16-bit big-endian byte counts (not hex-character
/// counts). Both regions empty yields the empty payload (a bare frame is
/// still emitted for it).
pub fn encode_payload_data(proto_data: &[u8], raw_data: &[u8]) -> Result<Vec<u8>> {
    if proto_data.is_empty() && raw_data.is_empty() {
        return Ok(Vec::new());
    }

    let max = usize::from(u16::MAX);
    if proto_data.len() > max {
        return Err(ProtocolError::PayloadTooLarge { size: proto_data.len(), max });
    }
    if raw_data.len() > max {
        return Err(ProtocolError::PayloadTooLarge { size: raw_data.len(), max });
    }

    let mut payload = Vec::with_capacity(4 + proto_data.len() + raw_data.len());
    payload.extend_from_slice(&(proto_data.len() as u16).to_be_bytes());
    payload.extend_from_slice(&(raw_data.len() as u16).to_be_bytes());
    payload.extend_from_slice(proto_data);
    payload.extend_from_slice(raw_data);
    Ok(payload)
}

/// Split a reassembled payload back into its proto and raw regions.
///
/// Tolerates short input: regions are clamped to the bytes available, so a
/// truncated payload decodes to truncated regions rather than failing.
#[must_use]
pub fn decode_payload_data(payload: &[u8]) -> PayloadData {
    if payload.is_empty() {
        return PayloadData::default();
    }

    let at = |i: usize| payload.get(i).copied().unwrap_or(0);
    let proto_len = usize::from(u16::from_be_bytes([at(0), at(1)]));
    let raw_len = usize::from(u16::from_be_bytes([at(2), at(3)]));
    let body = payload.get(4..).unwrap_or(&[]);

    let proto_end = proto_len.min(body.len());
    let raw_end = (proto_end + raw_len).min(body.len());

    PayloadData {
        proto_data: Bytes::copy_from_slice(&body[..proto_end]),
        raw_data: Bytes::copy_from_slice(&body[proto_end..raw_end]),
    }
}

/// Encode a v3 message into one frame per payload chunk.
///
/// `timestamp` is stamped into every frame; callers supply the low 32 bits
/// of epoch milliseconds (any monotonically increasing value is accepted by
/// devices). An empty payload still produces exactly one frame with
/// `payload_length == 0`.
///
/// # Errors
///
/// - [`ProtocolError::UnsupportedVersion`] unless `version` is v3
/// - [`ProtocolError::PayloadTooLarge`] if a region exceeds its length prefix
pub fn encode_packet(
    raw_data: &[u8],
    proto_data: &[u8],
    version: PacketVersion,
    sequence_number: u16,
    packet_type: PacketType,
    timestamp: u32,
) -> Result<Vec<Bytes>> {
    if version != PacketVersion::V3 {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let config = version.config();
    let serialized = encode_payload_data(proto_data, raw_data)?;

    let rounds = if serialized.is_empty() {
        1
    } else {
        serialized.len().div_ceil(config.chunk_size)
    };

    let mut packets = Vec::with_capacity(rounds);
    for i in 1..=rounds {
        let chunk_start = (i - 1) * config.chunk_size;
        let chunk_end = (chunk_start + config.chunk_size).min(serialized.len());
        let chunk = &serialized[chunk_start..chunk_end];

        let mut body = Vec::with_capacity(HEADER_AFTER_CRC + chunk.len());
        body.extend_from_slice(&(i as u16).to_be_bytes());
        body.extend_from_slice(&(rounds as u16).to_be_bytes());
        body.extend_from_slice(&sequence_number.to_be_bytes());
        body.push(packet_type.to_u8());
        body.extend_from_slice(&timestamp.to_be_bytes());
        body.push(chunk.len() as u8);
        body.extend_from_slice(chunk);

        let crc = crc16(&body);

        let mut frame = Vec::with_capacity(config.start_of_frame.len() + 2 + body.len());
        frame.extend_from_slice(config.start_of_frame);
        frame.extend_from_slice(&crc.to_be_bytes());
        frame.extend_from_slice(&body);
        packets.push(Bytes::from(frame));
    }

    Ok(packets)
}

/// Decode every v3 frame present in `data`.
///
/// Scans for the start-of-frame marker and decodes frames until the buffer
/// is exhausted; a frame cut short by the end of the buffer terminates the
/// scan and the frames collected so far are returned. CRC mismatches and
/// packet-number inconsistencies are recorded per frame, not raised.
///
/// # Errors
///
/// [`ProtocolError::UnsupportedVersion`] unless `version` is v3.
pub fn decode_packet(data: &[u8], version: PacketVersion) -> Result<Vec<DecodedPacket>> {
    if version != PacketVersion::V3 {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let sof = version.config().start_of_frame;
    let mut packets = Vec::new();
    let mut rest = data;

    while let Some(start) = find_marker(rest, sof) {
        let frame = &rest[start + sof.len()..];

        if frame.len() < 2 + HEADER_AFTER_CRC {
            break;
        }

        let wire_crc = u16::from_be_bytes([frame[0], frame[1]]);
        let header = &frame[2..2 + HEADER_AFTER_CRC];

        let current_packet_number = read_be_uint(&header[0..2]) as u16;
        let total_packet_number = read_be_uint(&header[2..4]) as u16;
        let sequence_number = read_be_uint(&header[4..6]) as u16;
        let packet_type = header[6];
        let timestamp = read_be_uint(&header[7..11]) as u32;
        let payload_length = usize::from(header[11]);

        let after_header = &frame[2 + HEADER_AFTER_CRC..];
        let read_length = payload_length.min(after_header.len());
        let payload = &after_header[..read_length];

        // Recompute the CRC over the fields as parsed. A clamped payload
        // keeps the declared length in the header, so truncation surfaces
        // as a CRC mismatch.
        let mut body = Vec::with_capacity(HEADER_AFTER_CRC + payload.len());
        body.extend_from_slice(header);
        body.extend_from_slice(payload);
        let actual_crc = crc16(&body[..]);

        let mut issues = Vec::new();
        if current_packet_number > total_packet_number {
            issues.push(DecodeIssue::PacketNumberOverflow);
        }
        if actual_crc != wire_crc {
            issues.push(DecodeIssue::InvalidCrc);
        }

        packets.push(DecodedPacket {
            current_packet_number,
            total_packet_number,
            sequence_number,
            packet_type,
            timestamp,
            payload: Bytes::copy_from_slice(payload),
            issues,
        });

        rest = &after_header[read_length..];
    }

    Ok(packets)
}

/// Locate `marker` inside `haystack`, returning the offset of its first byte.
fn find_marker(haystack: &[u8], marker: &[u8]) -> Option<usize> {
    if haystack.len() < marker.len() {
        return None;
    }
    (0..=haystack.len() - marker.len()).find(|&i| &haystack[i..i + marker.len()] == marker)
}
