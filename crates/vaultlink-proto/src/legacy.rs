//! The legacy (v1/v2) byte-stuffed packet codec.
//!
//! A legacy frame on the wire:
//!
//! ```text
//! +-----+--------------+--------------+----------------------------------------+
//! | SOF | command type | stuffed size | stuffed( current ‖ total ‖ data ‖ CRC) |
//! |     | 1 B / 4 B    | 1 B          | variable                               |
//! +-----+--------------+--------------+----------------------------------------+
//! ```
//!
//! v1 uses SOF `AA` and an 8-bit command type; v2 widens the command type to
//! 32 bits behind SOF `5A5A`. The CRC is computed over the unstuffed body
//! (current ‖ total ‖ data) and appended before stuffing, so the escape
//! codec covers it too. Payloads are chunked at 32 raw bytes.
//!
//! Acknowledgements at this layer are ordinary frames whose command type is
//! [`ACK_COMMAND`] or [`NACK_COMMAND`] with a fixed zero body.

use bytes::Bytes;

use crate::{
    checksum::crc16,
    errors::{ProtocolError, Result},
    hexutil::{read_be_uint, serialize_uint},
    stuffing::{byte_stuff, byte_unstuff},
    version::PacketVersion,
};

/// Command type acknowledging a received frame.
pub const ACK_COMMAND: u32 = 1;

/// Command type rejecting a received frame.
pub const NACK_COMMAND: u32 = 7;

/// Body carried by ACK/NACK frames (four zero bytes).
const ACK_BODY: [u8; 4] = [0, 0, 0, 0];

/// One decoded legacy frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyPacket {
    /// Command type of the frame.
    pub command_type: u32,
    /// 1-based index of this fragment.
    pub current_packet_number: u16,
    /// Total fragments in the message (0 for ACK frames).
    pub total_packet_number: u16,
    /// Payload chunk of this frame.
    pub data: Bytes,
    /// Structural problems found during decoding; empty for clean frames.
    pub issues: Vec<LegacyDecodeIssue>,
}

impl LegacyPacket {
    /// True when the frame decoded without structural problems.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Structural problem found while decoding a legacy frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyDecodeIssue {
    /// Recomputed CRC did not match the trailing CRC field.
    InvalidCrc,
    /// `current_packet_number` exceeded `total_packet_number`.
    PacketNumberOverflow,
    /// Unstuffed body was too short to hold the fixed fields.
    BodyTooShort,
}

/// Encode `data` into legacy frames carrying `command_type`.
///
/// # Errors
///
/// - [`ProtocolError::EmptyData`] for empty input (legacy frames always
///   carry data; use [`encode_ack_packet`] for bodiless acknowledgements)
/// - [`ProtocolError::UnsupportedVersion`] for v3
/// - [`ProtocolError::FieldOverflow`] if `command_type` does not fit the
///   generation's field width
pub fn xmodem_encode(
    data: &[u8],
    command_type: u32,
    version: PacketVersion,
) -> Result<Vec<Bytes>> {
    if !version.is_legacy() {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    if data.is_empty() {
        return Err(ProtocolError::EmptyData);
    }

    let config = version.config();
    let rounds = data.len().div_ceil(config.chunk_size);

    let mut packets = Vec::with_capacity(rounds);
    for i in 1..=rounds {
        let chunk_start = (i - 1) * config.chunk_size;
        let chunk_end = (chunk_start + config.chunk_size).min(data.len());
        let chunk = &data[chunk_start..chunk_end];

        packets.push(build_frame(command_type, i as u16, rounds as u16, chunk, version)?);
    }

    Ok(packets)
}

/// Build an acknowledgement frame for `packet_number`.
///
/// ACK/NACK frames participate in the same CRC and stuffing rules as data
/// frames but carry a fixed zero body and a zero total-packet count.
pub fn encode_ack_packet(
    command_type: u32,
    packet_number: u16,
    version: PacketVersion,
) -> Result<Bytes> {
    if !version.is_legacy() {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    build_frame(command_type, packet_number, 0, &ACK_BODY, version)
}

fn build_frame(
    command_type: u32,
    current: u16,
    total: u16,
    chunk: &[u8],
    version: PacketVersion,
) -> Result<Bytes> {
    let config = version.config();

    let mut body = Vec::with_capacity(4 + chunk.len() + 2);
    body.extend_from_slice(&current.to_be_bytes());
    body.extend_from_slice(&total.to_be_bytes());
    body.extend_from_slice(chunk);
    let crc = crc16(&body);
    body.extend_from_slice(&crc.to_be_bytes());

    let stuffed = byte_stuff(&body, version);
    if stuffed.len() > usize::from(u8::MAX) {
        return Err(ProtocolError::PayloadTooLarge {
            size: stuffed.len(),
            max: usize::from(u8::MAX),
        });
    }

    let mut frame =
        Vec::with_capacity(config.start_of_frame.len() + 5 + stuffed.len());
    frame.extend_from_slice(config.start_of_frame);
    frame.extend_from_slice(&serialize_uint(
        i64::from(command_type),
        config.command_type_bits,
    )?);
    frame.push(stuffed.len() as u8);
    frame.extend_from_slice(&stuffed);
    Ok(Bytes::from(frame))
}

/// Decode every legacy frame present in `data`.
///
/// Same defensive posture as the v3 decoder: scan for the start-of-frame
/// marker, stop on truncation, record per-frame issues instead of failing
/// the buffer.
///
/// # Errors
///
/// [`ProtocolError::UnsupportedVersion`] for v3.
pub fn xmodem_decode(data: &[u8], version: PacketVersion) -> Result<Vec<LegacyPacket>> {
    if !version.is_legacy() {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let config = version.config();
    let sof = config.start_of_frame;
    let command_type_len = (config.command_type_bits / 8) as usize;

    let mut packets = Vec::new();
    let mut rest = data;

    while let Some(start) = find_marker(rest, sof) {
        let frame = &rest[start + sof.len()..];

        if frame.len() < command_type_len + 1 {
            break;
        }

        let command_type = read_be_uint(&frame[..command_type_len]) as u32;
        let stuffed_size = usize::from(frame[command_type_len]);

        let stuffed_start = command_type_len + 1;
        if frame.len() < stuffed_start + stuffed_size {
            break;
        }
        let stuffed = &frame[stuffed_start..stuffed_start + stuffed_size];
        rest = &frame[stuffed_start + stuffed_size..];

        let body = byte_unstuff(stuffed, version);

        // current(2) + total(2) + crc(2) is the minimum meaningful body.
        if body.len() < 6 {
            packets.push(LegacyPacket {
                command_type,
                current_packet_number: 0,
                total_packet_number: 0,
                data: Bytes::new(),
                issues: vec![LegacyDecodeIssue::BodyTooShort],
            });
            continue;
        }

        let current_packet_number = read_be_uint(&body[0..2]) as u16;
        let total_packet_number = read_be_uint(&body[2..4]) as u16;
        let chunk = &body[4..body.len() - 2];
        let wire_crc = read_be_uint(&body[body.len() - 2..]) as u16;
        let actual_crc = crc16(&body[..body.len() - 2]);

        let mut issues = Vec::new();
        if current_packet_number > total_packet_number && total_packet_number != 0 {
            issues.push(LegacyDecodeIssue::PacketNumberOverflow);
        }
        if actual_crc != wire_crc {
            issues.push(LegacyDecodeIssue::InvalidCrc);
        }

        packets.push(LegacyPacket {
            command_type,
            current_packet_number,
            total_packet_number,
            data: Bytes::copy_from_slice(chunk),
            issues,
        });
    }

    Ok(packets)
}

fn find_marker(haystack: &[u8], marker: &[u8]) -> Option<usize> {
    if haystack.len() < marker.len() {
        return None;
    }
    (0..=haystack.len() - marker.len()).find(|&i| &haystack[i..i + marker.len()] == marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_round_trip() {
        let data = vec![0x01, 0x02, 0x03];
        let frames = xmodem_encode(&data, 0x58, PacketVersion::V1).unwrap();
        assert_eq!(frames.len(), 1);

        let decoded = xmodem_decode(&frames[0], PacketVersion::V1).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(decoded[0].is_clean());
        assert_eq!(decoded[0].command_type, 0x58);
        assert_eq!(decoded[0].current_packet_number, 1);
        assert_eq!(decoded[0].total_packet_number, 1);
        assert_eq!(decoded[0].data, data);
    }

    #[test]
    fn multi_chunk_round_trip_v2() {
        let data: Vec<u8> = (0..100).collect();
        let frames = xmodem_encode(&data, 0x0001_0203, PacketVersion::V2).unwrap();
        assert_eq!(frames.len(), 4);

        let mut collected = Vec::new();
        for frame in &frames {
            let decoded = xmodem_decode(frame, PacketVersion::V2).unwrap();
            assert_eq!(decoded.len(), 1);
            assert!(decoded[0].is_clean());
            assert_eq!(decoded[0].command_type, 0x0001_0203);
            collected.extend_from_slice(&decoded[0].data);
        }
        assert_eq!(collected, data);
    }

    #[test]
    fn stuffing_heavy_payload_round_trips() {
        // Every byte needs escaping under v1.
        let data = vec![0xAA; 32];
        let frames = xmodem_encode(&data, 2, PacketVersion::V1).unwrap();
        let decoded = xmodem_decode(&frames[0], PacketVersion::V1).unwrap();
        assert!(decoded[0].is_clean());
        assert_eq!(decoded[0].data, data);
    }

    #[test]
    fn v1_command_type_must_fit_one_byte() {
        assert!(matches!(
            xmodem_encode(&[0x00], 0x100, PacketVersion::V1),
            Err(ProtocolError::FieldOverflow { .. })
        ));
    }

    #[test]
    fn empty_data_is_rejected() {
        assert!(matches!(
            xmodem_encode(&[], 1, PacketVersion::V1),
            Err(ProtocolError::EmptyData)
        ));
    }

    #[test]
    fn ack_packet_round_trips() {
        let frame = encode_ack_packet(ACK_COMMAND, 1, PacketVersion::V1).unwrap();
        let decoded = xmodem_decode(&frame, PacketVersion::V1).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(decoded[0].is_clean());
        assert_eq!(decoded[0].command_type, ACK_COMMAND);
        assert_eq!(decoded[0].total_packet_number, 0);
        assert_eq!(decoded[0].data, ACK_BODY.as_slice());
    }

    #[test]
    fn corrupted_crc_is_flagged() {
        let frames = xmodem_encode(&[1, 2, 3, 4], 5, PacketVersion::V1).unwrap();
        let mut raw = frames[0].to_vec();
        // First stuffed byte (high byte of the current packet number). CRC-16
        // detects every single-bit error, so the mismatch is deterministic.
        raw[3] ^= 0x01;

        let decoded = xmodem_decode(&raw, PacketVersion::V1).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(decoded[0].issues.contains(&LegacyDecodeIssue::InvalidCrc));
    }

    #[test]
    fn v3_is_rejected() {
        assert!(matches!(
            xmodem_encode(&[0x00], 1, PacketVersion::V3),
            Err(ProtocolError::UnsupportedVersion(PacketVersion::V3))
        ));
    }
}
