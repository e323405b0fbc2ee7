//! Device-side frame builders.
//!
//! Tests script a device by queueing these frames into a
//! [`crate::MockTransport`], either directly or from a responder closure.
//! Builders panic on misuse (they are test plumbing, not production code).

use bytes::Bytes;
use vaultlink_proto::{
    PacketType, PacketVersion, STATUS_SEQUENCE_NUMBER, Status, encode_packet, encode_status,
    legacy::{ACK_COMMAND, NACK_COMMAND, encode_ack_packet},
    xmodem_encode,
};

/// Device timestamp stamped into scripted frames.
const DEVICE_TIMESTAMP: u32 = 0x0102_0304;

fn single_v3_frame(raw: &[u8], proto: &[u8], sequence_number: u16, kind: PacketType) -> Bytes {
    let mut frames =
        encode_packet(raw, proto, PacketVersion::V3, sequence_number, kind, DEVICE_TIMESTAMP)
            .expect("scripted frame must encode");
    assert_eq!(frames.len(), 1, "scripted frame must fit one packet");
    frames.remove(0)
}

/// `CMD_ACK` for `sequence_number`.
#[must_use]
pub fn v3_ack(sequence_number: u16) -> Bytes {
    single_v3_frame(&[], &[], sequence_number, PacketType::CmdAck)
}

/// Unsolicited STATUS frame carrying `status`.
#[must_use]
pub fn v3_status(status: &Status) -> Bytes {
    single_v3_frame(&encode_status(status), &[], STATUS_SEQUENCE_NUMBER, PacketType::Status)
}

/// `CMD_OUTPUT` frames for a reply with the given payload regions.
#[must_use]
pub fn v3_cmd_output(proto: &[u8], raw: &[u8], sequence_number: u16) -> Vec<Bytes> {
    encode_packet(
        raw,
        proto,
        PacketVersion::V3,
        sequence_number,
        PacketType::CmdOutput,
        DEVICE_TIMESTAMP,
    )
    .expect("scripted output must encode")
}

/// ERROR frame rejecting the host's last write with `reject_byte`.
#[must_use]
pub fn v3_error(reject_byte: u8, sequence_number: u16) -> Bytes {
    single_v3_frame(&[reject_byte], &[], sequence_number, PacketType::Error)
}

/// Legacy ACK frame for `packet_number`.
#[must_use]
pub fn legacy_ack(packet_number: u16, version: PacketVersion) -> Bytes {
    encode_ack_packet(ACK_COMMAND, packet_number, version).expect("scripted ack must encode")
}

/// Legacy NACK frame for `packet_number`.
#[must_use]
pub fn legacy_nack(packet_number: u16, version: PacketVersion) -> Bytes {
    encode_ack_packet(NACK_COMMAND, packet_number, version).expect("scripted nack must encode")
}

/// Legacy reply frames carrying `data` under `command`.
#[must_use]
pub fn legacy_reply(command: u32, data: &[u8], version: PacketVersion) -> Vec<Bytes> {
    xmodem_encode(data, command, version).expect("scripted reply must encode")
}

/// The v1 SDK-version handshake reply (command `0x58`).
///
/// `version_reply` is the 12-hex-character `major ‖ minor ‖ patch` string,
/// e.g. `"000200070001"` for 2.7.1.
#[must_use]
pub fn sdk_version_reply(version_reply: &str) -> Vec<Bytes> {
    let data = vaultlink_proto::hexutil::hex_to_bytes(version_reply)
        .expect("scripted version reply must be hex");
    legacy_reply(0x58, &data, PacketVersion::V1)
}
