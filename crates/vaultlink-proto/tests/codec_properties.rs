//! Property-based tests for the packet codecs.
//!
//! These pin the round-trip contracts for ALL inputs, not just the fixture
//! frames used by the unit tests: encode followed by decode is the identity
//! on every field except the timestamp, which the decoder must carry
//! through unchanged.

use proptest::{prelude::*, test_runner::TestCaseError};
use vaultlink_proto::{
    PacketType, PacketVersion, decode_packet, decode_payload_data, decode_raw_data, encode_packet,
    encode_raw_data, xmodem_decode, xmodem_encode,
};

fn arbitrary_packet_type() -> impl Strategy<Value = PacketType> {
    prop_oneof![
        Just(PacketType::StatusReq),
        Just(PacketType::Cmd),
        Just(PacketType::CmdOutputReq),
        Just(PacketType::Status),
        Just(PacketType::CmdAck),
        Just(PacketType::CmdOutput),
        Just(PacketType::Error),
        Just(PacketType::Abort),
    ]
}

proptest! {
    #[test]
    fn v3_packet_round_trip(
        raw in prop::collection::vec(any::<u8>(), 0..200),
        proto in prop::collection::vec(any::<u8>(), 0..200),
        seq in any::<u16>(),
        packet_type in arbitrary_packet_type(),
        timestamp in any::<u32>(),
    ) {
        let frames = encode_packet(&raw, &proto, PacketVersion::V3, seq, packet_type, timestamp)
            .expect("encode should succeed");
        prop_assert!(!frames.is_empty());

        let mut payload = Vec::new();
        for (i, frame) in frames.iter().enumerate() {
            let decoded = decode_packet(frame, PacketVersion::V3).expect("decode should succeed");
            prop_assert_eq!(decoded.len(), 1);

            let packet = &decoded[0];
            prop_assert!(packet.is_clean(), "issues: {:?}", packet.issues);
            prop_assert_eq!(packet.current_packet_number as usize, i + 1);
            prop_assert_eq!(packet.total_packet_number as usize, frames.len());
            prop_assert_eq!(packet.sequence_number, seq);
            prop_assert_eq!(packet.kind(), Some(packet_type));
            prop_assert_eq!(packet.timestamp, timestamp);
            payload.extend_from_slice(&packet.payload);
        }

        let regions = decode_payload_data(&payload);
        prop_assert_eq!(regions.proto_data.as_ref(), proto.as_slice());
        prop_assert_eq!(regions.raw_data.as_ref(), raw.as_slice());
    }

    #[test]
    fn v3_decode_concatenated_frames(
        proto in prop::collection::vec(any::<u8>(), 1..150),
        seq in any::<u16>(),
    ) {
        let frames = encode_packet(&[], &proto, PacketVersion::V3, seq, PacketType::Cmd, 42)
            .expect("encode should succeed");

        let mut buffer = Vec::new();
        for frame in &frames {
            buffer.extend_from_slice(frame);
        }

        let decoded = decode_packet(&buffer, PacketVersion::V3).expect("decode should succeed");
        prop_assert_eq!(decoded.len(), frames.len());
    }

    #[test]
    fn legacy_round_trip_v1(
        data in prop::collection::vec(any::<u8>(), 1..200),
        command_type in 1u32..=0xFF,
    ) {
        legacy_round_trip(&data, command_type, PacketVersion::V1)?;
    }

    #[test]
    fn legacy_round_trip_v2(
        data in prop::collection::vec(any::<u8>(), 1..200),
        command_type in 1u32..,
    ) {
        legacy_round_trip(&data, command_type, PacketVersion::V2)?;
    }

    #[test]
    fn raw_data_round_trip(
        command_type in 1u32..,
        data in prop::collection::vec(any::<u8>(), 0..128),
    ) {
        let encoded = encode_raw_data(command_type, &data).expect("encode should succeed");
        let decoded = decode_raw_data(&encoded);
        prop_assert_eq!(decoded.command_type, command_type);
        prop_assert_eq!(decoded.data.as_ref(), data.as_slice());
    }
}

fn legacy_round_trip(
    data: &[u8],
    command_type: u32,
    version: PacketVersion,
) -> Result<(), TestCaseError> {
    let frames = xmodem_encode(data, command_type, version).expect("encode should succeed");

    let mut collected = Vec::new();
    for (i, frame) in frames.iter().enumerate() {
        let decoded = xmodem_decode(frame, version).expect("decode should succeed");
        prop_assert_eq!(decoded.len(), 1);

        let packet = &decoded[0];
        prop_assert!(packet.is_clean(), "issues: {:?}", packet.issues);
        prop_assert_eq!(packet.command_type, command_type);
        prop_assert_eq!(packet.current_packet_number as usize, i + 1);
        prop_assert_eq!(packet.total_packet_number as usize, frames.len());
        collected.extend_from_slice(&packet.data);
    }

    prop_assert_eq!(collected.as_slice(), data);
    Ok(())
}
