//! Write/ack loop behavior against a scripted device.

use std::time::Duration;

use vaultlink_core::{
    DeviceState,
    ack::{wait_for_packet, write_command},
    error::DeviceError,
    fragment::frame_timestamp,
};
use vaultlink_harness::{MockTransport, frames};
use vaultlink_proto::{PacketType, PacketVersion, encode_packet};

const SHORT_TIMEOUT: Option<Duration> = Some(Duration::from_millis(50));

fn cmd_frame(sequence_number: u16) -> Vec<u8> {
    encode_packet(
        &[],
        &[0x0A, 0x02],
        PacketVersion::V3,
        sequence_number,
        PacketType::Cmd,
        frame_timestamp(),
    )
    .expect("encode")
    .remove(0)
    .to_vec()
}

#[tokio::test]
async fn ack_with_matching_sequence_is_accepted() {
    let transport = MockTransport::new(DeviceState::Main);
    transport.set_responder(|_| vec![frames::v3_ack(7)]);

    let received = write_command(
        &transport,
        &cmd_frame(7),
        PacketVersion::V3,
        7,
        &[PacketType::CmdAck],
        SHORT_TIMEOUT,
    )
    .await
    .expect("ack expected");

    assert_eq!(received.kind(), Some(PacketType::CmdAck));
    assert_eq!(received.sequence_number, 7);
}

#[tokio::test]
async fn ack_with_wrong_sequence_is_ignored_until_timeout() {
    let transport = MockTransport::new(DeviceState::Main);
    transport.set_responder(|_| vec![frames::v3_ack(99)]);

    let result = write_command(
        &transport,
        &cmd_frame(7),
        PacketVersion::V3,
        7,
        &[PacketType::CmdAck],
        SHORT_TIMEOUT,
    )
    .await;

    assert_eq!(result, Err(DeviceError::ReadTimeout));
}

#[tokio::test]
async fn status_is_accepted_regardless_of_sequence() {
    let transport = MockTransport::new(DeviceState::Main);
    let status = vaultlink_proto::Status {
        device_state: 0x00,
        device_idle_state: vaultlink_proto::DeviceIdleState::None,
        device_waiting_on: vaultlink_proto::DeviceWaitOn::None,
        abort_disabled: false,
        current_cmd_seq: 0,
        cmd_state: vaultlink_proto::CmdState::None,
        flow_status: 0,
    };
    transport.queue_frame(frames::v3_status(&status));

    let received = wait_for_packet(
        &transport,
        7,
        &[PacketType::Status],
        PacketVersion::V3,
        SHORT_TIMEOUT,
    )
    .await
    .expect("status expected");

    assert_eq!(received.kind(), Some(PacketType::Status));
}

#[tokio::test]
async fn error_frame_becomes_write_rejected() {
    let transport = MockTransport::new(DeviceState::Main);
    transport.set_sequence(7);
    transport.set_responder(|_| vec![frames::v3_error(1, 7)]);

    let result = write_command(
        &transport,
        &cmd_frame(7),
        PacketVersion::V3,
        7,
        &[PacketType::CmdAck],
        SHORT_TIMEOUT,
    )
    .await;

    assert_eq!(result, Err(DeviceError::WriteRejected(1)));
}

#[tokio::test]
async fn stale_sequence_rejection_becomes_process_aborted() {
    // Scenario: the device rejects with "invalid sequence number" while the
    // transport has already moved on to a newer sequence. The command this
    // waiter was driving no longer exists.
    let transport = MockTransport::new(DeviceState::Main);
    transport.set_sequence(10);
    transport.set_responder(|_| vec![frames::v3_error(5, 7)]);

    let result = write_command(
        &transport,
        &cmd_frame(7),
        PacketVersion::V3,
        7,
        &[PacketType::CmdAck],
        SHORT_TIMEOUT,
    )
    .await;

    assert_eq!(result, Err(DeviceError::ProcessAborted));
}

#[tokio::test]
async fn invalid_sequence_rejection_for_current_sequence_stays_rejection() {
    let transport = MockTransport::new(DeviceState::Main);
    transport.set_sequence(7);
    transport.set_responder(|_| vec![frames::v3_error(5, 7)]);

    let result = write_command(
        &transport,
        &cmd_frame(7),
        PacketVersion::V3,
        7,
        &[PacketType::CmdAck],
        SHORT_TIMEOUT,
    )
    .await;

    assert_eq!(result, Err(DeviceError::WriteRejected(5)));
}

#[tokio::test]
async fn corrupt_frames_are_skipped() {
    let transport = MockTransport::new(DeviceState::Main);

    let mut corrupted = frames::v3_ack(7).to_vec();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0x01;
    transport.queue_frame(corrupted);
    transport.queue_frame(frames::v3_ack(7));

    let received = write_command(
        &transport,
        &cmd_frame(7),
        PacketVersion::V3,
        7,
        &[PacketType::CmdAck],
        SHORT_TIMEOUT,
    )
    .await
    .expect("clean ack expected");

    assert_eq!(received.kind(), Some(PacketType::CmdAck));
}

#[tokio::test]
async fn timeout_without_reply_is_read_timeout() {
    let transport = MockTransport::new(DeviceState::Main);

    let result = write_command(
        &transport,
        &cmd_frame(7),
        PacketVersion::V3,
        7,
        &[PacketType::CmdAck],
        SHORT_TIMEOUT,
    )
    .await;

    assert_eq!(result, Err(DeviceError::ReadTimeout));
}

#[tokio::test]
async fn disconnect_mid_send_is_connection_closed() {
    let transport = MockTransport::new(DeviceState::Main);
    transport.disconnect_on_send();

    let result = write_command(
        &transport,
        &cmd_frame(7),
        PacketVersion::V3,
        7,
        &[PacketType::CmdAck],
        SHORT_TIMEOUT,
    )
    .await;

    assert_eq!(result, Err(DeviceError::ConnectionClosed));
}

#[tokio::test]
async fn send_failure_while_connected_is_write_error() {
    let transport = MockTransport::new(DeviceState::Main);
    transport.fail_sends();

    let result = write_command(
        &transport,
        &cmd_frame(7),
        PacketVersion::V3,
        7,
        &[PacketType::CmdAck],
        SHORT_TIMEOUT,
    )
    .await;

    assert_eq!(result, Err(DeviceError::WriteError));
}

#[tokio::test]
async fn legacy_versions_are_rejected() {
    let transport = MockTransport::new(DeviceState::Main);

    let result = write_command(
        &transport,
        &cmd_frame(7),
        PacketVersion::V1,
        7,
        &[PacketType::CmdAck],
        SHORT_TIMEOUT,
    )
    .await;

    assert_eq!(result, Err(DeviceError::InvalidSdkOperation));
}
