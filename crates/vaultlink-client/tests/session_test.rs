//! Session handshake and operation dispatch against a scripted device.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use vaultlink_client::{CreateOptions, QueryOptions, Sdk, WaitForResultArgs};
use vaultlink_core::{
    DeviceState,
    Transport,
    error::DeviceError,
    result::PollOptions,
    wire::{AppVersionCmd, AppVersionEntry, AppVersionResponse, Envelope},
};
use vaultlink_harness::{MockTransport, frames};
use vaultlink_proto::{PacketType, PacketVersion, decode_packet};

fn fast_create() -> CreateOptions {
    CreateOptions { max_tries: 2, timeout: Duration::from_millis(100) }
}

/// Device-side dispatcher for the structured v3 dialect: ACK commands,
/// answer output requests with the scripted reply.
fn v3_responder(
    reply: Vec<Bytes>,
) -> impl FnMut(&[u8]) -> Vec<Bytes> + Send + 'static {
    move |sent| {
        let packets = decode_packet(sent, PacketVersion::V3).expect("host frame must decode");
        let packet = &packets[0];
        match packet.kind() {
            Some(PacketType::Cmd) => vec![frames::v3_ack(packet.sequence_number)],
            Some(PacketType::CmdOutputReq) => reply.clone(),
            _ => Vec::new(),
        }
    }
}

/// Script the legacy discovery handshake for `version_reply`.
fn handshake_responder(
    version_reply: &str,
) -> impl FnMut(&[u8]) -> Vec<Bytes> + Send + 'static {
    let mut replies = vec![frames::legacy_ack(1, PacketVersion::V1)];
    replies.extend(frames::sdk_version_reply(version_reply));
    move |_| replies.clone()
}

#[tokio::test]
async fn handshake_derives_version_and_generation() {
    // The device answers command 0x58 with "000200070001": SDK 2.7.1,
    // which selects the v3 packet generation.
    let transport = Arc::new(MockTransport::new(DeviceState::Main));
    transport.set_responder(handshake_responder("000200070001"));

    let sdk = Sdk::create(Arc::clone(&transport) as Arc<dyn Transport>, 2, &fast_create())
        .await
        .expect("handshake expected to succeed");

    assert_eq!(sdk.version(), "2.7.1");
    assert_eq!(sdk.packet_version(), Some(PacketVersion::V3));

    // 2.7.1 is inside the raw window but before the structured window.
    assert!(!sdk.is_supported().await.unwrap());
    assert!(sdk.deprecated().is_raw_operation_supported().await.unwrap());
}

#[tokio::test]
async fn bootloader_device_skips_the_handshake() {
    let transport = Arc::new(MockTransport::new(DeviceState::Bootloader));

    let sdk = Sdk::create(Arc::clone(&transport) as Arc<dyn Transport>, 2, &fast_create())
        .await
        .expect("bootloader session expected");

    assert_eq!(sdk.version(), "0.0.0");
    assert_eq!(sdk.packet_version(), None);
    assert!(transport.sent().is_empty(), "no handshake traffic in bootloader state");
}

#[tokio::test]
async fn handshake_failure_raises_the_first_error() {
    let transport = Arc::new(MockTransport::new(DeviceState::Main));

    let result = Sdk::create(
        Arc::clone(&transport) as Arc<dyn Transport>,
        2,
        &CreateOptions { max_tries: 1, timeout: Duration::from_millis(50) },
    )
    .await;

    assert!(matches!(result, Err(DeviceError::WriteTimeout)));
}

#[tokio::test]
async fn structured_dialect_is_gated_on_the_feature_window() {
    let transport = Arc::new(MockTransport::new(DeviceState::Main));
    transport.set_responder(handshake_responder("000200070001"));

    let sdk =
        Sdk::create(Arc::clone(&transport) as Arc<dyn Transport>, 2, &fast_create()).await.unwrap();

    let result = sdk.send_query(&[0x01], &QueryOptions::default()).await;
    assert_eq!(result, Err(DeviceError::InvalidSdkOperation));
}

#[tokio::test]
async fn query_and_result_round_trip() {
    let transport = Arc::new(MockTransport::new(DeviceState::Main));
    transport.set_responder(handshake_responder("000300010000"));

    let sdk =
        Sdk::create(Arc::clone(&transport) as Arc<dyn Transport>, 2, &fast_create()).await.unwrap();
    assert_eq!(sdk.version(), "3.1.0");

    // Swap the responder for the structured dialect: the device replies
    // with a 37-byte applet payload in the raw region.
    let payload: Vec<u8> = (0..37).map(|i| i as u8).collect();
    let envelope = Envelope::Cmd { applet_id: 2 }.encode();
    // The query will be stamped with the first fresh sequence number.
    let reply = frames::v3_cmd_output(&envelope, &payload, 1);
    transport.set_responder(v3_responder(reply));

    sdk.send_query(&[0x0A, 0x02, 0x08, 0x01], &QueryOptions::default())
        .await
        .expect("query acked");

    let result = sdk
        .wait_for_result(WaitForResultArgs {
            options: PollOptions {
                interval: Duration::from_millis(5),
                max_tries: 2,
                timeout: Some(Duration::from_millis(50)),
            },
            ..Default::default()
        })
        .await
        .expect("result expected");

    assert_eq!(result, payload);
}

#[tokio::test]
async fn app_versions_are_cached_per_session() {
    let transport = Arc::new(MockTransport::new(DeviceState::Main));
    transport.set_responder(handshake_responder("000300000000"));

    let sdk =
        Sdk::create(Arc::clone(&transport) as Arc<dyn Transport>, 2, &fast_create()).await.unwrap();

    let table = vec![
        AppVersionEntry { applet_id: 1, major: 1, minor: 0, patch: 0 },
        AppVersionEntry { applet_id: 2, major: 0, minor: 1, patch: 16 },
    ];
    let response = Envelope::AppVersion(AppVersionCmd::Response(AppVersionResponse {
        app_versions: table.clone(),
        common_error: None,
    }))
    .encode();
    let reply = frames::v3_cmd_output(&response, &[], 1);
    transport.set_responder(v3_responder(reply));

    let fetched = sdk.get_app_versions().await.expect("table expected");
    assert_eq!(fetched, table);
    assert_eq!(sdk.get_app_version(2).await.unwrap(), Some("0.1.16".to_string()));

    let sends_after_first = transport.sent().len();
    let cached = sdk.get_app_versions().await.expect("cache expected");
    assert_eq!(cached, table);
    assert_eq!(transport.sent().len(), sends_after_first, "second fetch must hit the cache");
}

#[tokio::test]
async fn app_compatibility_window_is_enforced() {
    let transport = Arc::new(MockTransport::new(DeviceState::Main));
    transport.set_responder(handshake_responder("000300000000"));

    let sdk =
        Sdk::create(Arc::clone(&transport) as Arc<dyn Transport>, 2, &fast_create()).await.unwrap();

    let table = vec![AppVersionEntry { applet_id: 2, major: 0, minor: 1, patch: 16 }];
    let response = Envelope::AppVersion(AppVersionCmd::Response(AppVersionResponse {
        app_versions: table,
        common_error: None,
    }))
    .encode();
    let reply = frames::v3_cmd_output(&response, &[], 1);
    transport.set_responder(v3_responder(reply));

    sdk.check_app_compatibility(&vaultlink_client::VersionRange {
        from: "0.1.0",
        to: Some("1.0.0"),
    })
    .await
    .expect("0.1.16 is inside [0.1.0, 1.0.0)");

    let result = sdk
        .check_app_compatibility(&vaultlink_client::VersionRange { from: "0.2.0", to: None })
        .await;
    assert_eq!(result, Err(DeviceError::InvalidSdkOperation));
}

#[tokio::test]
async fn bootloader_entry_points_require_bootloader_state() {
    let transport = Arc::new(MockTransport::new(DeviceState::Main));
    transport.set_responder(handshake_responder("000300000000"));

    let sdk =
        Sdk::create(Arc::clone(&transport) as Arc<dyn Transport>, 2, &fast_create()).await.unwrap();

    let result = sdk.send_bootloader_abort().await;
    assert_eq!(result, Err(DeviceError::NotInBootloader));
}

#[tokio::test]
async fn operations_refuse_bootloader_mode() {
    let transport = Arc::new(MockTransport::new(DeviceState::Bootloader));
    let sdk =
        Sdk::create(Arc::clone(&transport) as Arc<dyn Transport>, 2, &fast_create()).await.unwrap();

    let result = sdk.send_query(&[0x01], &QueryOptions::default()).await;
    assert_eq!(result, Err(DeviceError::InBootloader));
}

#[tokio::test]
async fn run_operation_clears_stale_usb_state() {
    use vaultlink_proto::{CmdState, DeviceIdleState, DeviceWaitOn, Status};

    let transport = Arc::new(MockTransport::new(DeviceState::Main));
    transport.set_responder(handshake_responder("000300000000"));

    let sdk =
        Sdk::create(Arc::clone(&transport) as Arc<dyn Transport>, 2, &fast_create()).await.unwrap();

    // The device is stuck waiting on host input for an abandoned command.
    transport.set_responder(|sent| {
        let packets = decode_packet(sent, PacketVersion::V3).expect("host frame must decode");
        let packet = &packets[0];
        let status = |current_cmd_seq| Status {
            device_state: 0x02,
            device_idle_state: DeviceIdleState::Usb,
            device_waiting_on: DeviceWaitOn::None,
            abort_disabled: false,
            current_cmd_seq,
            cmd_state: CmdState::Executing,
            flow_status: 0,
        };
        match packet.kind() {
            Some(PacketType::StatusReq) => vec![frames::v3_status(&status(9))],
            // The abort succeeds: the report names the abort's sequence.
            Some(PacketType::Abort) => vec![frames::v3_status(&status(packet.sequence_number))],
            _ => Vec::new(),
        }
    });

    let value = sdk.run_operation(async { Ok(42) }).await.expect("operation expected");
    assert_eq!(value, 42);

    let abort_sent = transport.sent().iter().any(|sent| {
        decode_packet(sent, PacketVersion::V3)
            .ok()
            .and_then(|packets| packets.first().and_then(vaultlink_proto::DecodedPacket::kind))
            == Some(PacketType::Abort)
    });
    assert!(abort_sent, "stale USB state must be aborted");
}

#[tokio::test]
async fn legacy_adapter_round_trips_a_command() {
    let transport = Arc::new(MockTransport::new(DeviceState::Main));
    transport.set_responder(handshake_responder("000000050000"));

    let sdk =
        Sdk::create(Arc::clone(&transport) as Arc<dyn Transport>, 2, &fast_create()).await.unwrap();
    assert_eq!(sdk.packet_version(), Some(PacketVersion::V1));

    let deprecated = sdk.deprecated();
    assert!(deprecated.is_legacy_operation_supported().await.unwrap());

    // Device ACKs and replies under command 0x42.
    let mut replies = vec![frames::legacy_ack(1, PacketVersion::V1)];
    replies.extend(frames::legacy_reply(0x42, &[0xBE, 0xEF], PacketVersion::V1));
    transport.set_responder(move |_| replies.clone());

    deprecated
        .send_legacy_command(0x42, &[0x01], 5, Some(Duration::from_millis(50)))
        .await
        .expect("ack expected");

    let (command, data) = deprecated
        .receive_legacy_command(&[0x42], Some(Duration::from_millis(100)))
        .await
        .expect("reply expected");

    assert_eq!(command, 0x42);
    assert_eq!(data.as_ref(), &[0xBE, 0xEF]);
}
