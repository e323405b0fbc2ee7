//! The v3 write/ack loop.
//!
//! [`write_command`] emits one frame and waits for the device to answer
//! with one of an expected set of packet types carrying the same sequence
//! number. Send and wait run concurrently: the ACK for a frame can arrive
//! before the transport reports the write complete, and a waiter that has
//! its answer abandons the in-flight send.
//!
//! [`wait_for_packet`] is the receive half: it polls the transport pool at
//! the generation's recheck interval, decodes whatever arrives, and yields
//! the first clean frame that matches. STATUS frames are always accepted
//! regardless of sequence number; ERROR frames are decoded into rejection
//! errors on the spot.

use std::time::Duration;

use tracing::warn;
use vaultlink_proto::{
    DecodedPacket, PacketType, PacketVersion, RejectReason, decode_packet, decode_payload_data,
};

use crate::{
    error::{DeviceError, Result},
    transport::Transport,
};

/// Wait for a clean packet matching `packet_types` and `sequence_number`.
///
/// STATUS frames match regardless of sequence number (the device may ping
/// at any time). An ERROR frame terminates the wait:
///
/// - reject reason `InvalidSequenceNo` while the transport's latest issued
///   sequence differs from `sequence_number` means the command we were
///   servicing no longer exists on the device ⇒ [`DeviceError::ProcessAborted`];
/// - any other reason ⇒ [`DeviceError::WriteRejected`].
///
/// Times out after `ack_timeout` (the generation's default when `None`)
/// with [`DeviceError::ReadTimeout`], or [`DeviceError::ConnectionClosed`]
/// when the transport dropped meanwhile.
pub async fn wait_for_packet(
    transport: &dyn Transport,
    sequence_number: u16,
    packet_types: &[PacketType],
    version: PacketVersion,
    ack_timeout: Option<Duration>,
) -> Result<DecodedPacket> {
    debug_assert!(!packet_types.is_empty(), "packet_types must not be empty");

    if version != PacketVersion::V3 {
        return Err(DeviceError::InvalidSdkOperation);
    }

    if !transport.is_connected().await {
        return Err(DeviceError::ConnectionClosed);
    }

    let config = version.config();
    let timeout = ack_timeout.unwrap_or(config.ack_timeout);

    let poll = poll_for_packet(transport, sequence_number, packet_types, version);
    match tokio::time::timeout(timeout, poll).await {
        Ok(result) => result,
        Err(_) => {
            if transport.is_connected().await {
                Err(DeviceError::ReadTimeout)
            } else {
                Err(DeviceError::ConnectionClosed)
            }
        },
    }
}

async fn poll_for_packet(
    transport: &dyn Transport,
    sequence_number: u16,
    packet_types: &[PacketType],
    version: PacketVersion,
) -> Result<DecodedPacket> {
    let recheck = version.config().recheck_interval;

    loop {
        if !transport.is_connected().await {
            return Err(DeviceError::ConnectionClosed);
        }

        let raw = match transport.receive().await {
            Ok(raw) => raw,
            Err(error) if error.is_connection_error() => return Err(error),
            Err(error) => {
                warn!(%error, "receive failed while waiting for packet");
                tokio::time::sleep(recheck).await;
                continue;
            },
        };

        let Some(raw) = raw else {
            tokio::time::sleep(recheck).await;
            continue;
        };

        for packet in decode_packet(&raw, version)? {
            if !packet.is_clean() {
                continue;
            }

            match packet.kind() {
                Some(PacketType::Error) => {
                    return Err(classify_rejection(transport, &packet, sequence_number).await);
                },
                Some(kind) if packet_types.contains(&kind) => {
                    if packet.sequence_number == sequence_number
                        || kind == PacketType::Status
                    {
                        return Ok(packet);
                    }
                },
                _ => {},
            }
        }

        tokio::time::sleep(recheck).await;
    }
}

/// Decode the reject byte of an ERROR frame into the matching error.
async fn classify_rejection(
    transport: &dyn Transport,
    packet: &DecodedPacket,
    sequence_number: u16,
) -> DeviceError {
    let payload = decode_payload_data(&packet.payload);
    let reject_byte = payload.raw_data.first().copied().unwrap_or(0);

    if RejectReason::from_u8(reject_byte) == Some(RejectReason::InvalidSequenceNo) {
        // The device is servicing a different command than the one this
        // waiter belongs to: the process we were driving is gone.
        let latest = transport.get_sequence_number().await;
        if latest != sequence_number {
            return DeviceError::ProcessAborted;
        }
    }

    DeviceError::WriteRejected(reject_byte)
}

/// Send one frame and wait for its acknowledgement.
///
/// The send and the packet wait race; whichever side fails first decides
/// the error. A send failure is reported as [`DeviceError::ConnectionClosed`]
/// when the transport dropped, [`DeviceError::WriteError`] otherwise. When
/// the expected packet arrives before the transport finishes the write, the
/// pending send is abandoned (its outcome no longer matters).
pub async fn write_command(
    transport: &dyn Transport,
    packet: &[u8],
    version: PacketVersion,
    sequence_number: u16,
    ack_packet_types: &[PacketType],
    timeout: Option<Duration>,
) -> Result<DecodedPacket> {
    debug_assert!(!packet.is_empty(), "packet must not be empty");
    debug_assert!(!ack_packet_types.is_empty(), "ack_packet_types must not be empty");

    if version != PacketVersion::V3 {
        return Err(DeviceError::InvalidSdkOperation);
    }

    if !transport.is_connected().await {
        return Err(DeviceError::ConnectionClosed);
    }

    let wait = wait_for_packet(transport, sequence_number, ack_packet_types, version, timeout);
    tokio::pin!(wait);

    let send = transport.send(packet);
    tokio::pin!(send);

    tokio::select! {
        ack = &mut wait => ack,
        sent = &mut send => match sent {
            Ok(()) => wait.await,
            Err(_) => {
                if transport.is_connected().await {
                    Err(DeviceError::WriteError)
                } else {
                    Err(DeviceError::ConnectionClosed)
                }
            },
        },
    }
}
