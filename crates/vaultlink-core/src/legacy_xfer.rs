//! Legacy (v1/v2) data transfer.
//!
//! The legacy generations predate typed packets: the host writes a command
//! frame and scans the receive pool for an ACK/NACK frame, then collects
//! the reply as frames carrying one of the awaited command types.
//!
//! The ACK scan uses [`Transport::peek`] rather than `receive` so reply
//! frames that land in the pool while we wait for an ACK are not consumed;
//! a skip list of already-examined pool ids keeps the scan linear.

use std::{collections::BTreeMap, time::Duration};

use bytes::Bytes;
use tracing::warn;
use vaultlink_proto::{
    PacketVersion,
    legacy::{ACK_COMMAND, NACK_COMMAND},
    xmodem_decode, xmodem_encode,
};

use crate::{
    error::{DeviceError, Result},
    transport::Transport,
};

/// Default reply collection timeout.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Command value with a single-try override: the firmware reboots right
/// after accepting it and never gets to ACK retries.
const SINGLE_TRY_COMMAND: u32 = 0xFF;

/// A reassembled legacy reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyReply {
    /// Command type of the reply frames.
    pub command_type: u32,
    /// Reassembled data.
    pub data: Bytes,
}

/// Write one frame and wait for its ACK in the receive pool.
async fn write_packet(
    transport: &dyn Transport,
    packet: &[u8],
    version: PacketVersion,
    skip_pool_ids: &mut Vec<u64>,
    ack_timeout: Option<Duration>,
) -> Result<()> {
    let config = version.config();

    if let Err(_error) = transport.send(packet).await {
        if !transport.is_connected().await {
            return Err(DeviceError::ConnectionClosed);
        }
        return Err(DeviceError::WriteError);
    }

    let scan = async {
        loop {
            if !transport.is_connected().await {
                return Err(DeviceError::ConnectionClosed);
            }

            let pool = transport.peek().await?;
            for entry in pool {
                if skip_pool_ids.contains(&entry.id) {
                    continue;
                }
                skip_pool_ids.push(entry.id);

                for packet in xmodem_decode(&entry.data, version)? {
                    if !packet.is_clean() {
                        continue;
                    }
                    if packet.command_type == ACK_COMMAND {
                        return Ok(());
                    }
                    if packet.command_type == NACK_COMMAND {
                        return Err(DeviceError::WriteError);
                    }
                }
            }

            tokio::time::sleep(config.recheck_interval).await;
        }
    };

    let timeout = ack_timeout.unwrap_or(config.ack_timeout);
    match tokio::time::timeout(timeout, scan).await {
        Ok(result) => result,
        Err(_) => {
            if transport.is_connected().await {
                Err(DeviceError::WriteTimeout)
            } else {
                Err(DeviceError::ConnectionClosed)
            }
        },
    }
}

/// Send `data` under `command` using the legacy framing.
///
/// Each frame is retried up to `max_tries` times, except under command
/// `0xFF` which always gets exactly one attempt.
pub async fn send_data(
    transport: &dyn Transport,
    command: u32,
    data: &[u8],
    version: PacketVersion,
    max_tries: u32,
    timeout: Option<Duration>,
) -> Result<()> {
    if !version.is_legacy() {
        return Err(DeviceError::InvalidSdkOperation);
    }

    if !transport.is_connected().await {
        return Err(DeviceError::ConnectionClosed);
    }

    let frames = xmodem_encode(data, command, version)?;
    let mut skip_pool_ids: Vec<u64> = Vec::new();

    let budget =
        if command == SINGLE_TRY_COMMAND { 1 } else { max_tries.max(1) };

    for frame in &frames {
        if !transport.is_connected().await {
            return Err(DeviceError::ConnectionClosed);
        }

        let mut first_error: Option<DeviceError> = None;
        let mut success = false;

        for _ in 0..budget {
            match write_packet(transport, frame, version, &mut skip_pool_ids, timeout).await {
                Ok(()) => {
                    success = true;
                    break;
                },
                Err(error) => {
                    let retryable = error.is_retryable();
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                    if !retryable {
                        break;
                    }
                },
            }
        }

        if !success {
            return Err(first_error.unwrap_or(DeviceError::WriteTimeout));
        }
    }

    Ok(())
}

/// Collect a legacy reply carrying one of `acceptable_commands`.
///
/// Fragments are stored by their packet number and joined once every
/// fragment of the advertised total has arrived. Corrupt frames are
/// dropped; the device retransmits.
pub async fn receive_data(
    transport: &dyn Transport,
    acceptable_commands: &[u32],
    version: PacketVersion,
    timeout: Option<Duration>,
) -> Result<LegacyReply> {
    debug_assert!(!acceptable_commands.is_empty(), "acceptable_commands must not be empty");

    if !version.is_legacy() {
        return Err(DeviceError::InvalidSdkOperation);
    }

    if !transport.is_connected().await {
        return Err(DeviceError::ConnectionClosed);
    }

    let recheck = version.config().recheck_interval;

    let collect = async {
        let mut fragments: BTreeMap<u16, Bytes> = BTreeMap::new();

        loop {
            if !transport.is_connected().await {
                return Err(DeviceError::ConnectionClosed);
            }

            let raw = match transport.receive().await {
                Ok(raw) => raw,
                Err(error) if error.is_connection_error() => return Err(error),
                Err(error) => {
                    warn!(%error, "receive failed while collecting legacy reply");
                    return Err(DeviceError::UnknownCommunication);
                },
            };

            let Some(raw) = raw else {
                tokio::time::sleep(recheck).await;
                continue;
            };

            for packet in xmodem_decode(&raw, version)? {
                if !packet.is_clean() {
                    continue;
                }
                if !acceptable_commands.contains(&packet.command_type) {
                    continue;
                }

                fragments.insert(packet.current_packet_number, packet.data.clone());

                let total = usize::from(packet.total_packet_number);
                if total > 0 && fragments.len() == total {
                    let mut data = Vec::new();
                    for chunk in fragments.values() {
                        data.extend_from_slice(chunk);
                    }
                    return Ok(LegacyReply {
                        command_type: packet.command_type,
                        data: Bytes::from(data),
                    });
                }
            }

            tokio::time::sleep(recheck).await;
        }
    };

    let timeout = timeout.unwrap_or(DEFAULT_RECEIVE_TIMEOUT);
    match tokio::time::timeout(timeout, collect).await {
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
