//! Bootloader firmware transfer.
//!
//! The ROM bootloader answers every data packet with a single byte: an ACK,
//! or a reject code naming why the flash refused it. The sender pre-flights
//! by waiting for the receiving-mode beacon, then walks the packet list
//! with per-packet retries and a progress callback.
//!
//! First and last packets get a longer timeout than the middle of the
//! stream: erase and final verification are the slow steps on the device.

use std::time::Duration;

use tracing::warn;
use vaultlink_proto::bootloader::{
    ABORT_ACK, ABORT_REQUEST, ACK, RECEIVING_MODE, stm_xmodem_encode,
};

use crate::{
    error::{DeviceError, Result},
    transport::Transport,
};

/// Poll interval while scanning for single-byte bootloader replies.
const RECHECK_INTERVAL: Duration = Duration::from_millis(1);

/// Timeout for mid-stream data packets.
pub const PACKET_TIMEOUT: Duration = Duration::from_millis(2000);

/// Timeout for the first and last packets (flash erase / verification).
pub const EDGE_PACKET_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Retry budget per data packet.
pub const MAX_TRIES: u32 = 5;

/// Progress callback, in whole percent.
pub type ProgressListener<'a> = &'a mut (dyn FnMut(u8) + Send);

/// Tuning for [`send_bootloader_data`].
#[derive(Debug, Clone)]
pub struct BootloaderOptions {
    /// Per-packet retry budget.
    pub max_tries: u32,
    /// Timeout for mid-stream packets.
    pub timeout: Duration,
    /// Timeout for the first and last packets.
    pub first_timeout: Duration,
}

impl Default for BootloaderOptions {
    fn default() -> Self {
        Self { max_tries: MAX_TRIES, timeout: PACKET_TIMEOUT, first_timeout: EDGE_PACKET_TIMEOUT }
    }
}

/// Map a bootloader reject byte to its error. `None` for bytes that are not
/// reject codes.
fn reject_error(byte: u8) -> Option<DeviceError> {
    match byte {
        0x07 => Some(DeviceError::FirmwareSizeLimitExceeded),
        0x08 => Some(DeviceError::WrongHardwareVersion),
        0x09 => Some(DeviceError::LowerFirmwareVersion),
        0x0A => Some(DeviceError::WrongMagicNumber),
        0x0B => Some(DeviceError::SignatureNotVerified),
        0x0C => Some(DeviceError::FlashWriteError),
        0x0D => Some(DeviceError::FlashCrcMismatch),
        0x0E => Some(DeviceError::FlashTimeoutError),
        0x15 => Some(DeviceError::FlashNack),
        _ => None,
    }
}

/// Scan incoming bytes until `predicate` resolves the wait.
async fn scan_replies<T>(
    transport: &dyn Transport,
    timeout: Duration,
    timeout_error: DeviceError,
    mut predicate: impl FnMut(u8) -> Option<Result<T>>,
) -> Result<T> {
    let scan = async {
        loop {
            if !transport.is_connected().await {
                return Err(DeviceError::ConnectionClosed);
            }

            let raw = match transport.receive().await {
                Ok(raw) => raw,
                Err(error) if error.is_connection_error() => return Err(error),
                Err(error) => {
                    warn!(%error, "receive failed while scanning bootloader replies");
                    tokio::time::sleep(RECHECK_INTERVAL).await;
                    continue;
                },
            };

            if let Some(raw) = raw {
                for &byte in raw.iter() {
                    if let Some(outcome) = predicate(byte) {
                        return outcome;
                    }
                }
            }

            tokio::time::sleep(RECHECK_INTERVAL).await;
        }
    };

    match tokio::time::timeout(timeout, scan).await {
        Ok(result) => result,
        Err(_) => {
            if transport.is_connected().await {
                Err(timeout_error)
            } else {
                Err(DeviceError::ConnectionClosed)
            }
        },
    }
}

/// Wait for the bootloader's receiving-mode beacon (`0x43`).
pub async fn check_if_in_receiving_mode(
    transport: &dyn Transport,
    timeout: Duration,
) -> Result<()> {
    scan_replies(transport, timeout, DeviceError::NotInReceivingMode, |byte| {
        (byte == RECEIVING_MODE).then_some(Ok(()))
    })
    .await
}

/// Send one packet and classify the single-byte reply.
async fn write_packet(
    transport: &dyn Transport,
    packet: &[u8],
    timeout: Duration,
) -> Result<()> {
    if let Err(_error) = transport.send(packet).await {
        if !transport.is_connected().await {
            return Err(DeviceError::ConnectionClosed);
        }
        return Err(DeviceError::WriteError);
    }

    scan_replies(transport, timeout, DeviceError::WriteTimeout, |byte| {
        if let Some(error) = reject_error(byte) {
            return Some(Err(error));
        }
        (byte == ACK).then_some(Ok(()))
    })
    .await
}

/// Upload a firmware image (hex string) through the bootloader.
///
/// Pre-flights receiving mode, then sends each XMODEM packet with retries
/// and reports progress after each accepted packet as `index * 100 / total`.
pub async fn send_bootloader_data(
    transport: &dyn Transport,
    data: &str,
    mut on_progress: Option<ProgressListener<'_>>,
    options: &BootloaderOptions,
) -> Result<()> {
    let packets = stm_xmodem_encode(data)?;

    check_if_in_receiving_mode(transport, options.timeout).await?;

    let total = packets.len();
    for (index, packet) in packets.iter().enumerate() {
        let timeout = if index == 0 || index == total - 1 {
            options.first_timeout
        } else {
            options.timeout
        };

        let mut first_error: Option<DeviceError> = None;
        let mut success = false;

        for _ in 0..options.max_tries.max(1) {
            match write_packet(transport, packet, timeout).await {
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
            return Err(first_error.unwrap_or(DeviceError::WriteError));
        }

        if let Some(listener) = on_progress.as_mut() {
            listener((index * 100 / total) as u8);
        }
    }

    Ok(())
}

/// Ask the bootloader to abort and reboot (`0x41`, acknowledged `0x18`).
pub async fn send_bootloader_abort(
    transport: &dyn Transport,
    timeout: Duration,
    max_tries: u32,
) -> Result<()> {
    if !transport.is_connected().await {
        return Err(DeviceError::ConnectionClosed);
    }

    let mut first_error: Option<DeviceError> = None;

    for _ in 0..max_tries.max(1) {
        if let Err(_error) = transport.send(&[ABORT_REQUEST]).await {
            let error = if transport.is_connected().await {
                DeviceError::WriteError
            } else {
                DeviceError::ConnectionClosed
            };
            let retryable = error.is_retryable();
            if first_error.is_none() {
                first_error = Some(error);
            }
            if !retryable {
                break;
            }
            continue;
        }

        match scan_replies(transport, timeout, DeviceError::WriteTimeout, |byte| {
            (byte == ABORT_ACK).then_some(Ok(()))
        })
        .await
        {
            Ok(()) => return Ok(()),
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

    Err(first_error.unwrap_or(DeviceError::WriteError))
}
