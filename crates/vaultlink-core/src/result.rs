//! Structured result retrieval for v3 commands.
//!
//! A command's output is an envelope: either a core-level error, an applet
//! reply tagged with the applet id that produced it, or core data (the
//! app-version table). [`wait_for_result`] long-polls the assembler until
//! the envelope arrives, forwarding intermediate STATUS reports to the
//! caller's listener while the device is waiting on host input.

use std::time::Duration;

use bytes::Bytes;
use tracing::debug;
use vaultlink_proto::{DeviceIdleState, PacketVersion, Status, decode_status};

use crate::{
    error::{DeviceError, Result},
    fragment::{self, DEFAULT_MAX_TRIES},
    transport::Transport,
    wire::Envelope,
};

/// Tuning for the long-poll loop.
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Sleep between status-bearing iterations.
    pub interval: Duration,
    /// Retry budget per underlying exchange.
    pub max_tries: u32,
    /// Per-exchange ACK timeout override.
    pub timeout: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self { interval: Duration::from_millis(200), max_tries: DEFAULT_MAX_TRIES, timeout: None }
    }
}

/// Listener invoked with each STATUS report observed while waiting.
pub type StatusListener<'a> = &'a mut (dyn FnMut(&Status) + Send);

/// Outcome of a single output fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultOutput {
    /// The device is still working; here is its status report.
    Status(Status),
    /// The command's result payload.
    Data(Bytes),
}

/// Fetch the device's current output for `sequence_number` once.
///
/// Resolves the envelope when data is present: core errors become typed
/// [`DeviceError`]s, applet replies are checked against `applet_id`, and
/// the returned bytes are the raw body when one exists, the structured body
/// otherwise.
pub async fn get_result(
    transport: &dyn Transport,
    version: PacketVersion,
    applet_id: u32,
    sequence_number: u16,
    max_tries: u32,
    timeout: Option<Duration>,
) -> Result<ResultOutput> {
    let output =
        fragment::get_command_output(transport, version, sequence_number, max_tries, timeout)
            .await?;

    if output.is_status {
        let status = decode_status(&output.payload.raw_data)?;
        if status.current_cmd_seq != sequence_number {
            return Err(DeviceError::ExecutingOtherCommand);
        }
        return Ok(ResultOutput::Status(status));
    }

    let data = resolve_envelope(applet_id, &output.payload.proto_data, &output.payload.raw_data)?;
    Ok(ResultOutput::Data(data))
}

/// Long-poll until the command's result arrives.
///
/// STATUS iterations are classified before sleeping:
///
/// - a report naming another sequence ⇒ [`DeviceError::ExecutingOtherCommand`];
/// - a terminal command state without output is a device contract violation
///   ⇒ [`DeviceError::InvalidMsgFromDevice`];
/// - a device waiting on host (USB) input is forwarded to `on_status`.
pub async fn wait_for_result(
    transport: &dyn Transport,
    version: PacketVersion,
    applet_id: u32,
    sequence_number: u16,
    mut on_status: Option<StatusListener<'_>>,
    options: &PollOptions,
) -> Result<Bytes> {
    loop {
        let output = fragment::get_command_output(
            transport,
            version,
            sequence_number,
            options.max_tries,
            options.timeout,
        )
        .await?;

        if !output.is_status {
            return resolve_envelope(
                applet_id,
                &output.payload.proto_data,
                &output.payload.raw_data,
            );
        }

        let status = decode_status(&output.payload.raw_data)?;

        if status.current_cmd_seq != sequence_number {
            return Err(DeviceError::ExecutingOtherCommand);
        }

        if status.cmd_state.is_terminal() {
            // The device claims the command finished yet produced no
            // output frame for it.
            return Err(DeviceError::InvalidMsgFromDevice);
        }

        if status.device_idle_state == DeviceIdleState::Usb {
            if let Some(listener) = on_status.as_mut() {
                listener(&status);
            }
        }

        tokio::time::sleep(options.interval).await;
    }
}

/// Fetch and decode a status report.
pub async fn get_status(
    transport: &dyn Transport,
    version: PacketVersion,
    max_tries: u32,
    timeout: Option<Duration>,
) -> Result<Status> {
    let payload = fragment::get_status(transport, version, max_tries, timeout).await?;
    let status = decode_status(&payload.raw_data)?;
    debug!(?status, "received status");
    Ok(status)
}

fn resolve_envelope(applet_id: u32, proto_data: &[u8], raw_data: &[u8]) -> Result<Bytes> {
    match Envelope::decode(proto_data)? {
        Some(Envelope::Error(error_type)) => Err(error_type.to_error()),
        Some(Envelope::Cmd { applet_id: reply_applet_id }) => {
            if reply_applet_id != applet_id {
                return Err(DeviceError::InvalidAppIdFromDevice);
            }
            if raw_data.is_empty() {
                Ok(Bytes::copy_from_slice(proto_data))
            } else {
                Ok(Bytes::copy_from_slice(raw_data))
            }
        },
        // Core data (e.g. the app-version table) and envelope-less payloads
        // are returned whole for the caller to interpret.
        Some(Envelope::AppVersion(_)) | None => Ok(Bytes::copy_from_slice(proto_data)),
    }
}
