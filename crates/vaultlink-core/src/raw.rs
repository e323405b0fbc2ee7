//! Raw (pre-structured) v3 command operations.
//!
//! Firmware between the legacy and structured generations speaks v3 frames
//! but addresses applications with a bare `command_type ‖ data` envelope in
//! the raw payload region. These operations exist for that window; the
//! session layer gates them behind the corresponding feature range.

use std::time::Duration;

use vaultlink_proto::{
    DeviceIdleState, PacketVersion, RawData, Status, decode_status, encode_raw_data,
};

use crate::{
    error::{DeviceError, Result},
    fragment,
    result::{PollOptions, StatusListener},
    transport::Transport,
};

/// Outcome of a raw output fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOutput {
    /// The device is still working; here is its status report.
    Status(Status),
    /// The command's raw envelope.
    Data(RawData),
}

/// Send a raw command.
pub async fn send_command(
    transport: &dyn Transport,
    version: PacketVersion,
    sequence_number: u16,
    command_type: u32,
    data: &[u8],
    max_tries: u32,
    timeout: Option<Duration>,
) -> Result<()> {
    let raw_data = encode_raw_data(command_type, data)?;
    fragment::send_command(transport, version, sequence_number, &raw_data, &[], max_tries, timeout)
        .await
}

/// Fetch the device's current raw output for `sequence_number` once.
pub async fn get_command_output(
    transport: &dyn Transport,
    version: PacketVersion,
    sequence_number: u16,
    max_tries: u32,
    timeout: Option<Duration>,
) -> Result<RawOutput> {
    let output =
        fragment::get_command_output(transport, version, sequence_number, max_tries, timeout)
            .await?;

    if output.is_status {
        let status = decode_status(&output.payload.raw_data)?;
        return Ok(RawOutput::Status(status));
    }

    Ok(RawOutput::Data(vaultlink_proto::decode_raw_data(&output.payload.raw_data)))
}

/// Long-poll until the raw command's output arrives.
///
/// A reply whose command type is not in `expected_command_types` is a
/// protocol violation ⇒ [`DeviceError::InvalidMsgFromDevice`]. STATUS
/// iterations are classified the same way as the structured poll loop.
pub async fn wait_for_command_output(
    transport: &dyn Transport,
    version: PacketVersion,
    sequence_number: u16,
    expected_command_types: &[u32],
    mut on_status: Option<StatusListener<'_>>,
    options: &PollOptions,
) -> Result<RawData> {
    debug_assert!(!expected_command_types.is_empty(), "expected command types must not be empty");

    loop {
        let output = get_command_output(
            transport,
            version,
            sequence_number,
            options.max_tries,
            options.timeout,
        )
        .await?;

        match output {
            RawOutput::Data(raw) => {
                if !expected_command_types.contains(&raw.command_type) {
                    return Err(DeviceError::InvalidMsgFromDevice);
                }
                return Ok(raw);
            },
            RawOutput::Status(status) => {
                if status.current_cmd_seq != sequence_number {
                    return Err(DeviceError::ExecutingOtherCommand);
                }
                if status.cmd_state.is_terminal() {
                    return Err(DeviceError::InvalidMsgFromDevice);
                }
                if status.device_idle_state == DeviceIdleState::Usb {
                    if let Some(listener) = on_status.as_mut() {
                        listener(&status);
                    }
                }
            },
        }

        tokio::time::sleep(options.interval).await;
    }
}

/// Fetch and decode a status report (raw dialect).
pub async fn get_status(
    transport: &dyn Transport,
    version: PacketVersion,
    max_tries: u32,
    timeout: Option<Duration>,
) -> Result<Status> {
    let payload = fragment::get_status(transport, version, max_tries, timeout).await?;
    Ok(decode_status(&payload.raw_data)?)
}

/// Abort the raw command currently being serviced.
pub async fn send_abort(
    transport: &dyn Transport,
    version: PacketVersion,
    sequence_number: u16,
    max_tries: u32,
    timeout: Option<Duration>,
) -> Result<Status> {
    fragment::send_abort(transport, version, sequence_number, max_tries, timeout).await
}
