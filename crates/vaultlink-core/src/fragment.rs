//! Outbound fragmenter and inbound assembler for v3 commands.
//!
//! Outbound: [`send_command`] splits a payload across frames and drives each
//! one through the write/ack loop, retrying per frame. Inbound:
//! [`get_command_output`] requests output fragments one at a time and
//! reassembles them by their explicit `(current, total)` indices, so
//! out-of-order delivery is harmless. A STATUS frame observed while
//! assembling terminates the collection and is surfaced to the caller in
//! place of data.
//!
//! Every retry loop here keeps the FIRST error and rethrows it when the
//! budget is exhausted; an error the central predicate calls non-retryable
//! short-circuits the budget immediately.

use std::{
    collections::BTreeMap,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use vaultlink_proto::{
    PacketType, PacketVersion, PayloadData, STATUS_SEQUENCE_NUMBER, Status, decode_payload_data,
    decode_status, encode_packet,
};

use crate::{
    ack::write_command,
    error::{DeviceError, Result},
    transport::Transport,
};

/// Default retry budget for v3 operations.
pub const DEFAULT_MAX_TRIES: u32 = 5;

/// Default retry budget for aborts (they are already a recovery path).
pub const ABORT_MAX_TRIES: u32 = 2;

/// Low 32 bits of the Unix epoch in milliseconds, the timestamp stamped
/// into outbound frames. Any monotonically increasing value satisfies the
/// device; the truncation is deliberate.
#[must_use]
pub fn frame_timestamp() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as u32)
}

/// Reassembled command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Payload regions of the reassembled message (or of the STATUS frame
    /// when `is_status` is set).
    pub payload: PayloadData,
    /// True when the collection terminated on a STATUS frame instead of
    /// output data.
    pub is_status: bool,
}

/// Send an application command, fragmenting as needed.
///
/// Each frame is retried up to `max_tries` times expecting a `CMD_ACK`;
/// with `max_tries == 1` the very first error is raised immediately and no
/// retry sleep ever happens (there are none in this loop by design).
pub async fn send_command(
    transport: &dyn Transport,
    version: PacketVersion,
    sequence_number: u16,
    raw_data: &[u8],
    proto_data: &[u8],
    max_tries: u32,
    timeout: Option<Duration>,
) -> Result<()> {
    if version != PacketVersion::V3 {
        return Err(DeviceError::InvalidSdkOperation);
    }

    let frames = encode_packet(
        raw_data,
        proto_data,
        version,
        sequence_number,
        PacketType::Cmd,
        frame_timestamp(),
    )?;

    for frame in &frames {
        let mut first_error: Option<DeviceError> = None;
        let mut success = false;

        for _ in 0..max_tries.max(1) {
            match write_command(
                transport,
                frame,
                version,
                sequence_number,
                &[PacketType::CmdAck],
                timeout,
            )
            .await
            {
                Ok(_) => {
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
            return Err(first_error.unwrap_or(DeviceError::UnknownCommunication));
        }
    }

    Ok(())
}

/// Collect the device's output for `sequence_number`.
///
/// Fragments are requested by index (a 16-bit raw payload per request) and
/// stored by the index the device returns, so replies may arrive out of
/// order. The device advertises the total as it goes; the loop runs until
/// the cursor passes it. A STATUS frame ends the loop early with
/// `is_status == true` and its own payload.
pub async fn get_command_output(
    transport: &dyn Transport,
    version: PacketVersion,
    sequence_number: u16,
    max_tries: u32,
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    if version != PacketVersion::V3 {
        return Err(DeviceError::InvalidSdkOperation);
    }

    let mut fragments: BTreeMap<u16, Bytes> = BTreeMap::new();
    let mut total_packets = 1u32;
    let mut current_packet = 1u32;
    let mut is_status = false;

    while current_packet <= total_packets {
        let frames = encode_packet(
            &(current_packet as u16).to_be_bytes(),
            &[],
            version,
            sequence_number,
            PacketType::CmdOutputReq,
            frame_timestamp(),
        )?;
        debug_assert_eq!(frames.len(), 1, "output request always fits one frame");

        let mut first_error: Option<DeviceError> = None;
        let mut success = false;

        for _ in 0..max_tries.max(1) {
            match write_command(
                transport,
                &frames[0],
                version,
                sequence_number,
                &[PacketType::CmdOutput, PacketType::Status],
                timeout,
            )
            .await
            {
                Ok(received) => {
                    fragments.insert(received.current_packet_number, received.payload.clone());
                    total_packets = u32::from(received.total_packet_number);
                    current_packet = u32::from(received.current_packet_number) + 1;
                    is_status = received.kind() == Some(PacketType::Status);
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
            return Err(first_error.unwrap_or(DeviceError::UnknownCommunication));
        }
    }

    let mut assembled = Vec::new();
    for chunk in fragments.values() {
        assembled.extend_from_slice(chunk);
    }

    Ok(CommandOutput { payload: decode_payload_data(&assembled), is_status })
}

/// Ping the device for a status report.
///
/// Uses the reserved sequence number `0xFFFF`: status traffic belongs to no
/// command.
pub async fn get_status(
    transport: &dyn Transport,
    version: PacketVersion,
    max_tries: u32,
    timeout: Option<Duration>,
) -> Result<PayloadData> {
    if version != PacketVersion::V3 {
        return Err(DeviceError::InvalidSdkOperation);
    }

    let frames = encode_packet(
        &[],
        &[],
        version,
        STATUS_SEQUENCE_NUMBER,
        PacketType::StatusReq,
        frame_timestamp(),
    )?;
    debug_assert_eq!(frames.len(), 1, "status request always fits one frame");

    let mut first_error: Option<DeviceError> = None;

    for _ in 0..max_tries.max(1) {
        match write_command(
            transport,
            &frames[0],
            version,
            STATUS_SEQUENCE_NUMBER,
            &[PacketType::Status],
            timeout,
        )
        .await
        {
            Ok(received) => return Ok(decode_payload_data(&received.payload)),
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

    Err(first_error.unwrap_or(DeviceError::UnknownCommunication))
}

/// Abort the command currently being serviced.
///
/// The device answers with a STATUS report; a report naming a different
/// sequence than `sequence_number` means some other command is being
/// serviced and the abort did not apply ⇒
/// [`DeviceError::ExecutingOtherCommand`].
pub async fn send_abort(
    transport: &dyn Transport,
    version: PacketVersion,
    sequence_number: u16,
    max_tries: u32,
    timeout: Option<Duration>,
) -> Result<Status> {
    if version != PacketVersion::V3 {
        return Err(DeviceError::InvalidSdkOperation);
    }

    let frames = encode_packet(
        &[],
        &[],
        version,
        sequence_number,
        PacketType::Abort,
        frame_timestamp(),
    )?;
    debug_assert_eq!(frames.len(), 1, "abort always fits one frame");

    let mut first_error: Option<DeviceError> = None;

    for _ in 0..max_tries.max(1) {
        let attempt = async {
            let received = write_command(
                transport,
                &frames[0],
                version,
                sequence_number,
                &[PacketType::Status],
                timeout,
            )
            .await?;

            let payload = decode_payload_data(&received.payload);
            let status = decode_status(&payload.raw_data)?;

            if status.current_cmd_seq != sequence_number {
                return Err(DeviceError::ExecutingOtherCommand);
            }
            Ok(status)
        };

        match attempt.await {
            Ok(status) => return Ok(status),
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

    Err(first_error.unwrap_or(DeviceError::UnknownCommunication))
}
