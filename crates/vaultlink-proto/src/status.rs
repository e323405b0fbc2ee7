//! Status-report and raw-command payload sub-codecs (v3).
//!
//! A STATUS frame's raw payload region is a fixed-width record:
//!
//! ```text
//! +--------------+----------------+-----------------+-----------+-------------+
//! | device state | abort disabled | current cmd seq | cmd state | flow status |
//! | 1 B          | 1 B            | 2 B             | 1 B       | 2 B         |
//! +--------------+----------------+-----------------+-----------+-------------+
//! ```
//!
//! The device-state byte packs two nibbles: the low nibble is the idle
//! state, the high nibble what the device is waiting on. `current_cmd_seq`
//! is zero when no command is being serviced.
//!
//! Raw command envelopes (the pre-protobuf application encoding) are a
//! 32-bit command type followed by opaque bytes.

use bytes::Bytes;

use crate::errors::{ProtocolError, Result};

/// Execution state of the command being serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CmdState {
    /// No command active.
    None = 0,
    /// Command fragments are still arriving.
    Receiving = 1,
    /// All fragments received.
    Received = 2,
    /// Command is executing.
    Executing = 3,
    /// Execution finished successfully.
    Done = 4,
    /// Execution failed.
    Failed = 5,
    /// Command was not recognized.
    InvalidCmd = 6,
    /// State unknown to this firmware.
    Unknown = 7,
}

impl CmdState {
    /// Parse a wire value. `None` for out-of-range bytes.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Receiving),
            2 => Some(Self::Received),
            3 => Some(Self::Executing),
            4 => Some(Self::Done),
            5 => Some(Self::Failed),
            6 => Some(Self::InvalidCmd),
            7 => Some(Self::Unknown),
            _ => None,
        }
    }

    /// True for the states in which the device will produce no further
    /// output for the command.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::InvalidCmd)
    }
}

/// What the device is currently waiting on (high nibble of the state byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceWaitOn {
    /// Nothing.
    None = 0,
    /// Idle.
    Idle = 1,
    /// Busy with card input.
    BusyIpCard = 2,
    /// Busy with key input.
    BusyIpKey = 3,
}

impl DeviceWaitOn {
    /// Parse a nibble. `None` for out-of-range values.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Idle),
            2 => Some(Self::BusyIpCard),
            3 => Some(Self::BusyIpKey),
            _ => None,
        }
    }
}

/// Where the device is idling (low nibble of the state byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceIdleState {
    /// Not idling.
    None = 0,
    /// Idle on the home screen.
    Idle = 1,
    /// Waiting on host (USB) input.
    Usb = 2,
    /// Waiting on on-device input.
    Device = 3,
}

impl DeviceIdleState {
    /// Parse a nibble. `None` for out-of-range values.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Idle),
            2 => Some(Self::Usb),
            3 => Some(Self::Device),
            _ => None,
        }
    }
}

/// Decoded device status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Raw device-state byte as received.
    pub device_state: u8,
    /// Low nibble of the state byte.
    pub device_idle_state: DeviceIdleState,
    /// High nibble of the state byte.
    pub device_waiting_on: DeviceWaitOn,
    /// True when the current command refuses host-side aborts.
    pub abort_disabled: bool,
    /// Sequence number of the command being serviced (0 when none).
    pub current_cmd_seq: u16,
    /// Execution state of that command.
    pub cmd_state: CmdState,
    /// Packed flow-status word (low byte operation milestone, next byte
    /// core sub-state).
    pub flow_status: u16,
}

/// Raw (pre-protobuf) command envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawData {
    /// Application command type; greater than zero in valid envelopes.
    pub command_type: u32,
    /// Opaque command bytes.
    pub data: Bytes,
}

/// Decode a fixed-width status record.
///
/// Short input is tolerated: missing trailing fields read as zero, matching
/// the defensive posture of the frame decoder.
///
/// # Errors
///
/// [`ProtocolError::InvalidStatusField`] when a nibble or the command-state
/// byte is outside its enum range.
pub fn decode_status(data: &[u8]) -> Result<Status> {
    let byte = |i: usize| data.get(i).copied().unwrap_or(0);

    let device_state = byte(0);
    let idle_nibble = device_state & 0x0F;
    let wait_nibble = device_state >> 4;

    let device_idle_state = DeviceIdleState::from_u8(idle_nibble).ok_or(
        ProtocolError::InvalidStatusField { field: "device_idle_state", value: idle_nibble },
    )?;
    let device_waiting_on = DeviceWaitOn::from_u8(wait_nibble).ok_or(
        ProtocolError::InvalidStatusField { field: "device_waiting_on", value: wait_nibble },
    )?;

    let abort_disabled = byte(1) == 1;
    let current_cmd_seq = u16::from_be_bytes([byte(2), byte(3)]);

    let cmd_state_byte = byte(4);
    let cmd_state = CmdState::from_u8(cmd_state_byte).ok_or(
        ProtocolError::InvalidStatusField { field: "cmd_state", value: cmd_state_byte },
    )?;

    let flow_status = u16::from_be_bytes([byte(5), byte(6)]);

    Ok(Status {
        device_state,
        device_idle_state,
        device_waiting_on,
        abort_disabled,
        current_cmd_seq,
        cmd_state,
        flow_status,
    })
}

/// Encode a status record. Inverse of [`decode_status`]; used by the test
/// harness to script device replies.
#[must_use]
pub fn encode_status(status: &Status) -> Vec<u8> {
    let mut out = Vec::with_capacity(7);
    out.push(status.device_state);
    out.push(u8::from(status.abort_disabled));
    out.extend_from_slice(&status.current_cmd_seq.to_be_bytes());
    out.push(status.cmd_state as u8);
    out.extend_from_slice(&status.flow_status.to_be_bytes());
    out
}

/// Encode a raw command envelope: `command_type:u32 ‖ data`.
///
/// # Errors
///
/// [`ProtocolError::EmptyData`] when `command_type` is zero (zero marks an
/// invalid envelope on the wire).
pub fn encode_raw_data(command_type: u32, data: &[u8]) -> Result<Vec<u8>> {
    if command_type == 0 {
        return Err(ProtocolError::EmptyData);
    }

    let mut out = Vec::with_capacity(4 + data.len());
    out.extend_from_slice(&command_type.to_be_bytes());
    out.extend_from_slice(data);
    Ok(out)
}

/// Decode a raw command envelope.
#[must_use]
pub fn decode_raw_data(payload: &[u8]) -> RawData {
    let mut prefix = [0u8; 4];
    let len = payload.len().min(4);
    prefix[4 - len..].copy_from_slice(&payload[..len]);
    // A short prefix right-aligns, mirroring the hex parser this replaces.
    let command_type = u32::from_be_bytes(prefix);

    RawData {
        command_type,
        data: Bytes::copy_from_slice(payload.get(4..).unwrap_or(&[])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        let status = Status {
            device_state: 0x23,
            device_idle_state: DeviceIdleState::Device,
            device_waiting_on: DeviceWaitOn::BusyIpCard,
            abort_disabled: false,
            current_cmd_seq: 50,
            cmd_state: CmdState::Unknown,
            flow_status: 132,
        };

        let encoded = encode_status(&status);
        assert_eq!(decode_status(&encoded).unwrap(), status);
    }

    #[test]
    fn state_byte_nibbles() {
        // 0x23: waiting-on nibble 2 (card input), idle nibble 3 (device).
        let status = decode_status(&[0x23, 0x00, 0x00, 0x32, 0x07, 0x00, 0x84]).unwrap();
        assert_eq!(status.device_idle_state, DeviceIdleState::Device);
        assert_eq!(status.device_waiting_on, DeviceWaitOn::BusyIpCard);
        assert!(!status.abort_disabled);
        assert_eq!(status.current_cmd_seq, 50);
        assert_eq!(status.cmd_state, CmdState::Unknown);
        assert_eq!(status.flow_status, 132);
    }

    #[test]
    fn short_input_reads_as_zero() {
        let status = decode_status(&[0x01]).unwrap();
        assert_eq!(status.device_idle_state, DeviceIdleState::Idle);
        assert_eq!(status.current_cmd_seq, 0);
        assert_eq!(status.cmd_state, CmdState::None);
        assert_eq!(status.flow_status, 0);
    }

    #[test]
    fn out_of_range_nibble_is_rejected() {
        assert!(matches!(
            decode_status(&[0x0F]),
            Err(ProtocolError::InvalidStatusField { field: "device_idle_state", .. })
        ));
        assert!(matches!(
            decode_status(&[0x00, 0x00, 0x00, 0x00, 0x09]),
            Err(ProtocolError::InvalidStatusField { field: "cmd_state", .. })
        ));
    }

    #[test]
    fn terminal_states() {
        assert!(CmdState::Done.is_terminal());
        assert!(CmdState::Failed.is_terminal());
        assert!(CmdState::InvalidCmd.is_terminal());
        assert!(!CmdState::Executing.is_terminal());
    }

    #[test]
    fn raw_data_round_trip() {
        let encoded = encode_raw_data(87, &[0xDE, 0xAD]).unwrap();
        assert_eq!(encoded, vec![0, 0, 0, 87, 0xDE, 0xAD]);

        let decoded = decode_raw_data(&encoded);
        assert_eq!(decoded.command_type, 87);
        assert_eq!(decoded.data, vec![0xDE, 0xAD]);
    }

    #[test]
    fn zero_command_type_is_rejected() {
        assert!(matches!(encode_raw_data(0, &[]), Err(ProtocolError::EmptyData)));
    }

    #[test]
    fn short_raw_payload_right_aligns() {
        let decoded = decode_raw_data(&[0x05]);
        assert_eq!(decoded.command_type, 5);
        assert!(decoded.data.is_empty());
    }
}
