//! Packet codecs and bit/byte primitives for the Vaultlink device protocol.
//!
//! This crate is the pure-codec layer of the SDK: it knows how to turn
//! application payloads into on-wire frames (and back) for the three packet
//! generations the device family has shipped, but performs no I/O and holds
//! no session state. Everything here is deterministic and synchronous.
//!
//! # Packet generations
//!
//! - [`version::PacketVersion::V1`] / `V2`: legacy byte-stuffed XMODEM-style
//!   frames ([`legacy`]).
//! - [`version::PacketVersion::V3`]: typed framed packets with explicit
//!   sequence numbers and acknowledgement semantics ([`packet`]).
//! - A separate STM bootloader dialect used only for firmware upload
//!   ([`bootloader`]).
//!
//! Frame payloads are opaque byte strings at this layer; the [`status`]
//! module decodes the one payload format the protocol itself defines (the
//! device status report and the raw command envelope).

pub mod bootloader;
pub mod checksum;
pub mod errors;
pub mod hexutil;
pub mod legacy;
pub mod packet;
pub mod status;
pub mod stuffing;
pub mod version;

pub use checksum::crc16;
pub use errors::ProtocolError;
pub use legacy::{LegacyPacket, xmodem_decode, xmodem_encode};
pub use packet::{
    DecodedPacket, PacketType, PayloadData, RejectReason, STATUS_SEQUENCE_NUMBER, decode_packet,
    decode_payload_data, encode_packet, encode_payload_data,
};
pub use status::{
    CmdState, DeviceIdleState, DeviceWaitOn, RawData, Status, decode_raw_data, decode_status,
    encode_raw_data, encode_status,
};
pub use version::{PacketConfig, PacketVersion};
