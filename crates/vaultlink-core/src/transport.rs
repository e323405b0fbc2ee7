//! Transport capability.
//!
//! The SDK talks to a device through this narrow async trait; concrete
//! implementations (raw HID, serial, USB bulk) live outside the workspace
//! as adapters, and the test harness ships a deterministic in-memory one.
//!
//! A transport owns a receive pool fed by a background reader the
//! implementation starts in [`Transport::before_operation`] and stops in
//! [`Transport::after_operation`] (or `destroy`). The engine consumes the
//! pool through [`Transport::receive`] (pop-front) and [`Transport::peek`]
//! (read-only snapshot, used by the legacy ACK scan which must not consume
//! frames meant for the reply collector).
//!
//! Implementations must support one concurrent send and one concurrent
//! receive per connection. Callers must not run two top-level operations on
//! the same connection concurrently.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// USB vendor id of the device family.
pub const VENDOR_ID: u16 = 0x3503;

/// Hardware revision (PID high byte) this SDK supports.
pub const SUPPORTED_HARDWARE_VERSION: u8 = 0x01;

/// Which firmware the device is currently running, derived from the USB
/// product id's low byte during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    /// ROM bootloader (firmware update mode).
    Bootloader,
    /// Application firmware, device not yet set up.
    Initial,
    /// Application firmware, main mode.
    Main,
}

impl DeviceState {
    /// Derive the state from a USB product id. `None` when the PID does not
    /// belong to a supported device.
    #[must_use]
    pub fn from_product_id(product_id: u16) -> Option<Self> {
        let hardware = (product_id >> 8) as u8;
        if hardware != SUPPORTED_HARDWARE_VERSION {
            return None;
        }

        match (product_id & 0xFF) as u8 {
            0x01 => Some(Self::Bootloader),
            0x02 => Some(Self::Initial),
            0x03 => Some(Self::Main),
            _ => None,
        }
    }

    /// True when the device is running the ROM bootloader.
    #[must_use]
    pub fn is_bootloader(self) -> bool {
        matches!(self, Self::Bootloader)
    }
}

/// One buffered frame in the transport's receive pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    /// Monotonic id assigned by the transport; lets peek-based consumers
    /// remember what they have already examined.
    pub id: u64,
    /// Frame bytes as read from the wire.
    pub data: Bytes,
}

/// Byte transport to a single device.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the underlying device handle.
    async fn connect(&self) -> Result<()>;

    /// Tear the connection down and release the device.
    async fn destroy(&self) -> Result<()>;

    /// True while the device is attached and the handle is open.
    async fn is_connected(&self) -> bool;

    /// Start the background reader feeding the receive pool.
    async fn before_operation(&self) -> Result<()>;

    /// Stop the background reader.
    async fn after_operation(&self) -> Result<()>;

    /// Write all of `data` to the device. May fail mid-write on disconnect.
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Pop the next buffered frame, or `None` when the pool is empty.
    /// Non-blocking.
    async fn receive(&self) -> Result<Option<Bytes>>;

    /// Snapshot the receive pool without consuming it.
    async fn peek(&self) -> Result<Vec<PoolEntry>>;

    /// Current device state from enumeration data.
    async fn get_device_state(&self) -> Result<DeviceState>;

    /// Sequence number of the most recently issued command.
    async fn get_sequence_number(&self) -> u16;

    /// Advance and return the per-connection sequence counter.
    async fn get_new_sequence_number(&self) -> u16;
}
