//! STM bootloader XMODEM dialect.
//!
//! Firmware upload talks to the ROM bootloader, not the application
//! firmware, and uses a classic XMODEM-1K-style framing:
//!
//! ```text
//! +------+---------+----------------+-----------------------+-------+
//! | 0x01 | n % 255 | (n % 255) XOR  | data, 0xFF-padded to  | CRC16 |
//! |      |         | 0xFF           | 128 bytes             |       |
//! +------+---------+----------------+-----------------------+-------+
//! ```
//!
//! The CRC covers the data region only. After the last data packet the host
//! sends a bare EOT byte. Device replies are single bytes: ACK, a reject
//! code, or the receiving-mode beacon the bootloader emits while waiting
//! for a transfer.

use bytes::Bytes;

use crate::{
    checksum::crc16,
    errors::{ProtocolError, Result},
    hexutil::hex_to_bytes,
};

/// Start-of-frame byte of a bootloader data packet.
pub const SOH: u8 = 0x01;

/// End-of-transmission terminator sent after the last data packet.
pub const EOT: u8 = 0x04;

/// Device acknowledgement of a data packet.
pub const ACK: u8 = 0x06;

/// Beacon the bootloader emits while in receiving mode (ASCII `C`).
pub const RECEIVING_MODE: u8 = 0x43;

/// Host request to abort the bootloader and reboot.
pub const ABORT_REQUEST: u8 = 0x41;

/// Device acknowledgement of an abort request.
pub const ABORT_ACK: u8 = 0x18;

/// Raw bytes per data packet.
pub const CHUNK_SIZE: usize = 128;

/// Encode a firmware image (hex string) into bootloader packets.
///
/// Returns one packet per 128-byte chunk, the last chunk padded with `0xFF`,
/// followed by a single-byte EOT packet. The packet counter runs modulo 255,
/// mirroring the device's 8-bit window arithmetic.
///
/// # Errors
///
/// - [`ProtocolError::EmptyData`] for an empty image
/// - [`ProtocolError::InvalidHex`] for malformed hex
pub fn stm_xmodem_encode(data: &str) -> Result<Vec<Bytes>> {
    let image = hex_to_bytes(data)?;
    if image.is_empty() {
        return Err(ProtocolError::EmptyData);
    }

    let rounds = image.len().div_ceil(CHUNK_SIZE);
    let mut packets = Vec::with_capacity(rounds + 1);

    for i in 1..=rounds {
        let chunk_start = (i - 1) * CHUNK_SIZE;
        let chunk_end = (chunk_start + CHUNK_SIZE).min(image.len());

        let mut chunk = [0xFFu8; CHUNK_SIZE];
        chunk[..chunk_end - chunk_start].copy_from_slice(&image[chunk_start..chunk_end]);

        let counter = (i % 255) as u8;
        let crc = crc16(&chunk);

        let mut packet = Vec::with_capacity(3 + CHUNK_SIZE + 2);
        packet.push(SOH);
        packet.push(counter);
        packet.push(counter ^ 0xFF);
        packet.extend_from_slice(&chunk);
        packet.extend_from_slice(&crc.to_be_bytes());
        packets.push(Bytes::from(packet));
    }

    packets.push(Bytes::from_static(&[EOT]));
    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_image() {
        let packets = stm_xmodem_encode("01020304").unwrap();
        // One data packet plus the EOT terminator.
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1].as_ref(), &[EOT]);

        let packet = &packets[0];
        assert_eq!(packet.len(), 3 + CHUNK_SIZE + 2);
        assert_eq!(packet[0], SOH);
        assert_eq!(packet[1], 1);
        assert_eq!(packet[2], 1 ^ 0xFF);
        assert_eq!(&packet[3..7], &[0x01, 0x02, 0x03, 0x04]);
        // Padding.
        assert!(packet[7..3 + CHUNK_SIZE].iter().all(|&b| b == 0xFF));

        let crc = crc16(&packet[3..3 + CHUNK_SIZE]);
        assert_eq!(&packet[3 + CHUNK_SIZE..], crc.to_be_bytes());
    }

    #[test]
    fn exact_multiple_has_no_extra_packet() {
        let image = "ab".repeat(CHUNK_SIZE * 2);
        let packets = stm_xmodem_encode(&image).unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0][1], 1);
        assert_eq!(packets[1][1], 2);
    }

    #[test]
    fn counter_wraps_modulo_255() {
        let image = "00".repeat(CHUNK_SIZE * 256);
        let packets = stm_xmodem_encode(&image).unwrap();
        // Packet 255 wraps to counter 0 (255 % 255), packet 256 to 1.
        assert_eq!(packets[254][1], 0);
        assert_eq!(packets[254][2], 0xFF);
        assert_eq!(packets[255][1], 1);
    }

    #[test]
    fn empty_image_is_rejected() {
        assert!(matches!(stm_xmodem_encode(""), Err(ProtocolError::EmptyData)));
    }

    #[test]
    fn bad_hex_is_rejected() {
        assert!(matches!(stm_xmodem_encode("zz"), Err(ProtocolError::InvalidHex(_))));
    }
}
