//! Byte stuffing for the legacy (v1/v2) framing.
//!
//! The legacy generations reuse their start-of-frame byte inside frame
//! bodies, so the body is escaped: the generation's stuffing byte becomes
//! the pair `A3 3A`, and a literal `A3` becomes `A3 33`. Stuffing is applied
//! after the CRC has been computed and appended, so the CRC itself is
//! subject to escaping.

use crate::version::PacketVersion;

const ESCAPE: u8 = 0xA3;
const ESCAPED_STUFFING: u8 = 0x3A;
const ESCAPED_ESCAPE: u8 = 0x33;

/// Escape `input` for the given legacy generation.
#[must_use]
pub fn byte_stuff(input: &[u8], version: PacketVersion) -> Vec<u8> {
    let stuffing_byte = version.config().stuffing_byte;
    let mut output = Vec::with_capacity(input.len() + input.len() / 4);

    for &byte in input {
        if byte == stuffing_byte {
            output.push(ESCAPE);
            output.push(ESCAPED_STUFFING);
        } else if byte == ESCAPE {
            output.push(ESCAPE);
            output.push(ESCAPED_ESCAPE);
        } else {
            output.push(byte);
        }
    }

    output
}

/// Invert [`byte_stuff`].
///
/// An `A3` followed by anything other than `3A`/`33`, or a lone trailing
/// `A3`, is passed through unchanged; the CRC check downstream catches the
/// corruption.
#[must_use]
pub fn byte_unstuff(input: &[u8], version: PacketVersion) -> Vec<u8> {
    let stuffing_byte = version.config().stuffing_byte;
    let mut output = Vec::with_capacity(input.len());

    let mut i = 0;
    while i < input.len() {
        if input[i] == ESCAPE && i + 1 < input.len() {
            match input[i + 1] {
                ESCAPED_STUFFING => {
                    output.push(stuffing_byte);
                    i += 1;
                },
                ESCAPED_ESCAPE => {
                    output.push(ESCAPE);
                    i += 1;
                },
                _ => output.push(input[i]),
            }
        } else {
            output.push(input[i]);
        }
        i += 1;
    }

    output
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn stuffing_byte_is_escaped() {
        assert_eq!(byte_stuff(&[0xAA], PacketVersion::V1), vec![0xA3, 0x3A]);
        assert_eq!(byte_stuff(&[0x5A], PacketVersion::V2), vec![0xA3, 0x3A]);
        // v2 does not escape v1's stuffing byte.
        assert_eq!(byte_stuff(&[0xAA], PacketVersion::V2), vec![0xAA]);
    }

    #[test]
    fn escape_byte_is_escaped() {
        assert_eq!(byte_stuff(&[0xA3], PacketVersion::V1), vec![0xA3, 0x33]);
        assert_eq!(byte_stuff(&[0xA3], PacketVersion::V2), vec![0xA3, 0x33]);
    }

    #[test]
    fn unknown_escape_sequence_passes_through() {
        assert_eq!(byte_unstuff(&[0xA3, 0x01], PacketVersion::V1), vec![0xA3, 0x01]);
    }

    #[test]
    fn trailing_escape_passes_through() {
        assert_eq!(byte_unstuff(&[0x01, 0xA3], PacketVersion::V1), vec![0x01, 0xA3]);
    }

    proptest! {
        #[test]
        fn round_trip_v1(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let stuffed = byte_stuff(&data, PacketVersion::V1);
            prop_assert_eq!(byte_unstuff(&stuffed, PacketVersion::V1), data);
        }

        #[test]
        fn round_trip_v2(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let stuffed = byte_stuff(&data, PacketVersion::V2);
            prop_assert_eq!(byte_unstuff(&stuffed, PacketVersion::V2), data);
        }

        #[test]
        fn stuffed_output_never_contains_the_stuffing_byte_alone(
            data in prop::collection::vec(any::<u8>(), 0..256)
        ) {
            let stuffed = byte_stuff(&data, PacketVersion::V1);
            // 0xAA can only appear as the original payload of another escape,
            // never as a raw frame delimiter.
            prop_assert!(!stuffed.contains(&0xAA));
        }
    }
}
