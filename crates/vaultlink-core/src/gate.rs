//! SDK-version parsing and feature gates.
//!
//! The handshake reply carries the device's SDK version as three 16-bit
//! hex fields. That version picks the packet generation for the connection
//! and gates which command dialects the session may use: the raw dialect
//! existed for the `[2.0.0, 3.0.0)` firmware window, the structured dialect
//! from `3.0.0`. Ranges are from-inclusive, to-exclusive.

use semver::Version;
use vaultlink_proto::PacketVersion;

use crate::error::{DeviceError, Result};

/// SDK-version ranges and the packet generation each maps to.
const SDK_TO_PACKET_VERSION: &[(&str, &str, PacketVersion)] = &[
    ("0.0.1", "1.0.0", PacketVersion::V1),
    ("1.0.0", "2.0.0", PacketVersion::V2),
    ("2.0.0", "3.0.0", PacketVersion::V3),
    ("3.0.0", "4.0.0", PacketVersion::V3),
];

/// Command dialects gated by the device's SDK version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Raw `command_type ‖ data` envelopes over v3 frames.
    RawCommand,
    /// Structured envelopes over v3 frames.
    ProtoCommand,
}

impl Feature {
    /// `[from, to)` SDK-version window in which the feature is available.
    #[must_use]
    pub fn window(self) -> (&'static str, Option<&'static str>) {
        match self {
            Self::RawCommand => ("2.0.0", Some("3.0.0")),
            Self::ProtoCommand => ("3.0.0", Some("4.0.0")),
        }
    }

    /// True when `sdk_version` falls inside this feature's window.
    /// Unparseable versions gate everything off.
    #[must_use]
    pub fn is_enabled(self, sdk_version: &str) -> bool {
        let Ok(version) = Version::parse(sdk_version) else {
            return false;
        };

        let (from, to) = self.window();
        let Ok(from) = Version::parse(from) else {
            return false;
        };

        let mut enabled = version >= from;
        if let Some(to) = to {
            if let Ok(to) = Version::parse(to) {
                enabled = enabled && version < to;
            }
        }
        enabled
    }
}

/// Format the 12-hex-character handshake reply as `major.minor.patch`.
///
/// The reply packs three 16-bit big-endian fields; extra trailing
/// characters are ignored.
pub fn format_sdk_version(reply: &str) -> Result<String> {
    if reply.len() < 12 || !reply.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DeviceError::InvalidMsgFromDevice);
    }

    let field = |range: std::ops::Range<usize>| {
        u16::from_str_radix(&reply[range], 16).map_err(|_| DeviceError::InvalidMsgFromDevice)
    };

    let major = field(0..4)?;
    let minor = field(4..8)?;
    let patch = field(8..12)?;

    Ok(format!("{major}.{minor}.{patch}"))
}

/// Packet generation for a device SDK version. `None` when the version
/// falls outside every supported range.
#[must_use]
pub fn packet_version_for(sdk_version: &str) -> Option<PacketVersion> {
    let version = Version::parse(sdk_version).ok()?;

    for (from, to, packet_version) in SDK_TO_PACKET_VERSION {
        let from = Version::parse(from).ok()?;
        let to = Version::parse(to).ok()?;
        if version >= from && version < to {
            return Some(*packet_version);
        }
    }

    None
}

/// Compare two dotted versions. `None` when either fails to parse.
#[must_use]
pub fn compare_versions(left: &str, right: &str) -> Option<std::cmp::Ordering> {
    let left = Version::parse(left).ok()?;
    let right = Version::parse(right).ok()?;
    Some(left.cmp(&right))
}
