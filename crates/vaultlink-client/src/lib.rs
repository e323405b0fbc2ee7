//! Session layer and operation orchestrator.
//!
//! [`Sdk`] is the entry point for host applications: it negotiates the
//! protocol generation with the device during [`Sdk::create`], then
//! dispatches every operation through the dialect that generation supports.
//! Current firmware speaks the structured v3 dialect; older firmware is
//! reachable through the [`DeprecatedCommands`] adapter (legacy v1/v2
//! frames and the raw v3 window), and the ROM bootloader through the
//! firmware-update entry points.

pub mod commands;
pub mod deprecated;
pub mod session;

pub use deprecated::DeprecatedCommands;
pub use session::{CreateOptions, QueryOptions, Sdk, VersionRange, WaitForResultArgs};
