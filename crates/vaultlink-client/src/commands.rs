//! Session-level device commands.
//!
//! These are core-addressed commands (applet id 0): they talk to the
//! device's command core rather than to an applet, using the same
//! send/wait machinery as application queries.

use vaultlink_core::{
    Transport,
    error::{DeviceError, Result},
    fragment,
    result::{self, PollOptions},
    wire::{AppVersionCmd, AppVersionEntry, Envelope},
};
use vaultlink_proto::PacketVersion;

/// Fetch the device's app-version table.
pub(crate) async fn get_app_versions(
    transport: &dyn Transport,
    sequence_number: u16,
) -> Result<Vec<AppVersionEntry>> {
    let request = Envelope::AppVersion(AppVersionCmd::Request).encode();

    fragment::send_command(
        transport,
        PacketVersion::V3,
        sequence_number,
        &[],
        &request,
        fragment::DEFAULT_MAX_TRIES,
        None,
    )
    .await?;

    let reply = result::wait_for_result(
        transport,
        PacketVersion::V3,
        0,
        sequence_number,
        None,
        &PollOptions::default(),
    )
    .await?;

    match Envelope::decode(&reply)? {
        Some(Envelope::AppVersion(AppVersionCmd::Response(response))) => {
            if let Some(common_error) = response.common_error {
                return Err(common_error.to_error());
            }
            Ok(response.app_versions)
        },
        _ => Err(DeviceError::InvalidMsgFromDevice),
    }
}
