//! Adapter for the deprecated command dialects.
//!
//! Two generations live here: the legacy v1/v2 byte-stuffed commands, and
//! the raw `command_type ‖ data` dialect spoken over v3 frames by the
//! `[2.0.0, 3.0.0)` firmware window. Both are gated on the session's
//! negotiated SDK version; calling them on newer firmware is an
//! [`DeviceError::InvalidSdkOperation`].

use std::time::Duration;

use bytes::Bytes;
use vaultlink_core::{
    DeviceState,
    error::{DeviceError, Result},
    fragment,
    gate::Feature,
    legacy_xfer, raw,
    result::{PollOptions, StatusListener},
};
use vaultlink_proto::{RawData, Status};

use crate::session::Sdk;

/// Deprecated dialects of a [`Sdk`] session.
pub struct DeprecatedCommands<'a> {
    sdk: &'a Sdk,
}

impl<'a> DeprecatedCommands<'a> {
    pub(crate) fn new(sdk: &'a Sdk) -> Self {
        Self { sdk }
    }

    /// True when the session speaks a legacy (v1/v2) generation.
    pub async fn is_legacy_operation_supported(&self) -> Result<bool> {
        let Some(packet_version) = self.sdk.packet_version() else {
            return Ok(false);
        };
        if self.sdk.get_device_state().await? == DeviceState::Bootloader {
            return Ok(false);
        }
        Ok(packet_version.is_legacy())
    }

    /// True when the firmware falls in the raw-command window.
    pub async fn is_raw_operation_supported(&self) -> Result<bool> {
        if self.sdk.get_device_state().await? == DeviceState::Bootloader {
            return Ok(false);
        }
        Ok(Feature::RawCommand.is_enabled(self.sdk.version()))
    }

    // ---- legacy v1/v2 dialect ----

    /// Send a legacy command frame sequence.
    pub async fn send_legacy_command(
        &self,
        command: u32,
        data: &[u8],
        max_tries: u32,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.sdk.validate_not_in_bootloader().await?;
        let version = self.sdk.require_packet_version()?;

        legacy_xfer::send_data(self.sdk.transport(), command, data, version, max_tries, timeout)
            .await
    }

    /// Collect a legacy reply carrying one of `commands`.
    pub async fn receive_legacy_command(
        &self,
        commands: &[u32],
        timeout: Option<Duration>,
    ) -> Result<(u32, Bytes)> {
        self.sdk.validate_not_in_bootloader().await?;
        let version = self.sdk.require_packet_version()?;

        let reply =
            legacy_xfer::receive_data(self.sdk.transport(), commands, version, timeout).await?;
        Ok((reply.command_type, reply.data))
    }

    // ---- raw v3 dialect ----

    async fn require_raw_dialect(&self) -> Result<vaultlink_proto::PacketVersion> {
        self.sdk.validate_not_in_bootloader().await?;
        let version = self.sdk.require_packet_version()?;
        if !self.is_raw_operation_supported().await? {
            return Err(DeviceError::InvalidSdkOperation);
        }
        Ok(version)
    }

    /// Send a raw command.
    pub async fn send_command(
        &self,
        command_type: u32,
        data: &[u8],
        sequence_number: u16,
        max_tries: u32,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let version = self.require_raw_dialect().await?;
        raw::send_command(
            self.sdk.transport(),
            version,
            sequence_number,
            command_type,
            data,
            max_tries,
            timeout,
        )
        .await
    }

    /// Fetch the raw output for `sequence_number` once.
    pub async fn get_command_output(
        &self,
        sequence_number: u16,
        max_tries: u32,
        timeout: Option<Duration>,
    ) -> Result<raw::RawOutput> {
        let version = self.require_raw_dialect().await?;
        raw::get_command_output(self.sdk.transport(), version, sequence_number, max_tries, timeout)
            .await
    }

    /// Long-poll until the raw command's output arrives.
    pub async fn wait_for_command_output(
        &self,
        sequence_number: u16,
        expected_command_types: &[u32],
        on_status: Option<StatusListener<'_>>,
        options: &PollOptions,
    ) -> Result<RawData> {
        let version = self.require_raw_dialect().await?;
        raw::wait_for_command_output(
            self.sdk.transport(),
            version,
            sequence_number,
            expected_command_types,
            on_status,
            options,
        )
        .await
    }

    /// Fetch and decode a status report.
    pub async fn get_command_status(&self) -> Result<Status> {
        let version = self.require_raw_dialect().await?;
        raw::get_status(self.sdk.transport(), version, fragment::DEFAULT_MAX_TRIES, None).await
    }

    /// Abort the raw command currently being serviced.
    pub async fn send_command_abort(&self, sequence_number: u16) -> Result<Status> {
        let version = self.require_raw_dialect().await?;
        raw::send_abort(
            self.sdk.transport(),
            version,
            sequence_number,
            fragment::ABORT_MAX_TRIES,
            None,
        )
        .await
    }
}
