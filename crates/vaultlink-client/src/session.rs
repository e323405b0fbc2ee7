//! The `Sdk` session type.
//!
//! One `Sdk` owns one device connection. Creation runs the discovery
//! handshake (a legacy v1 exchange every firmware generation understands),
//! derives the device's SDK version and pins the packet generation for the
//! life of the session. Operations then gate themselves on that version:
//! the structured dialect needs the `ProtoCommand` feature window, anything
//! else goes through [`crate::DeprecatedCommands`].

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tracing::warn;
use vaultlink_core::{
    DeviceState, Transport, bootloader_xfer,
    bootloader_xfer::BootloaderOptions,
    error::{DeviceError, Result},
    fragment, gate,
    gate::Feature,
    legacy_xfer, raw,
    result::{self, PollOptions, ResultOutput, StatusListener},
    wire::AppVersionEntry,
};
use vaultlink_proto::{DeviceIdleState, PacketVersion, Status};

use crate::{commands, deprecated::DeprecatedCommands};

/// Legacy command code of the SDK-version discovery exchange.
const SDK_VERSION_COMMAND: u32 = 0x58;

/// Options for [`Sdk::create`].
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Handshake retry budget.
    pub max_tries: u32,
    /// Timeout for the version reply.
    pub timeout: Duration,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self { max_tries: 2, timeout: Duration::from_millis(5000) }
    }
}

/// Options for the v3 command entry points.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Use this sequence number instead of acquiring a fresh one.
    pub sequence_number: Option<u16>,
    /// Retry budget override.
    pub max_tries: Option<u32>,
    /// ACK timeout override.
    pub timeout: Option<Duration>,
}

/// Arguments for [`Sdk::wait_for_result`].
#[derive(Default)]
pub struct WaitForResultArgs<'a> {
    /// Wait for this sequence instead of the latest issued one.
    pub sequence_number: Option<u16>,
    /// Listener for intermediate STATUS reports.
    pub on_status: Option<StatusListener<'a>>,
    /// Long-poll tuning.
    pub options: PollOptions,
}

/// An app-version window an operation requires, from-inclusive,
/// to-exclusive.
#[derive(Debug, Clone)]
pub struct VersionRange {
    /// Minimum app version (inclusive).
    pub from: &'static str,
    /// Upper bound (exclusive), when one exists.
    pub to: Option<&'static str>,
}

/// A session with a single device.
pub struct Sdk {
    transport: Arc<dyn Transport>,
    applet_id: u32,
    version: String,
    packet_version: Option<PacketVersion>,
    app_versions: std::sync::Mutex<Option<Vec<AppVersionEntry>>>,
}

impl Sdk {
    /// Run the discovery handshake and build a session.
    ///
    /// A device enumerated in bootloader state skips the handshake and
    /// reports SDK version `0.0.0` with no packet generation.
    pub async fn create(
        transport: Arc<dyn Transport>,
        applet_id: u32,
        options: &CreateOptions,
    ) -> Result<Self> {
        let (version, packet_version) = Self::get_sdk_version(transport.as_ref(), options).await?;

        Ok(Self {
            transport,
            applet_id,
            version,
            packet_version,
            app_versions: std::sync::Mutex::new(None),
        })
    }

    /// Discover the device's SDK version and packet generation.
    ///
    /// The exchange is a legacy v1 command `0x58` with data `00`; the reply
    /// carries `major ‖ minor ‖ patch` as three 16-bit hex fields.
    async fn get_sdk_version(
        transport: &dyn Transport,
        options: &CreateOptions,
    ) -> Result<(String, Option<PacketVersion>)> {
        if transport.get_device_state().await? == DeviceState::Bootloader {
            return Ok(("0.0.0".to_string(), None));
        }

        transport.before_operation().await?;

        let mut first_error: Option<DeviceError> = None;
        let mut outcome = None;

        for _ in 0..options.max_tries.max(1) {
            let attempt = async {
                legacy_xfer::send_data(
                    transport,
                    SDK_VERSION_COMMAND,
                    &[0x00],
                    PacketVersion::V1,
                    options.max_tries,
                    None,
                )
                .await?;

                let reply = legacy_xfer::receive_data(
                    transport,
                    &[SDK_VERSION_COMMAND],
                    PacketVersion::V1,
                    Some(options.timeout),
                )
                .await?;

                let version =
                    gate::format_sdk_version(&vaultlink_proto::hexutil::bytes_to_hex(&reply.data))?;
                let packet_version = gate::packet_version_for(&version);
                Ok((version, packet_version))
            };

            match attempt.await {
                Ok(result) => {
                    outcome = Some(result);
                    break;
                },
                Err(error) => {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                },
            }
        }

        transport.after_operation().await?;

        outcome.ok_or_else(|| first_error.unwrap_or(DeviceError::UnknownCommunication))
    }

    /// The transport this session owns.
    #[must_use]
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Device SDK version negotiated at creation.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Packet generation for this connection; `None` in bootloader
    /// sessions and for unsupported firmware.
    #[must_use]
    pub fn packet_version(&self) -> Option<PacketVersion> {
        self.packet_version
    }

    /// Applet this session addresses.
    #[must_use]
    pub fn applet_id(&self) -> u32 {
        self.applet_id
    }

    /// Re-target the session at a different applet.
    pub fn configure_applet_id(&mut self, applet_id: u32) {
        self.applet_id = applet_id;
    }

    /// Adapter for the deprecated command dialects.
    #[must_use]
    pub fn deprecated(&self) -> DeprecatedCommands<'_> {
        DeprecatedCommands::new(self)
    }

    /// True when the structured v3 dialect is available.
    pub async fn is_supported(&self) -> Result<bool> {
        if self.get_device_state().await? == DeviceState::Bootloader {
            return Ok(false);
        }
        Ok(Feature::ProtoCommand.is_enabled(&self.version))
    }

    /// Current device state from enumeration data.
    pub async fn get_device_state(&self) -> Result<DeviceState> {
        self.transport.get_device_state().await
    }

    /// True when the device is running the ROM bootloader.
    pub async fn is_in_bootloader(&self) -> Result<bool> {
        Ok(self.get_device_state().await?.is_bootloader())
    }

    /// Latest issued sequence number.
    pub async fn get_sequence_number(&self) -> u16 {
        self.transport.get_sequence_number().await
    }

    /// Acquire a fresh sequence number.
    pub async fn get_new_sequence_number(&self) -> u16 {
        self.transport.get_new_sequence_number().await
    }

    /// Tear down the session and the underlying connection.
    pub async fn destroy(&self) -> Result<()> {
        self.transport.destroy().await
    }

    pub(crate) async fn validate_not_in_bootloader(&self) -> Result<()> {
        if self.is_in_bootloader().await? {
            return Err(DeviceError::InBootloader);
        }
        Ok(())
    }

    pub(crate) fn require_packet_version(&self) -> Result<PacketVersion> {
        self.packet_version.ok_or(DeviceError::DeviceNotSupported)
    }

    async fn require_proto_dialect(&self) -> Result<PacketVersion> {
        self.validate_not_in_bootloader().await?;
        let version = self.require_packet_version()?;
        if !self.is_supported().await? {
            return Err(DeviceError::InvalidSdkOperation);
        }
        Ok(version)
    }

    // ---- structured v3 operations ----

    /// Send an application query. The payload is opaque applet bytes.
    pub async fn send_query(&self, data: &[u8], options: &QueryOptions) -> Result<()> {
        let version = self.require_proto_dialect().await?;

        let sequence_number = match options.sequence_number {
            Some(sequence_number) => sequence_number,
            None => self.get_new_sequence_number().await,
        };

        fragment::send_command(
            self.transport.as_ref(),
            version,
            sequence_number,
            &[],
            data,
            options.max_tries.unwrap_or(fragment::DEFAULT_MAX_TRIES),
            options.timeout,
        )
        .await
    }

    /// Fetch the current result for the latest (or given) sequence once.
    pub async fn get_result(&self, options: &QueryOptions) -> Result<ResultOutput> {
        let version = self.require_proto_dialect().await?;

        let sequence_number = match options.sequence_number {
            Some(sequence_number) => sequence_number,
            None => self.get_sequence_number().await,
        };

        result::get_result(
            self.transport.as_ref(),
            version,
            self.applet_id,
            sequence_number,
            options.max_tries.unwrap_or(fragment::DEFAULT_MAX_TRIES),
            options.timeout,
        )
        .await
    }

    /// Long-poll until the query's result arrives.
    pub async fn wait_for_result(&self, args: WaitForResultArgs<'_>) -> Result<Bytes> {
        let version = self.require_proto_dialect().await?;

        let sequence_number = match args.sequence_number {
            Some(sequence_number) => sequence_number,
            None => self.get_sequence_number().await,
        };

        result::wait_for_result(
            self.transport.as_ref(),
            version,
            self.applet_id,
            sequence_number,
            args.on_status,
            &args.options,
        )
        .await
    }

    /// Ping the device for a status report.
    pub async fn get_status(&self) -> Result<Status> {
        let version = self.require_proto_dialect().await?;
        result::get_status(self.transport.as_ref(), version, fragment::DEFAULT_MAX_TRIES, None)
            .await
    }

    /// Abort whatever command the device is servicing.
    pub async fn send_abort(&self, options: &QueryOptions) -> Result<Status> {
        let version = self.require_proto_dialect().await?;

        let sequence_number = match options.sequence_number {
            Some(sequence_number) => sequence_number,
            None => self.get_new_sequence_number().await,
        };

        fragment::send_abort(
            self.transport.as_ref(),
            version,
            sequence_number,
            options.max_tries.unwrap_or(fragment::DEFAULT_MAX_TRIES),
            options.timeout,
        )
        .await
    }

    // ---- app-version table ----

    /// The device's app-version table, fetched once and cached for the
    /// session.
    pub async fn get_app_versions(&self) -> Result<Vec<AppVersionEntry>> {
        if let Some(cached) = self.cached_app_versions() {
            return Ok(cached);
        }

        self.require_proto_dialect().await?;

        let sequence_number = self.get_new_sequence_number().await;
        let fetched =
            commands::get_app_versions(self.transport.as_ref(), sequence_number).await?;

        *lock_poisoned_ok(&self.app_versions) = Some(fetched.clone());
        Ok(fetched)
    }

    fn cached_app_versions(&self) -> Option<Vec<AppVersionEntry>> {
        lock_poisoned_ok(&self.app_versions).clone()
    }

    /// Version string of `applet_id`, if the device carries it.
    pub async fn get_app_version(&self, applet_id: u32) -> Result<Option<String>> {
        let versions = self.get_app_versions().await?;
        Ok(versions
            .iter()
            .find(|entry| entry.applet_id == applet_id)
            .map(AppVersionEntry::version_string))
    }

    /// Assert the session applet's version lies inside `range`.
    ///
    /// A device that does not carry the applet passes the check; the
    /// operation itself will fail with a precise error later.
    pub async fn check_app_compatibility(&self, range: &VersionRange) -> Result<()> {
        let Some(app_version) = self.get_app_version(self.applet_id).await? else {
            return Ok(());
        };

        let from_ok = gate::compare_versions(range.from, &app_version)
            .is_some_and(|ordering| ordering != std::cmp::Ordering::Greater);
        let to_ok = match range.to {
            Some(to) => gate::compare_versions(to, &app_version)
                .is_some_and(|ordering| ordering == std::cmp::Ordering::Greater),
            None => true,
        };

        if !from_ok || !to_ok {
            return Err(DeviceError::InvalidSdkOperation);
        }
        Ok(())
    }

    /// Assert every named feature's minimum app version is satisfied.
    pub async fn check_feature_support_compatibility(
        &self,
        features: &[(&str, &str)],
    ) -> Result<()> {
        let Some(app_version) = self.get_app_version(self.applet_id).await? else {
            return Ok(());
        };

        for (name, from_version) in features {
            let compatible = gate::compare_versions(from_version, &app_version)
                .is_some_and(|ordering| ordering != std::cmp::Ordering::Greater);
            if !compatible {
                warn!(
                    feature = name,
                    required = from_version,
                    current = %app_version,
                    "feature not supported by the installed app version"
                );
                return Err(DeviceError::InvalidSdkOperation);
            }
        }
        Ok(())
    }

    // ---- bootloader operations ----

    /// Upload a firmware image; only valid in bootloader state.
    pub async fn send_bootloader_data(
        &self,
        data: &str,
        on_progress: Option<bootloader_xfer::ProgressListener<'_>>,
        options: &BootloaderOptions,
    ) -> Result<()> {
        if !self.is_in_bootloader().await? {
            return Err(DeviceError::NotInBootloader);
        }
        bootloader_xfer::send_bootloader_data(
            self.transport.as_ref(),
            data,
            on_progress,
            options,
        )
        .await
    }

    /// Abort the bootloader and reboot; only valid in bootloader state.
    pub async fn send_bootloader_abort(&self) -> Result<()> {
        if !self.is_in_bootloader().await? {
            return Err(DeviceError::NotInBootloader);
        }
        bootloader_xfer::send_bootloader_abort(
            self.transport.as_ref(),
            bootloader_xfer::PACKET_TIMEOUT,
            bootloader_xfer::MAX_TRIES,
        )
        .await
    }

    // ---- operation wrapper ----

    /// Clear stale command state before starting a fresh operation.
    ///
    /// Queries the device status; a device idling in USB or on-device
    /// input is stuck in an abandoned flow. If aborts are allowed the
    /// stale command is aborted, otherwise the device is genuinely busy
    /// and the caller must back off.
    pub async fn ensure_if_usb_idle(&self) -> Result<()> {
        if self.is_supported().await? {
            let status = self.get_status().await?;
            if matches!(
                status.device_idle_state,
                DeviceIdleState::Usb | DeviceIdleState::Device
            ) {
                if status.abort_disabled {
                    return Err(DeviceError::ExecutingOtherCommand);
                }
                self.send_abort(&QueryOptions::default()).await?;
            }
            return Ok(());
        }

        let deprecated = self.deprecated();
        if deprecated.is_raw_operation_supported().await? {
            let version = self.require_packet_version()?;
            let status = raw::get_status(
                self.transport.as_ref(),
                version,
                fragment::DEFAULT_MAX_TRIES,
                None,
            )
            .await?;
            if matches!(
                status.device_idle_state,
                DeviceIdleState::Usb | DeviceIdleState::Device
            ) {
                if status.abort_disabled {
                    return Err(DeviceError::ExecutingOtherCommand);
                }
                let sequence_number = self.get_sequence_number().await;
                raw::send_abort(
                    self.transport.as_ref(),
                    version,
                    sequence_number,
                    fragment::ABORT_MAX_TRIES,
                    None,
                )
                .await?;
            }
        }

        Ok(())
    }

    /// Run `operation` bracketed by the transport's operation hooks.
    ///
    /// `after_operation` runs on success and on error (while still
    /// connected), so the background reader never leaks past an operation.
    pub async fn run_operation<T, F>(&self, operation: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        self.transport.before_operation().await?;

        let outcome = async {
            self.ensure_if_usb_idle().await?;
            operation.await
        }
        .await;

        if self.transport.is_connected().await {
            self.transport.after_operation().await?;
        }

        outcome
    }
}

fn lock_poisoned_ok<T>(
    mutex: &std::sync::Mutex<T>,
) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
