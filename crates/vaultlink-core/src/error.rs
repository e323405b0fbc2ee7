//! Error taxonomy for the whole SDK.
//!
//! Every failure the SDK can surface is a variant of [`DeviceError`], one
//! sum type shared by all layers. Each variant carries a stable error code
//! (`COM_0104`, `APP_0501`, …) via [`DeviceError::code`]; codes are part of
//! the downstream UX contract and never change meaning.
//!
//! Retry policy is centralized here too: [`DeviceError::is_retryable`] is
//! the only classifier, consulted by every retry site. New variants default
//! to retryable unless explicitly listed, so permanent failures must opt in.

use thiserror::Error;
use vaultlink_proto::{ProtocolError, RejectReason};

/// Result alias used across the SDK.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Card-applet sub-error carried by [`DeviceError::CardOperationFailed`].
///
/// Values mirror the status words the card applet reports; the numeric
/// discriminants are the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CardError {
    /// Reserved unrecognized value.
    Unrecognized = 0,
    /// Unknown card error.
    Unknown = 1,
    /// Card is not paired.
    NotPaired = 2,
    /// Incompatible applet version.
    IncompatibleApplet = 3,
    /// Null pointer exception on the card.
    NullPointerException = 4,
    /// Operation failed on card (transaction exception).
    TransactionException = 5,
    /// Tapped card family id mismatch.
    FileInvalid = 6,
    /// Security conditions not satisfied (pairing session invalid).
    SecurityConditionsNotSatisfied = 7,
    /// Wrong card sequence.
    ConditionsNotSatisfied = 8,
    /// Invalid APDU length.
    WrongData = 9,
    /// Corrupted card.
    FileNotFound = 10,
    /// Wallet does not exist on this card.
    RecordNotFound = 11,
    /// Card is full.
    FileFull = 12,
    /// Incorrect pin entered.
    CorrectLength = 13,
    /// Applet unknown error.
    InvalidIns = 14,
    /// Card pairing to device missing.
    SwNotPaired = 15,
    /// Operation failed on card (crypto exception).
    CryptoException = 16,
    /// Locked wallet status word.
    WalletLocked = 17,
    /// Card health critical, migration required.
    InsBlocked = 18,
    /// Operation failed on card (out of boundary).
    OutOfBoundary = 19,
}

impl CardError {
    /// Parse a wire value; unknown values collapse to `Unrecognized`.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Unknown,
            2 => Self::NotPaired,
            3 => Self::IncompatibleApplet,
            4 => Self::NullPointerException,
            5 => Self::TransactionException,
            6 => Self::FileInvalid,
            7 => Self::SecurityConditionsNotSatisfied,
            8 => Self::ConditionsNotSatisfied,
            9 => Self::WrongData,
            10 => Self::FileNotFound,
            11 => Self::RecordNotFound,
            12 => Self::FileFull,
            13 => Self::CorrectLength,
            14 => Self::InvalidIns,
            15 => Self::SwNotPaired,
            16 => Self::CryptoException,
            17 => Self::WalletLocked,
            18 => Self::InsBlocked,
            19 => Self::OutOfBoundary,
            _ => Self::Unrecognized,
        }
    }

    /// Stable sub-error code (`APP_0400_###`).
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Unrecognized => "APP_0400_000",
            Self::Unknown => "APP_0400_001",
            Self::NotPaired => "APP_0400_002",
            Self::IncompatibleApplet => "APP_0400_003",
            Self::NullPointerException => "APP_0400_004",
            Self::TransactionException => "APP_0400_005",
            Self::FileInvalid => "APP_0400_006",
            Self::SecurityConditionsNotSatisfied => "APP_0400_007",
            Self::ConditionsNotSatisfied => "APP_0400_008",
            Self::WrongData => "APP_0400_009",
            Self::FileNotFound => "APP_0400_010",
            Self::RecordNotFound => "APP_0400_011",
            Self::FileFull => "APP_0400_012",
            Self::CorrectLength => "APP_0400_013",
            Self::InvalidIns => "APP_0400_014",
            Self::SwNotPaired => "APP_0400_015",
            Self::CryptoException => "APP_0400_016",
            Self::WalletLocked => "APP_0400_017",
            Self::InsBlocked => "APP_0400_018",
            Self::OutOfBoundary => "APP_0400_019",
        }
    }
}

impl std::fmt::Display for CardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::Unrecognized => "unrecognized card error",
            Self::Unknown => "unknown card error",
            Self::NotPaired => "card is not paired",
            Self::IncompatibleApplet => "incompatible applet version",
            Self::NullPointerException => "null pointer exception",
            Self::TransactionException => "operation failed on card (tx exception)",
            Self::FileInvalid => "tapped card family id mismatch",
            Self::SecurityConditionsNotSatisfied => {
                "security conditions not satisfied, pairing session invalid"
            },
            Self::ConditionsNotSatisfied => "wrong card sequence",
            Self::WrongData => "invalid APDU length",
            Self::FileNotFound => "corrupted card",
            Self::RecordNotFound => "wallet does not exist on this card",
            Self::FileFull => "card is full",
            Self::CorrectLength => "incorrect pin entered",
            Self::InvalidIns => "applet unknown error",
            Self::SwNotPaired => "card pairing to device missing",
            Self::CryptoException => "operation failed on card (crypto exception)",
            Self::WalletLocked => "wallet is locked on the card",
            Self::InsBlocked => "card health critical, migration required",
            Self::OutOfBoundary => "operation failed on card (out of boundary)",
        };
        f.write_str(msg)
    }
}

/// Every failure the SDK can report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    // Connection
    /// No device connected.
    #[error("no device connected")]
    NotConnected,

    /// The connection dropped while an operation was in flight.
    #[error("connection was closed while in process")]
    ConnectionClosed,

    /// Establishing the connection failed.
    #[error("failed to create device connection")]
    FailedToConnect,

    // Communication
    /// Operation requires application firmware but the device is in the
    /// bootloader.
    #[error("device is in bootloader mode")]
    InBootloader,

    /// Unclassified communication failure.
    #[error("unknown error at communication module")]
    UnknownCommunication,

    /// A packet could not be written to the device.
    #[error("unable to write packet to the device")]
    WriteError,

    /// No ACK arrived for a written packet in time.
    #[error("did not receive ACK of sent packet on time")]
    WriteTimeout,

    /// The expected reply did not arrive in time.
    #[error("did not receive the expected data from device on time")]
    ReadTimeout,

    /// The device actively rejected the written packet. The payload byte is
    /// the raw reason; [`RejectReason`] decodes the known values.
    #[error("the write packet operation was rejected by the device: {}", reject_message(.0))]
    WriteRejected(u8),

    /// A codec failed on data crossing the wire boundary.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // Compatibility
    /// The device firmware does not support this operation.
    #[error("the device sdk does not support this function")]
    InvalidSdkOperation,

    /// The connected device is not supported by this SDK at all.
    #[error("the connected device is not supported by this SDK")]
    DeviceNotSupported,

    // Bootloader
    /// Bootloader operation requested outside bootloader mode.
    #[error("the device is not in bootloader mode")]
    NotInBootloader,

    /// The bootloader never signalled receiving mode.
    #[error("the device is in fault state")]
    NotInReceivingMode,

    /// Firmware image exceeds the device's size limit.
    #[error("firmware size limit exceeded")]
    FirmwareSizeLimitExceeded,

    /// Image was built for different hardware.
    #[error("wrong hardware version")]
    WrongHardwareVersion,

    /// Image magic number did not match.
    #[error("wrong magic number")]
    WrongMagicNumber,

    /// Image signature verification failed.
    #[error("signature not verified")]
    SignatureNotVerified,

    /// Image version is lower than the installed firmware.
    #[error("lower firmware version")]
    LowerFirmwareVersion,

    /// Flash write failed on the device.
    #[error("flash write error")]
    FlashWriteError,

    /// Flash CRC verification failed on the device.
    #[error("flash CRC mismatch")]
    FlashCrcMismatch,

    /// Flash operation timed out on the device.
    #[error("flash timeout error")]
    FlashTimeoutError,

    /// Flash negative acknowledgement.
    #[error("flash negative acknowledgement")]
    FlashNack,

    // Application
    /// Unknown application error.
    #[error("unknown application error")]
    Unknown,

    /// The device is executing some other command.
    #[error("the device is executing some other command")]
    ExecutingOtherCommand,

    /// The process was aborted.
    #[error("the process was aborted")]
    ProcessAborted,

    /// The request timed out on the device.
    #[error("the request was timed out on the device")]
    DeviceAbort,

    /// Result received from the device could not be parsed.
    #[error("invalid result received from device")]
    InvalidMsgFromDevice,

    /// Result carried an applet id other than the session's.
    #[error("invalid applet id received from device")]
    InvalidAppIdFromDevice,

    /// The device reported the host's message as invalid.
    #[error("invalid message sent from app")]
    InvalidMsg,

    /// The requested applet does not exist on the device.
    #[error("the app does not exist on the device")]
    UnknownApp,

    /// The requested applet is not active on the device.
    #[error("the app is not active on the device")]
    AppNotActive,

    /// Device setup is required before this operation.
    #[error("device setup is required")]
    DeviceSetupRequired,

    /// The applet-side operation timed out.
    #[error("operation timed out on device")]
    AppTimeout,

    /// The device session is no longer valid.
    #[error("could not establish session on device")]
    DeviceSessionInvalid,

    /// Selected wallet is not present on the device.
    #[error("selected wallet is not present on the device")]
    WalletNotFound,

    /// Selected wallet is in partial state.
    #[error("selected wallet is in partial state")]
    WalletPartialState,

    /// A card operation failed; the sub-reason is preserved.
    #[error("card operation failed: {0}")]
    CardOperationFailed(CardError),

    /// The user rejected the operation on the device.
    #[error("user rejected the operation")]
    UserRejection,

    /// The device reported corrupt data.
    #[error("corrupt data error from device")]
    CorruptData,

    /// Device authenticity check failed.
    #[error("device seems to be compromised")]
    DeviceAuthFailed,

    /// Card authenticity check failed.
    #[error("card seems to be compromised")]
    CardAuthFailed,
}

fn reject_message(raw: &u8) -> String {
    match RejectReason::from_u8(*raw) {
        Some(reason) => reason.to_string(),
        None => format!("unknown reject reason {raw:#04x}"),
    }
}

impl DeviceError {
    /// Stable error code for downstream UX.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "CON_0100",
            Self::ConnectionClosed => "CON_0101",
            Self::FailedToConnect => "CON_0102",
            Self::InBootloader => "COM_0000",
            Self::UnknownCommunication | Self::Protocol(_) => "COM_0100",
            Self::WriteError => "COM_0101",
            Self::WriteTimeout => "COM_0102",
            Self::ReadTimeout => "COM_0103",
            Self::WriteRejected(_) => "COM_0104",
            Self::InvalidSdkOperation => "COM_0200",
            Self::DeviceNotSupported => "COM_0201",
            Self::NotInBootloader => "BTL_0000",
            Self::FirmwareSizeLimitExceeded => "BTL_0100",
            Self::WrongHardwareVersion => "BTL_0101",
            Self::WrongMagicNumber => "BTL_0102",
            Self::SignatureNotVerified => "BTL_0103",
            Self::LowerFirmwareVersion => "BTL_0104",
            Self::NotInReceivingMode => "BTL_0105",
            Self::FlashWriteError => "BTL_0106",
            Self::FlashCrcMismatch => "BTL_0107",
            Self::FlashTimeoutError => "BTL_0108",
            Self::FlashNack => "BTL_0109",
            Self::Unknown => "APP_0000",
            Self::ExecutingOtherCommand => "APP_0101",
            Self::ProcessAborted => "APP_0102",
            Self::DeviceAbort => "APP_0103",
            Self::InvalidMsgFromDevice => "APP_0200",
            Self::InvalidAppIdFromDevice => "APP_0201",
            Self::InvalidMsg => "APP_0202",
            Self::UnknownApp => "APP_0203",
            Self::AppNotActive => "APP_0204",
            Self::DeviceSetupRequired => "APP_0205",
            Self::AppTimeout => "APP_0206",
            Self::DeviceSessionInvalid => "APP_0207",
            Self::WalletNotFound => "APP_0300",
            Self::WalletPartialState => "APP_0301",
            Self::CardOperationFailed(sub) => sub.code(),
            Self::UserRejection => "APP_0501",
            Self::CorruptData => "APP_0600",
            Self::DeviceAuthFailed => "APP_0700",
            Self::CardAuthFailed => "APP_0701",
        }
    }

    /// True when a retry site may attempt the operation again.
    ///
    /// Permanent failures are listed explicitly; everything else (timeouts,
    /// transient write errors, codec noise) is retryable. The connection
    /// variants are permanent because the transport is gone; rejections and
    /// aborts are permanent because the device has already decided.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::NotConnected
                | Self::ConnectionClosed
                | Self::FailedToConnect
                | Self::WriteRejected(_)
                | Self::UserRejection
                | Self::ProcessAborted
                | Self::DeviceAbort
        )
    }

    /// True for the connection-loss family.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::NotConnected | Self::ConnectionClosed | Self::FailedToConnect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(DeviceError::WriteRejected(5).code(), "COM_0104");
        assert_eq!(DeviceError::UserRejection.code(), "APP_0501");
        assert_eq!(DeviceError::ReadTimeout.code(), "COM_0103");
        assert_eq!(DeviceError::NotInReceivingMode.code(), "BTL_0105");
        assert_eq!(
            DeviceError::CardOperationFailed(CardError::CorrectLength).code(),
            "APP_0400_013"
        );
    }

    #[test]
    fn permanent_failures_are_not_retryable() {
        assert!(!DeviceError::ConnectionClosed.is_retryable());
        assert!(!DeviceError::NotConnected.is_retryable());
        assert!(!DeviceError::FailedToConnect.is_retryable());
        assert!(!DeviceError::WriteRejected(1).is_retryable());
        assert!(!DeviceError::UserRejection.is_retryable());
        assert!(!DeviceError::ProcessAborted.is_retryable());
        assert!(!DeviceError::DeviceAbort.is_retryable());
    }

    #[test]
    fn transient_failures_are_retryable() {
        assert!(DeviceError::ReadTimeout.is_retryable());
        assert!(DeviceError::WriteTimeout.is_retryable());
        assert!(DeviceError::WriteError.is_retryable());
        assert!(DeviceError::UnknownCommunication.is_retryable());
        // The device may finish the other command before the retry.
        assert!(DeviceError::ExecutingOtherCommand.is_retryable());
    }

    #[test]
    fn reject_reason_is_spelled_out() {
        let err = DeviceError::WriteRejected(5);
        assert!(err.to_string().contains("invalid sequence number"));

        let unknown = DeviceError::WriteRejected(0xEE);
        assert!(unknown.to_string().contains("unknown reject reason"));
    }

    #[test]
    fn card_sub_errors_round_trip() {
        assert_eq!(CardError::from_u8(11), CardError::RecordNotFound);
        assert_eq!(CardError::from_u8(200), CardError::Unrecognized);
    }
}
