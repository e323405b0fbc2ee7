//! Minimal tag/length/varint message codec for structured payloads.
//!
//! The device's structured replies are protobuf-compatible on the wire:
//! varint-keyed fields, length-delimited sub-messages. The SDK only ever
//! needs a handful of envelope shapes (the command/error oneof, the
//! app-version table, the chunked-upload wrapper), so rather than pull in a
//! code generator for opaque application payloads we read and write those
//! shapes with a small hand-rolled codec. Application message bodies stay
//! opaque bytes end to end.
//!
//! Wire format per field: `tag = (field_number << 3) | wire_type`, with
//! wire type 0 (varint) and 2 (length-delimited) used by every message
//! here. Unknown fields and the two fixed-width wire types are skipped, so
//! newer firmware can add fields without breaking older hosts.

use bytes::Bytes;

use crate::error::{DeviceError, Result};

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_BYTES: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// Append a varint.
pub fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn put_tag(buf: &mut Vec<u8>, field: u32, wire_type: u8) {
    put_varint(buf, (u64::from(field) << 3) | u64::from(wire_type));
}

/// Append a varint-typed field.
pub fn put_varint_field(buf: &mut Vec<u8>, field: u32, value: u64) {
    put_tag(buf, field, WIRE_VARINT);
    put_varint(buf, value);
}

/// Append a length-delimited field.
pub fn put_bytes_field(buf: &mut Vec<u8>, field: u32, data: &[u8]) {
    put_tag(buf, field, WIRE_BYTES);
    put_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// One decoded field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue<'a> {
    /// Wire type 0.
    Varint(u64),
    /// Wire type 2.
    Bytes(&'a [u8]),
}

/// Iterator over the fields of a message body.
///
/// Yields `(field_number, value)` pairs; fixed-width fields are skipped.
/// Any structural damage (truncated varint, length past the end) turns
/// into [`DeviceError::InvalidMsgFromDevice`].
pub struct FieldReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    /// Read fields from `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn read_varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte =
                *self.data.get(self.offset).ok_or(DeviceError::InvalidMsgFromDevice)?;
            self.offset += 1;

            if shift >= 64 {
                return Err(DeviceError::InvalidMsgFromDevice);
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn next_field(&mut self) -> Result<Option<(u32, FieldValue<'a>)>> {
        loop {
            if self.offset >= self.data.len() {
                return Ok(None);
            }

            let tag = self.read_varint()?;
            let field = (tag >> 3) as u32;
            let wire_type = (tag & 0x07) as u8;

            match wire_type {
                WIRE_VARINT => {
                    let value = self.read_varint()?;
                    return Ok(Some((field, FieldValue::Varint(value))));
                },
                WIRE_BYTES => {
                    let len = self.read_varint()? as usize;
                    let end = self
                        .offset
                        .checked_add(len)
                        .filter(|&end| end <= self.data.len())
                        .ok_or(DeviceError::InvalidMsgFromDevice)?;
                    let bytes = &self.data[self.offset..end];
                    self.offset = end;
                    return Ok(Some((field, FieldValue::Bytes(bytes))));
                },
                WIRE_FIXED64 => {
                    self.skip(8)?;
                },
                WIRE_FIXED32 => {
                    self.skip(4)?;
                },
                _ => return Err(DeviceError::InvalidMsgFromDevice),
            }
        }
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(DeviceError::InvalidMsgFromDevice)?;
        self.offset = end;
        Ok(())
    }
}

impl<'a> Iterator for FieldReader<'a> {
    type Item = Result<(u32, FieldValue<'a>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_field().transpose()
    }
}

/// Error codes the device core can report inside a result envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoreErrorType {
    /// No classified error.
    Unknown = 0,
    /// The addressed applet does not exist.
    UnknownApp = 1,
    /// The host's message was rejected as invalid.
    InvalidMsg = 2,
    /// The addressed applet is not active.
    AppNotActive = 3,
    /// The applet-side operation timed out.
    AppTimeout = 4,
    /// The device session is no longer valid.
    DeviceSessionInvalid = 5,
}

impl CoreErrorType {
    fn from_u64(value: u64) -> Self {
        match value {
            1 => Self::UnknownApp,
            2 => Self::InvalidMsg,
            3 => Self::AppNotActive,
            4 => Self::AppTimeout,
            5 => Self::DeviceSessionInvalid,
            _ => Self::Unknown,
        }
    }

    /// The [`DeviceError`] this core error maps to.
    #[must_use]
    pub fn to_error(self) -> DeviceError {
        match self {
            Self::Unknown => DeviceError::Unknown,
            Self::UnknownApp => DeviceError::UnknownApp,
            Self::InvalidMsg => DeviceError::InvalidMsg,
            Self::AppNotActive => DeviceError::AppNotActive,
            Self::AppTimeout => DeviceError::AppTimeout,
            Self::DeviceSessionInvalid => DeviceError::DeviceSessionInvalid,
        }
    }
}

/// Top-level result envelope: exactly one of these is present in a
/// structured reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Core-level error (field 1).
    Error(CoreErrorType),
    /// Applet command reply (field 2); carries the applet id that produced
    /// the reply.
    Cmd {
        /// Applet that produced the reply.
        applet_id: u32,
    },
    /// App-version command (field 3).
    AppVersion(AppVersionCmd),
}

const ENVELOPE_ERROR: u32 = 1;
const ENVELOPE_CMD: u32 = 2;
const ENVELOPE_APP_VERSION: u32 = 3;

impl Envelope {
    /// Decode the envelope, if the payload carries one.
    ///
    /// Returns `Ok(None)` when no known oneof field is present; the caller
    /// then treats the payload as opaque applet data.
    pub fn decode(data: &[u8]) -> Result<Option<Self>> {
        for field in FieldReader::new(data) {
            let (number, value) = field?;
            match (number, value) {
                (ENVELOPE_ERROR, FieldValue::Bytes(body)) => {
                    let mut error_type = CoreErrorType::Unknown;
                    for inner in FieldReader::new(body) {
                        if let (1, FieldValue::Varint(v)) = inner? {
                            error_type = CoreErrorType::from_u64(v);
                        }
                    }
                    return Ok(Some(Self::Error(error_type)));
                },
                (ENVELOPE_CMD, FieldValue::Bytes(body)) => {
                    let mut applet_id = 0u32;
                    for inner in FieldReader::new(body) {
                        if let (1, FieldValue::Varint(v)) = inner? {
                            applet_id = v as u32;
                        }
                    }
                    return Ok(Some(Self::Cmd { applet_id }));
                },
                (ENVELOPE_APP_VERSION, FieldValue::Bytes(body)) => {
                    return Ok(Some(Self::AppVersion(AppVersionCmd::decode(body)?)));
                },
                _ => {},
            }
        }
        Ok(None)
    }

    /// Encode the envelope.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::Error(error_type) => {
                let mut body = Vec::new();
                put_varint_field(&mut body, 1, *error_type as u64);
                put_bytes_field(&mut buf, ENVELOPE_ERROR, &body);
            },
            Self::Cmd { applet_id } => {
                let mut body = Vec::new();
                put_varint_field(&mut body, 1, u64::from(*applet_id));
                put_bytes_field(&mut buf, ENVELOPE_CMD, &body);
            },
            Self::AppVersion(cmd) => {
                put_bytes_field(&mut buf, ENVELOPE_APP_VERSION, &cmd.encode());
            },
        }
        buf
    }
}

/// App-version command: request from the host, response from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppVersionCmd {
    /// Host-initiated request (field 1, empty body).
    Request,
    /// Device response (field 2).
    Response(AppVersionResponse),
}

impl AppVersionCmd {
    fn decode(data: &[u8]) -> Result<Self> {
        for field in FieldReader::new(data) {
            let (number, value) = field?;
            match (number, value) {
                (1, FieldValue::Bytes(_)) => return Ok(Self::Request),
                (2, FieldValue::Bytes(body)) => {
                    return Ok(Self::Response(AppVersionResponse::decode(body)?));
                },
                _ => {},
            }
        }
        Err(DeviceError::InvalidMsgFromDevice)
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::Request => put_bytes_field(&mut buf, 1, &[]),
            Self::Response(response) => put_bytes_field(&mut buf, 2, &response.encode()),
        }
        buf
    }
}

/// Response half of the app-version command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppVersionResponse {
    /// Version table, when the command succeeded (field 1).
    pub app_versions: Vec<AppVersionEntry>,
    /// Common error, when it failed (field 2).
    pub common_error: Option<CommonError>,
}

impl AppVersionResponse {
    fn decode(data: &[u8]) -> Result<Self> {
        let mut response = Self::default();
        let mut saw_result = false;

        for field in FieldReader::new(data) {
            let (number, value) = field?;
            match (number, value) {
                (1, FieldValue::Bytes(body)) => {
                    saw_result = true;
                    for inner in FieldReader::new(body) {
                        if let (1, FieldValue::Bytes(entry)) = inner? {
                            response.app_versions.push(AppVersionEntry::decode(entry)?);
                        }
                    }
                },
                (2, FieldValue::Bytes(body)) => {
                    response.common_error = Some(CommonError::decode(body)?);
                },
                _ => {},
            }
        }

        if !saw_result && response.common_error.is_none() {
            return Err(DeviceError::InvalidMsgFromDevice);
        }
        Ok(response)
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut result = Vec::new();
        for entry in &self.app_versions {
            put_bytes_field(&mut result, 1, &entry.encode());
        }
        put_bytes_field(&mut buf, 1, &result);
        if let Some(common_error) = &self.common_error {
            put_bytes_field(&mut buf, 2, &common_error.encode());
        }
        buf
    }
}

/// One row of the device's app-version table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppVersionEntry {
    /// Applet the row describes.
    pub applet_id: u32,
    /// Semantic version triple.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component.
    pub patch: u32,
}

impl AppVersionEntry {
    /// Version formatted as `major.minor.patch`.
    #[must_use]
    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    fn decode(data: &[u8]) -> Result<Self> {
        let mut entry = Self { applet_id: 0, major: 0, minor: 0, patch: 0 };
        for field in FieldReader::new(data) {
            let (number, value) = field?;
            match (number, value) {
                (1, FieldValue::Varint(v)) => entry.applet_id = v as u32,
                (2, FieldValue::Bytes(body)) => {
                    for inner in FieldReader::new(body) {
                        match inner? {
                            (1, FieldValue::Varint(v)) => entry.major = v as u32,
                            (2, FieldValue::Varint(v)) => entry.minor = v as u32,
                            (3, FieldValue::Varint(v)) => entry.patch = v as u32,
                            _ => {},
                        }
                    }
                },
                _ => {},
            }
        }
        Ok(entry)
    }

    fn encode(&self) -> Vec<u8> {
        let mut version = Vec::new();
        put_varint_field(&mut version, 1, u64::from(self.major));
        put_varint_field(&mut version, 2, u64::from(self.minor));
        put_varint_field(&mut version, 3, u64::from(self.patch));

        let mut buf = Vec::new();
        put_varint_field(&mut buf, 1, u64::from(self.applet_id));
        put_bytes_field(&mut buf, 2, &version);
        buf
    }
}

/// Error report shared by every applet's response messages.
///
/// Exactly one field is set; the field number identifies the failure class
/// and the varint value carries the sub-reason where one exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonError {
    /// Field number that was set.
    pub field: u32,
    /// Raw varint value of that field.
    pub value: u64,
}

const COMMON_UNKNOWN: u32 = 1;
const COMMON_DEVICE_SETUP_REQUIRED: u32 = 2;
const COMMON_WALLET_NOT_FOUND: u32 = 3;
const COMMON_WALLET_PARTIAL_STATE: u32 = 4;
const COMMON_CARD_ERROR: u32 = 5;
const COMMON_USER_REJECTION: u32 = 6;
const COMMON_CORRUPT_DATA: u32 = 7;

impl CommonError {
    /// Decode from a message body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        for field in FieldReader::new(data) {
            if let (number, FieldValue::Varint(value)) = field? {
                return Ok(Self { field: number, value });
            }
        }
        Err(DeviceError::InvalidMsgFromDevice)
    }

    /// Encode into a message body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_varint_field(&mut buf, self.field, self.value);
        buf
    }

    /// The [`DeviceError`] this report maps to.
    #[must_use]
    pub fn to_error(&self) -> DeviceError {
        match self.field {
            COMMON_UNKNOWN => DeviceError::Unknown,
            COMMON_DEVICE_SETUP_REQUIRED => DeviceError::DeviceSetupRequired,
            COMMON_WALLET_NOT_FOUND => DeviceError::WalletNotFound,
            COMMON_WALLET_PARTIAL_STATE => DeviceError::WalletPartialState,
            COMMON_CARD_ERROR => {
                DeviceError::CardOperationFailed(crate::error::CardError::from_u8(
                    self.value as u8,
                ))
            },
            COMMON_USER_REJECTION => DeviceError::UserRejection,
            COMMON_CORRUPT_DATA => DeviceError::CorruptData,
            _ => DeviceError::Unknown,
        }
    }
}

/// Chunked-upload wrapper for oversized auxiliary data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPayload {
    /// Chunk bytes (field 1).
    pub chunk: Bytes,
    /// Zero-based chunk index (field 2).
    pub chunk_index: u32,
    /// Total number of chunks (field 3).
    pub total_chunks: u32,
    /// Bytes remaining after this chunk (field 4).
    pub remaining_size: u32,
}

impl ChunkPayload {
    /// Encode into a message body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_bytes_field(&mut buf, 1, &self.chunk);
        put_varint_field(&mut buf, 2, u64::from(self.chunk_index));
        put_varint_field(&mut buf, 3, u64::from(self.total_chunks));
        put_varint_field(&mut buf, 4, u64::from(self.remaining_size));
        buf
    }

    /// Decode from a message body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut chunk = Bytes::new();
        let mut chunk_index = 0u32;
        let mut total_chunks = 0u32;
        let mut remaining_size = 0u32;

        for field in FieldReader::new(data) {
            match field? {
                (1, FieldValue::Bytes(body)) => chunk = Bytes::copy_from_slice(body),
                (2, FieldValue::Varint(v)) => chunk_index = v as u32,
                (3, FieldValue::Varint(v)) => total_chunks = v as u32,
                (4, FieldValue::Varint(v)) => remaining_size = v as u32,
                _ => {},
            }
        }

        Ok(Self { chunk, chunk_index, total_chunks, remaining_size })
    }
}

/// Device acknowledgement of one uploaded chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkAck {
    /// Index the device acknowledges (field 1).
    pub chunk_index: u32,
}

impl ChunkAck {
    /// Encode into a message body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_varint_field(&mut buf, 1, u64::from(self.chunk_index));
        buf
    }

    /// Decode from a message body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        for field in FieldReader::new(data) {
            if let (1, FieldValue::Varint(v)) = field? {
                return Ok(Self { chunk_index: v as u32 });
            }
        }
        Err(DeviceError::InvalidMsgFromDevice)
    }
}
