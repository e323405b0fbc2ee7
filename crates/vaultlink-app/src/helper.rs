//! Query/result multiplexing shared by applet modules.
//!
//! Applet wire messages are oneof envelopes: a query message with one
//! request variant set, a result message with either the matching response
//! variant or the shared error report. [`OperationHelper`] owns the
//! wrapping and unwrapping so applet code only deals in its own
//! request/response bodies, plus the chunked upload path for auxiliary
//! data too large for a single query (raw transactions, serialized proofs).

use bytes::Bytes;
use vaultlink_client::{Sdk, WaitForResultArgs};
use vaultlink_core::{
    error::{DeviceError, Result},
    result::{PollOptions, StatusListener},
    wire::{self, ChunkAck, ChunkPayload, CommonError, FieldValue},
};

/// Result-message field number reserved for the shared error report.
const COMMON_ERROR_FIELD: u32 = 1;

/// Raw bytes per auxiliary upload chunk.
pub const CHUNK_SIZE: usize = 2048;

/// Typed-key query/result router for one operation.
///
/// Holds a non-owning reference to the session; one helper instance lives
/// for the duration of one operation invocation.
pub struct OperationHelper<'a> {
    sdk: &'a Sdk,
    query_key: u32,
    result_key: u32,
}

impl<'a> OperationHelper<'a> {
    /// Helper routing queries under `query_key` and expecting results
    /// under `result_key`. Keys are oneof field numbers; field 1 of the
    /// result message is reserved for the shared error report.
    #[must_use]
    pub fn new(sdk: &'a Sdk, query_key: u32, result_key: u32) -> Self {
        debug_assert!(query_key > COMMON_ERROR_FIELD && result_key > COMMON_ERROR_FIELD);
        Self { sdk, query_key, result_key }
    }

    /// The session this helper drives.
    #[must_use]
    pub fn sdk(&self) -> &Sdk {
        self.sdk
    }

    /// Send `body` wrapped as this operation's query variant.
    pub async fn send_query(&self, body: &[u8]) -> Result<()> {
        let mut query = Vec::new();
        wire::put_bytes_field(&mut query, self.query_key, body);
        self.sdk.send_query(&query, &Default::default()).await
    }

    /// Wait for the result and unwrap this operation's response variant.
    ///
    /// A result carrying the shared error report is mapped to its typed
    /// error; a result carrying any other variant is a protocol violation.
    pub async fn wait_for_result(
        &self,
        on_status: Option<StatusListener<'_>>,
        options: PollOptions,
    ) -> Result<Bytes> {
        let reply = self
            .sdk
            .wait_for_result(WaitForResultArgs { sequence_number: None, on_status, options })
            .await?;
        Self::unwrap_result(self.result_key, &reply)
    }

    fn unwrap_result(result_key: u32, reply: &[u8]) -> Result<Bytes> {
        for field in wire::FieldReader::new(reply) {
            match field? {
                (COMMON_ERROR_FIELD, FieldValue::Bytes(body)) => {
                    return Err(CommonError::decode(body)?.to_error());
                },
                (number, FieldValue::Bytes(body)) if number == result_key => {
                    return Ok(Bytes::copy_from_slice(body));
                },
                _ => {},
            }
        }
        Err(DeviceError::InvalidMsgFromDevice)
    }

    /// Upload `data` in [`CHUNK_SIZE`] pieces, each wrapped in a
    /// [`ChunkPayload`] and individually acknowledged by the device.
    ///
    /// The device must acknowledge every chunk with its index; a mismatch
    /// means host and device disagree about the stream position.
    pub async fn send_in_chunks(&self, data: &[u8], options: &PollOptions) -> Result<()> {
        let total_chunks = data.len().div_ceil(CHUNK_SIZE).max(1) as u32;

        for (index, chunk) in data.chunks(CHUNK_SIZE).enumerate() {
            let chunk_index = index as u32;
            let consumed = index * CHUNK_SIZE + chunk.len();
            let payload = ChunkPayload {
                chunk: Bytes::copy_from_slice(chunk),
                chunk_index,
                total_chunks,
                remaining_size: (data.len() - consumed) as u32,
            };

            let mut body = Vec::new();
            wire::put_bytes_field(&mut body, 1, &payload.encode());
            self.send_query(&body).await?;

            let reply = self.wait_for_result(None, options.clone()).await?;
            let ack = Self::unwrap_chunk_ack(&reply)?;
            if ack.chunk_index != chunk_index {
                return Err(DeviceError::InvalidMsgFromDevice);
            }
        }

        Ok(())
    }

    fn unwrap_chunk_ack(body: &[u8]) -> Result<ChunkAck> {
        for field in wire::FieldReader::new(body) {
            if let (1, FieldValue::Bytes(inner)) = field? {
                return ChunkAck::decode(inner);
            }
        }
        Err(DeviceError::InvalidMsgFromDevice)
    }
}
