//! Application-facing helpers.
//!
//! Applet modules (key export, transaction signing, …) share two pieces of
//! plumbing: the query/result multiplexing of [`helper::OperationHelper`],
//! which routes opaque request/response bodies by their oneof key and
//! parses the shared error report, and the [`status::FlowStatusListener`],
//! which turns the device's packed flow-status word into ordered,
//! fire-once progress events.

pub mod helper;
pub mod status;

pub use helper::{CHUNK_SIZE, OperationHelper};
pub use status::{FlowStatusListener, SeedOverlay, pack_flow_status};
