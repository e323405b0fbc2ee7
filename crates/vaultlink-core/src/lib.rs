//! Command engine for the Vaultlink device protocol.
//!
//! This crate sits between the pure codecs (`vaultlink-proto`) and the
//! session layer (`vaultlink-client`). It owns:
//!
//! - the [`error::DeviceError`] taxonomy every layer reports through,
//!   including the central retryability predicate;
//! - the [`transport::Transport`] capability concrete transports implement;
//! - the v3 write/ack loop ([`ack`]), fragmenter/assembler ([`fragment`])
//!   and structured/raw result retrieval ([`result`], [`raw`]);
//! - the legacy v1/v2 transfer path ([`legacy_xfer`]);
//! - the bootloader firmware sender ([`bootloader_xfer`]);
//! - SDK-version parsing and feature gates ([`gate`]);
//! - the structured envelope codec ([`wire`]).
//!
//! Everything here is transport-agnostic and runs on any tokio runtime.
//! Operations borrow the transport; they never spawn detached tasks, so
//! dropping an operation future cancels all of its outstanding waits.

pub mod ack;
pub mod bootloader_xfer;
pub mod error;
pub mod fragment;
pub mod gate;
pub mod legacy_xfer;
pub mod raw;
pub mod result;
pub mod transport;
pub mod wire;

pub use error::{CardError, DeviceError, Result};
pub use transport::{DeviceState, PoolEntry, Transport};
