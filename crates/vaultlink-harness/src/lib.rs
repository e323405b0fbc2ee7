//! Deterministic test harness for the Vaultlink SDK.
//!
//! Provides [`MockTransport`], an in-memory implementation of the
//! [`vaultlink_core::Transport`] capability with a scripted responder, and
//! the [`frames`] module of device-side frame builders so tests can script
//! realistic device behavior without real hardware.
//!
//! Nothing here touches the system clock beyond tokio timers; every test
//! built on the harness is reproducible.

pub mod frames;
pub mod transport;

pub use transport::MockTransport;
