//! Core domain types for Errand.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the framework: the task queue, the
//! operation engine, the HTTP transport and the client surface all agree on these.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod envelope;
mod error;
mod ids;

pub use envelope::{ErrorEnvelope, PARSE_FAILURE_NAME, ServiceErrorCode};
pub use error::{OpError, StatusCode};
pub use ids::CorrelationToken;

/// SDK identifier sent with every request in the `X-SDK-Version` header.
pub const SDK_VERSION: &str = concat!("errand-rust-", env!("CARGO_PKG_VERSION"));
