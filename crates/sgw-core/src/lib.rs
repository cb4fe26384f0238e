//! SGW Core - Shared domain types for the sensor-ingestion gateway
//!
//! This crate provides the types shared between the wire protocol
//! crate (sgw-protocol) and the gateway daemon (sgwd).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()` in production paths.

pub mod id;
pub mod reading;

// Re-exports for convenience
pub use id::SensorId;
pub use reading::{Reading, VALUE_TOLERANCE};
