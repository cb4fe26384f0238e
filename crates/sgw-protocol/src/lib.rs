//! SGW Protocol - Wire protocol for sensor device connections
//!
//! Devices speak a fixed-text, newline-free protocol over TCP, one
//! connection per device:
//!
//! - Handshake, once per connection: `ID:<integer>`
//! - Reading report, repeated: `SENSOR:<integer>,TEMP:<float>,HUM:<float>`
//!
//! No server-to-device messages exist; protocol errors are logged on
//! the gateway side and never reported back to the device.

pub mod frame;
pub mod parse;

// Re-exports for convenience
pub use frame::{Frame, ProtocolError};
pub use parse::{parse_frame, parse_hello, parse_report};
