//! Frame types for the device wire protocol.

use sgw_core::SensorId;
use thiserror::Error;

/// A single message received from a sensor device.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Handshake frame establishing the session identity: `ID:<integer>`.
    Hello { sensor_id: SensorId },

    /// Reading report: `SENSOR:<id>,TEMP:<float>,HUM:<float>`.
    Report {
        sensor_id: SensorId,
        temperature: f64,
        humidity: f64,
    },
}

/// Errors that can occur while decoding a device message.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// The payload matches neither frame shape.
    #[error("malformed frame: {0:?}")]
    MalformedFrame(String),

    /// A frame of a different kind was expected at this point of the
    /// conversation (e.g. a report where the handshake belongs).
    #[error("expected {expected} frame, got {got:?}")]
    UnexpectedFrame {
        expected: &'static str,
        got: String,
    },

    /// The sensor id field is not a valid integer identity.
    #[error("invalid sensor id {value:?}")]
    InvalidSensorId { value: String },

    /// A numeric field failed to parse or is not finite.
    #[error("invalid {field} value {value:?}")]
    InvalidValue {
        field: &'static str,
        value: String,
    },
}
