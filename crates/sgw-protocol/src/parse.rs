//! Parsing of raw device payloads into [`Frame`]s.
//!
//! Messages arrive without framing delimiters: devices write one
//! message per send out of a fixed-size buffer, so payloads may carry
//! trailing NUL padding or whitespace, which is stripped before
//! matching. Frames must match exactly after stripping; the original
//! firmware protocol tolerated trailing junk, this implementation does
//! not.

use sgw_core::SensorId;

use crate::frame::{Frame, ProtocolError};

/// Prefix of the handshake frame.
const HELLO_PREFIX: &str = "ID:";

/// Prefix of the reading report frame.
const REPORT_PREFIX: &str = "SENSOR:";

/// Strips the NUL padding and surrounding whitespace a fixed-buffer
/// sender leaves around the payload.
fn clean(input: &str) -> &str {
    input.trim_matches(|c: char| c == '\0' || c.is_whitespace())
}

/// Parses any device frame.
pub fn parse_frame(input: &str) -> Result<Frame, ProtocolError> {
    let payload = clean(input);

    if payload.starts_with(HELLO_PREFIX) {
        parse_hello(payload)
    } else if payload.starts_with(REPORT_PREFIX) {
        parse_report(payload)
    } else {
        Err(ProtocolError::MalformedFrame(payload.to_string()))
    }
}

/// Parses a handshake frame: `ID:<integer>`.
pub fn parse_hello(input: &str) -> Result<Frame, ProtocolError> {
    let payload = clean(input);

    let raw_id = payload
        .strip_prefix(HELLO_PREFIX)
        .ok_or_else(|| ProtocolError::MalformedFrame(payload.to_string()))?;

    Ok(Frame::Hello {
        sensor_id: parse_sensor_id(raw_id)?,
    })
}

/// Parses a reading report frame: `SENSOR:<id>,TEMP:<float>,HUM:<float>`.
pub fn parse_report(input: &str) -> Result<Frame, ProtocolError> {
    let payload = clean(input);

    let rest = payload
        .strip_prefix(REPORT_PREFIX)
        .ok_or_else(|| ProtocolError::MalformedFrame(payload.to_string()))?;

    let mut fields = rest.split(',');
    let raw_id = fields
        .next()
        .ok_or_else(|| ProtocolError::MalformedFrame(payload.to_string()))?;
    let raw_temp = fields
        .next()
        .and_then(|f| f.strip_prefix("TEMP:"))
        .ok_or_else(|| ProtocolError::MalformedFrame(payload.to_string()))?;
    let raw_hum = fields
        .next()
        .and_then(|f| f.strip_prefix("HUM:"))
        .ok_or_else(|| ProtocolError::MalformedFrame(payload.to_string()))?;

    if fields.next().is_some() {
        return Err(ProtocolError::MalformedFrame(payload.to_string()));
    }

    Ok(Frame::Report {
        sensor_id: parse_sensor_id(raw_id)?,
        temperature: parse_value("TEMP", raw_temp)?,
        humidity: parse_value("HUM", raw_hum)?,
    })
}

fn parse_sensor_id(raw: &str) -> Result<SensorId, ProtocolError> {
    raw.parse::<u16>()
        .map(SensorId::new)
        .map_err(|_| ProtocolError::InvalidSensorId {
            value: raw.to_string(),
        })
}

fn parse_value(field: &'static str, raw: &str) -> Result<f64, ProtocolError> {
    let value = raw
        .parse::<f64>()
        .map_err(|_| ProtocolError::InvalidValue {
            field,
            value: raw.to_string(),
        })?;

    // "inf" and "NaN" parse as f64 but are never valid observations.
    if !value.is_finite() {
        return Err(ProtocolError::InvalidValue {
            field,
            value: raw.to_string(),
        });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hello() {
        let frame = parse_frame("ID:3").unwrap();
        assert_eq!(
            frame,
            Frame::Hello {
                sensor_id: SensorId::new(3)
            }
        );
    }

    #[test]
    fn test_parse_hello_strips_nul_padding() {
        let frame = parse_frame("ID:7\0\0\0\0").unwrap();
        assert_eq!(
            frame,
            Frame::Hello {
                sensor_id: SensorId::new(7)
            }
        );
    }

    #[test]
    fn test_parse_hello_rejects_trailing_junk() {
        assert!(parse_frame("ID:3extra").is_err());
        assert!(parse_frame("ID:3 4").is_err());
    }

    #[test]
    fn test_parse_hello_rejects_negative_and_overflow() {
        assert!(matches!(
            parse_frame("ID:-1"),
            Err(ProtocolError::InvalidSensorId { .. })
        ));
        assert!(matches!(
            parse_frame("ID:70000"),
            Err(ProtocolError::InvalidSensorId { .. })
        ));
    }

    #[test]
    fn test_parse_report() {
        let frame = parse_frame("SENSOR:3,TEMP:21.50,HUM:55.00").unwrap();
        match frame {
            Frame::Report {
                sensor_id,
                temperature,
                humidity,
            } => {
                assert_eq!(sensor_id, SensorId::new(3));
                assert!((temperature - 21.5).abs() < f64::EPSILON);
                assert!((humidity - 55.0).abs() < f64::EPSILON);
            }
            other => panic!("expected report frame, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_report_negative_temperature() {
        let frame = parse_frame("SENSOR:0,TEMP:-3.25,HUM:80.1").unwrap();
        match frame {
            Frame::Report { temperature, .. } => {
                assert!((temperature - (-3.25)).abs() < f64::EPSILON);
            }
            other => panic!("expected report frame, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_report_rejects_missing_fields() {
        assert!(parse_frame("SENSOR:3,TEMP:21.50").is_err());
        assert!(parse_frame("SENSOR:3").is_err());
        assert!(parse_frame("SENSOR:3,HUM:55.0,TEMP:21.5").is_err());
    }

    #[test]
    fn test_parse_report_rejects_extra_fields() {
        assert!(parse_frame("SENSOR:3,TEMP:21.5,HUM:55.0,EXTRA:1").is_err());
    }

    #[test]
    fn test_parse_report_rejects_non_finite_values() {
        assert!(matches!(
            parse_frame("SENSOR:3,TEMP:inf,HUM:55.0"),
            Err(ProtocolError::InvalidValue { field: "TEMP", .. })
        ));
        assert!(matches!(
            parse_frame("SENSOR:3,TEMP:21.5,HUM:NaN"),
            Err(ProtocolError::InvalidValue { field: "HUM", .. })
        ));
    }

    #[test]
    fn test_parse_frame_rejects_unknown_payload() {
        assert!(matches!(
            parse_frame("HELLO WORLD"),
            Err(ProtocolError::MalformedFrame(_))
        ));
        assert!(matches!(
            parse_frame(""),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }
}
