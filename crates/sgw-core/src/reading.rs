//! Sensor readings.

use chrono::{DateTime, Utc};

use crate::SensorId;

/// Tolerance used when deciding whether two readings carry the same
/// value. A reading whose temperature and humidity are both within
/// this distance of the last persisted value is not written again.
pub const VALUE_TOLERANCE: f64 = 0.01;

/// A single temperature/humidity observation from one sensor.
///
/// Produced by a session handler for each successfully parsed report
/// frame. The registry retains only the most recent reading per
/// sensor; the persisted timestamp is assigned by the store at write
/// time, independently of `observed_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Identity of the reporting sensor.
    pub sensor_id: SensorId,

    /// Temperature in degrees Celsius.
    pub temperature: f64,

    /// Relative humidity in percent.
    pub humidity: f64,

    /// Wall-clock instant the gateway received the observation.
    pub observed_at: DateTime<Utc>,
}

impl Reading {
    /// Creates a reading stamped with the current instant.
    pub fn new(sensor_id: SensorId, temperature: f64, humidity: f64) -> Self {
        Self {
            sensor_id,
            temperature,
            humidity,
            observed_at: Utc::now(),
        }
    }

    /// Returns true when both values are within [`VALUE_TOLERANCE`] of
    /// the other reading's values.
    pub fn within_tolerance_of(&self, other: &Reading) -> bool {
        (self.temperature - other.temperature).abs() <= VALUE_TOLERANCE
            && (self.humidity - other.humidity).abs() <= VALUE_TOLERANCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stamps_observation_instant() {
        let before = Utc::now();
        let reading = Reading::new(SensorId::new(1), 21.5, 55.0);
        let after = Utc::now();

        assert!(reading.observed_at >= before && reading.observed_at <= after);
        assert_eq!(reading.sensor_id, SensorId::new(1));
    }

    #[test]
    fn test_within_tolerance_accepts_equal_values() {
        let a = Reading::new(SensorId::new(1), 21.5, 55.0);
        let b = Reading::new(SensorId::new(1), 21.5, 55.0);
        assert!(a.within_tolerance_of(&b));
    }

    #[test]
    fn test_within_tolerance_accepts_tiny_drift() {
        let a = Reading::new(SensorId::new(1), 21.5, 55.0);
        let b = Reading::new(SensorId::new(1), 21.505, 54.995);
        assert!(a.within_tolerance_of(&b));
    }

    #[test]
    fn test_within_tolerance_rejects_temperature_change() {
        let a = Reading::new(SensorId::new(1), 21.5, 55.0);
        let b = Reading::new(SensorId::new(1), 21.6, 55.0);
        assert!(!a.within_tolerance_of(&b));
    }

    #[test]
    fn test_within_tolerance_rejects_humidity_change() {
        let a = Reading::new(SensorId::new(1), 21.5, 55.0);
        let b = Reading::new(SensorId::new(1), 21.5, 55.2);
        assert!(!a.within_tolerance_of(&b));
    }
}
