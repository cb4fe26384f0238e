//! Sensor identity.
//!
//! Devices announce an application-level integer identity during the
//! handshake. The identity space is bounded by the registry capacity;
//! range enforcement lives in the registry, not here.

use std::fmt;

/// Application-level identity of a sensor device.
///
/// Unique among live sessions in the registry. Wraps a small integer
/// because the identity space is a bounded protocol limit, not an
/// arbitrary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SensorId(u16);

impl SensorId {
    /// Creates a sensor identity from its raw integer value.
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Returns the raw integer value.
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Returns the identity as an `i64` for SQL parameter binding.
    pub const fn as_sql(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for SensorId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_raw_value() {
        assert_eq!(SensorId::new(3).to_string(), "3");
        assert_eq!(SensorId::new(0).to_string(), "0");
    }

    #[test]
    fn test_ordering_follows_value() {
        assert!(SensorId::new(1) < SensorId::new(2));
        assert_eq!(SensorId::new(7), SensorId::from(7));
    }

    #[test]
    fn test_sql_binding_value() {
        assert_eq!(SensorId::new(9).as_sql(), 9i64);
    }
}
