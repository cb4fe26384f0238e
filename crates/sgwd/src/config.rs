//! Gateway configuration.
//!
//! The listening port comes from the CLI; everything else carries a
//! default with an environment override where operators need one.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::registry::DEFAULT_CAPACITY;
use crate::storage::FLUSH_INTERVAL;

/// Default database file, next to the working directory.
pub const DEFAULT_DB_PATH: &str = "sensor_data.db";

/// Default report log file.
pub const DEFAULT_REPORT_LOG_PATH: &str = "gateway.log";

/// How long an accepted connection may take to present its handshake
/// before the gateway gives up on it.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime configuration for the gateway daemon.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// TCP port the connection manager listens on.
    pub port: u16,

    /// Size of the sensor identity space; also the session capacity.
    pub capacity: usize,

    /// SQLite database path (`SGW_DB_PATH` override).
    pub db_path: PathBuf,

    /// Report log path (`SGW_REPORT_LOG` override).
    pub report_log_path: PathBuf,

    /// Cadence of the periodic reconnect/flush cycle.
    pub flush_interval: Duration,

    /// Handshake read deadline for freshly accepted connections.
    pub handshake_timeout: Duration,
}

impl GatewayConfig {
    /// Builds the configuration for `port`, applying environment
    /// overrides over the defaults.
    pub fn new(port: u16) -> Self {
        let db_path = env::var("SGW_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH));

        let report_log_path = env::var("SGW_REPORT_LOG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_REPORT_LOG_PATH));

        Self {
            port,
            capacity: DEFAULT_CAPACITY,
            db_path,
            report_log_path,
            flush_interval: FLUSH_INTERVAL,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::new(12345);

        assert_eq!(config.port, 12345);
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.flush_interval, FLUSH_INTERVAL);
        assert_eq!(config.handshake_timeout, HANDSHAKE_TIMEOUT);
    }
}
