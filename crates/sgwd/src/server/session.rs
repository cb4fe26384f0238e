//! Session handler for individual sensor devices.
//!
//! Each admitted device gets its own handler task, bound to the
//! session's identity at spawn time. The handler:
//! - Reads report frames from the device's stream
//! - Updates the registry's reading cache
//! - Forwards each reading to the storage engine (immediate write path)
//! - Detects disconnect and marks the session accordingly
//!
//! No idle timeout is applied to the read: a silent sensor parks only
//! its own task, and the sensor population is bounded by registry
//! capacity. Disconnect (EOF, read error or shutdown) is the only
//! terminal state.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sgw_core::{Reading, SensorId};
use sgw_protocol::{parse_frame, Frame};

use crate::logsink::ReportLogHandle;
use crate::registry::{RecordOutcome, SensorRegistry};
use crate::storage::StorageEngine;

/// Fixed size of the per-session read buffer. Device messages are
/// newline-free and never approach this bound.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Handler for a single sensor session.
pub struct SessionHandler {
    sensor_id: SensorId,
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<SensorRegistry>,
    storage: Arc<StorageEngine>,
    report_log: ReportLogHandle,
    cancel_token: CancellationToken,
}

impl SessionHandler {
    /// Creates a handler bound to an admitted session.
    ///
    /// The identity is handed in explicitly; the handler never infers
    /// which session it owns from registry state.
    pub fn new(
        sensor_id: SensorId,
        stream: TcpStream,
        peer: SocketAddr,
        registry: Arc<SensorRegistry>,
        storage: Arc<StorageEngine>,
        report_log: ReportLogHandle,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            sensor_id,
            stream,
            peer,
            registry,
            storage,
            report_log,
            cancel_token,
        }
    }

    /// Runs the session loop until the device disconnects or shutdown
    /// is requested. Marks the session disconnected on exit; dropping
    /// `self.stream` closes the connection.
    pub async fn run(mut self) {
        debug!(sensor_id = %self.sensor_id, peer = %self.peer, "Session handler started");

        loop {
            let mut buf = [0u8; READ_BUFFER_SIZE];

            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    debug!(sensor_id = %self.sensor_id, "Session handler shutting down");
                    break;
                }

                result = self.stream.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            info!(sensor_id = %self.sensor_id, "Sensor node closed the connection");
                            break;
                        }
                        Ok(n) => {
                            self.handle_payload(&buf[..n]);
                        }
                        Err(e) => {
                            info!(sensor_id = %self.sensor_id, error = %e, "Sensor connection lost");
                            break;
                        }
                    }
                }
            }
        }

        self.registry.disconnect(self.sensor_id);
    }

    /// Processes one received payload. Parse failures and identity
    /// mismatches are logged and dropped; the connection stays open.
    fn handle_payload(&self, payload: &[u8]) {
        let text = String::from_utf8_lossy(payload);

        let frame = match parse_frame(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(sensor_id = %self.sensor_id, error = %e, "Invalid data format from sensor node");
                return;
            }
        };

        match frame {
            Frame::Report {
                sensor_id,
                temperature,
                humidity,
            } => {
                if sensor_id != self.sensor_id {
                    // The original firmware gateway trusted the id in the
                    // report; rejecting the mismatch is a deliberate
                    // hardening divergence.
                    warn!(
                        session_id = %self.sensor_id,
                        claimed_id = %sensor_id,
                        "Report frame for foreign identity dropped"
                    );
                    return;
                }

                self.ingest(Reading::new(self.sensor_id, temperature, humidity));
            }
            Frame::Hello { .. } => {
                warn!(sensor_id = %self.sensor_id, "Unexpected handshake frame mid-session");
            }
        }
    }

    /// Records a parsed reading and forwards it along the immediate
    /// write path. Storage failures are logged and the write dropped.
    fn ingest(&self, reading: Reading) {
        if self.registry.record_reading(self.sensor_id, reading.clone()) == RecordOutcome::Ignored {
            debug!(sensor_id = %self.sensor_id, "Reading ignored by registry");
            return;
        }

        self.report_log
            .submit_report(self.sensor_id, reading.temperature, reading.humidity);

        match self.storage.store_reading(&reading) {
            Ok(outcome) => {
                debug!(sensor_id = %self.sensor_id, outcome = ?outcome, "Reading forwarded to store");
            }
            Err(e) => {
                warn!(sensor_id = %self.sensor_id, error = %e, "Failed to persist reading");
            }
        }
    }
}
