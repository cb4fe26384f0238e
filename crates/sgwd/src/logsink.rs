//! Best-effort report log collaborator.
//!
//! Components submit formatted lines through a one-way channel; a
//! writer task filters the lines that describe sensor reports and
//! appends them, sequence-numbered and timestamped, to a durable log
//! file. Submission is best-effort: if the writer is gone the line is
//! silently dropped. Lines that do not match the report filter are
//! not persisted here but remain visible on the tracing console.

use std::path::PathBuf;

use chrono::Local;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Marker identifying the subject of a persisted line.
const SENSOR_MARKER: &str = "Sensor node";

/// Marker identifying a reading-report line.
const REPORT_MARKER: &str = "reports";

/// Cheap-to-clone handle for submitting log lines.
#[derive(Clone)]
pub struct ReportLogHandle {
    sender: mpsc::UnboundedSender<String>,
}

impl ReportLogHandle {
    /// Submits a line; silently dropped if no writer is attached.
    pub fn submit(&self, line: impl Into<String>) {
        let _ = self.sender.send(line.into());
    }

    /// Formats and submits the canonical report line for a reading.
    pub fn submit_report(&self, sensor_id: impl std::fmt::Display, temp: f64, hum: f64) {
        self.submit(format!(
            "{SENSOR_MARKER} {sensor_id} {REPORT_MARKER} temperature: {temp:.1}, humidity: {hum:.1}"
        ));
    }
}

/// Returns true for lines the writer persists.
fn is_report_line(line: &str) -> bool {
    line.contains(SENSOR_MARKER) && line.contains(REPORT_MARKER)
}

/// Spawns the report log writer task.
///
/// Returns the submission handle and the task's join handle. If the
/// log file cannot be opened the task exits and every subsequent
/// submission is dropped, keeping the channel best-effort.
pub fn spawn_report_log_task(
    path: PathBuf,
    cancel_token: CancellationToken,
) -> (ReportLogHandle, tokio::task::JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
    let handle = ReportLogHandle { sender };

    let task = tokio::spawn(async move {
        let mut file = match OpenOptions::new().create(true).append(true).open(&path).await {
            Ok(file) => file,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to open report log, dropping lines");
                return;
            }
        };

        info!(path = %path.display(), "Report log writer started");
        let mut seq: u64 = 0;

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    // Drain what was submitted before shutdown.
                    while let Ok(line) = receiver.try_recv() {
                        seq = write_line(&mut file, seq, &line).await;
                    }
                    info!("Report log writer shutting down");
                    break;
                }

                line = receiver.recv() => {
                    match line {
                        Some(line) => {
                            seq = write_line(&mut file, seq, &line).await;
                        }
                        None => {
                            debug!("Report log channel closed");
                            break;
                        }
                    }
                }
            }
        }
    });

    (handle, task)
}

/// Writes one line if it passes the report filter; returns the new
/// sequence counter.
async fn write_line(file: &mut tokio::fs::File, seq: u64, line: &str) -> u64 {
    if !is_report_line(line) {
        return seq;
    }

    let seq = seq + 1;
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    let entry = format!("{seq} {timestamp} {line}\n");

    if let Err(e) = file.write_all(entry.as_bytes()).await {
        warn!(error = %e, "Failed to append to report log");
        return seq;
    }
    if let Err(e) = file.flush().await {
        warn!(error = %e, "Failed to flush report log");
    }

    seq
}
