//! TCP server for the gateway daemon.
//!
//! The server:
//! - Binds and listens on the configured port
//! - Accepts sensor devices and spawns a supervised task per device
//! - The spawned task performs the `ID:<integer>` handshake, admits
//!   the device into the registry and runs its SessionHandler
//! - Supports graceful shutdown via CancellationToken
//!
//! Binding failures are fatal and surfaced to the caller; everything
//! that goes wrong on an individual connection (accept error,
//! handshake timeout, malformed handshake, admission rejection) is
//! logged, the connection is closed, and the accept loop continues.

mod session;

pub use session::{SessionHandler, READ_BUFFER_SIZE};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sgw_protocol::{parse_frame, Frame, ProtocolError};

use crate::config::GatewayConfig;
use crate::logsink::ReportLogHandle;
use crate::registry::SensorRegistry;
use crate::storage::StorageEngine;

/// Errors that can occur setting up or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },

    #[error("listener error: {0}")]
    Listener(#[from] std::io::Error),
}

/// TCP connection manager for sensor devices.
pub struct GatewayServer {
    listener: TcpListener,
    config: GatewayConfig,
    registry: Arc<SensorRegistry>,
    storage: Arc<StorageEngine>,
    report_log: ReportLogHandle,
    cancel_token: CancellationToken,
}

impl GatewayServer {
    /// Binds the listening socket. Failure here is fatal to the
    /// component; the process orchestrator decides what that means
    /// for the process.
    pub async fn bind(
        config: GatewayConfig,
        registry: Arc<SensorRegistry>,
        storage: Arc<StorageEngine>,
        report_log: ReportLogHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .await
            .map_err(|source| ServerError::Bind {
                port: config.port,
                source,
            })?;

        Ok(Self {
            listener,
            config,
            registry,
            storage,
            report_log,
            cancel_token,
        })
    }

    /// Returns the bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the accept loop until shutdown is requested.
    ///
    /// Session handlers are supervised: every spawned handler lives in
    /// a `JoinSet` that is reaped as handlers finish and drained after
    /// cancellation, so the server does not return while readings are
    /// still being processed.
    pub async fn run(self) {
        info!(port = self.config.port, "Connection manager listening");

        let mut handlers: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                Some(result) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Session handler aborted");
                    }
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            // The handshake runs inside the spawned
                            // task; a device that stalls before
                            // identifying itself parks only its own
                            // task, never the accept loop.
                            handlers.spawn(handshake_and_run(
                                stream,
                                peer,
                                self.config.handshake_timeout,
                                Arc::clone(&self.registry),
                                Arc::clone(&self.storage),
                                self.report_log.clone(),
                                self.cancel_token.clone(),
                            ));
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }
            }
        }

        // Handlers observe the same cancellation token; wait for all
        // of them to disconnect their sessions.
        while let Some(result) = handlers.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Session handler aborted");
            }
        }

        info!("Connection manager stopped");
    }
}

/// Performs the handshake and admission for one accepted device, then
/// runs its session handler in place.
///
/// Every failure path closes the connection (by dropping the stream)
/// and returns. Shutdown is observed during the handshake wait too,
/// so a device that never identifies itself cannot delay process
/// exit.
async fn handshake_and_run(
    mut stream: TcpStream,
    peer: SocketAddr,
    handshake_timeout: Duration,
    registry: Arc<SensorRegistry>,
    storage: Arc<StorageEngine>,
    report_log: ReportLogHandle,
    cancel_token: CancellationToken,
) {
    debug!(peer = %peer, "Device connected, awaiting handshake");

    let payload = tokio::select! {
        biased;

        _ = cancel_token.cancelled() => {
            debug!(peer = %peer, "Shutdown before handshake");
            return;
        }

        result = timeout(handshake_timeout, read_payload(&mut stream)) => {
            match result {
                Ok(Ok(Some(payload))) => payload,
                Ok(Ok(None)) => {
                    debug!(peer = %peer, "Device closed before handshake");
                    return;
                }
                Ok(Err(e)) => {
                    warn!(peer = %peer, error = %e, "Handshake read failed");
                    return;
                }
                Err(_) => {
                    warn!(peer = %peer, "Handshake timed out");
                    return;
                }
            }
        }
    };

    let sensor_id = match parse_handshake(&payload) {
        Ok(id) => id,
        Err(e) => {
            warn!(peer = %peer, error = %e, "Invalid sensor ID format");
            return;
        }
    };

    if let Err(e) = registry.admit(sensor_id, peer) {
        warn!(sensor_id = %sensor_id, peer = %peer, error = %e, "Admission rejected");
        return;
    }

    report_log.submit(format!(
        "Sensor node {sensor_id} has opened a new connection from {peer}"
    ));

    SessionHandler::new(
        sensor_id,
        stream,
        peer,
        registry,
        storage,
        report_log,
        cancel_token,
    )
    .run()
    .await;
}

/// Parses the handshake payload, requiring an exact `ID:<integer>`
/// frame. A report frame at this point is a protocol violation.
fn parse_handshake(payload: &str) -> Result<sgw_core::SensorId, ProtocolError> {
    match parse_frame(payload)? {
        Frame::Hello { sensor_id } => Ok(sensor_id),
        Frame::Report { .. } => Err(ProtocolError::UnexpectedFrame {
            expected: "handshake",
            got: payload.trim_matches(char::from(0)).trim().to_string(),
        }),
    }
}

/// Reads one device message into the fixed protocol buffer.
///
/// Returns `None` on a cleanly closed connection.
async fn read_payload(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&buf[..n]).into_owned()))
}
