//! Durable store engine for sensor readings.
//!
//! The engine owns the SQLite handle behind its own lock, distinct
//! from the registry lock, so a slow write never blocks registry
//! reads and vice versa. It is a two-state machine:
//!
//! - `Disconnected` (initial): a periodic reconnect step attempts to
//!   open the store, bounded by a consecutive-failure counter. Once
//!   the counter reaches [`MAX_RETRIES`] the engine stops attempting
//!   reconnection for the rest of the process lifetime.
//! - `Connected`: readings are written append-only; the store assigns
//!   the row timestamp. Per-write failures are logged by the caller
//!   and the write is dropped, with no retry.
//!
//! Two write paths feed the engine: the immediate path (a session
//! handler submits each parsed reading) and the periodic path (every
//! [`FLUSH_INTERVAL`] a registry snapshot is flushed). Both run the
//! same connected-check and dedup filter: a reading whose temperature
//! and humidity are both within `VALUE_TOLERANCE` of the last
//! persisted value for that sensor is skipped, and an application
//! level guard rejects a row that exactly matches one inserted within
//! the trailing [`DEDUP_WINDOW`], defending against the two paths
//! racing the same value into the table twice.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sgw_core::{Reading, SensorId, VALUE_TOLERANCE};

use crate::registry::SensorRegistry;

/// Consecutive store-open failures tolerated before the engine gives
/// up reconnecting until process restart.
pub const MAX_RETRIES: u32 = 3;

/// Cadence of the periodic reconnect/flush cycle.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Trailing window of the exact-duplicate insertion guard.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(10);

/// Idempotent schema bootstrap for the readings table.
const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS sensor_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sensor_id INTEGER,
    temperature REAL,
    humidity REAL,
    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
)";

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open database at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Outcome of a single write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// A new row was appended.
    Inserted,
    /// The reading duplicated the last persisted value and was skipped.
    Deduplicated,
    /// The engine is disconnected; the reading was dropped.
    NotConnected,
}

/// Counters for one periodic flush pass, for logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlushStats {
    pub inserted: usize,
    pub deduplicated: usize,
    pub failed: usize,
}

/// Last value persisted per sensor, for the tolerance comparison.
/// Distinct from the registry's reading cache, which tracks the
/// freshest received value regardless of persistence.
#[derive(Debug, Clone, Copy)]
struct PersistedSample {
    temperature: f64,
    humidity: f64,
}

struct StorageState {
    conn: Option<Connection>,
    failure_count: u32,
    last_persisted: HashMap<SensorId, PersistedSample>,
}

/// Durable store engine. Shared across tasks behind an `Arc`; all
/// access to the handle, the failure counter and the dedup cache
/// serializes through the internal storage lock.
pub struct StorageEngine {
    db_path: PathBuf,
    inner: Mutex<StorageState>,
}

impl StorageEngine {
    /// Creates an engine in the `Disconnected` state.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            inner: Mutex::new(StorageState {
                conn: None,
                failure_count: 0,
                last_persisted: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StorageState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the store and runs the idempotent schema bootstrap.
    ///
    /// Used at startup, where a failure is fatal to the process, and
    /// by the periodic reconnect step, where it is counted instead.
    pub fn connect(&self) -> Result<(), StorageError> {
        let mut state = self.lock();
        self.open_locked(&mut state)
    }

    fn open_locked(&self, state: &mut StorageState) -> Result<(), StorageError> {
        // Drop any stale handle before reopening.
        state.conn = None;

        let conn = Connection::open(&self.db_path).map_err(|source| StorageError::Open {
            path: self.db_path.clone(),
            source,
        })?;

        conn.execute(SCHEMA_SQL, [])?;

        state.conn = Some(conn);
        state.failure_count = 0;

        info!(path = %self.db_path.display(), "Connection to the durable store established");
        Ok(())
    }

    /// Whether the engine currently holds a store handle.
    pub fn is_connected(&self) -> bool {
        self.lock().conn.is_some()
    }

    /// Consecutive reconnect failures so far.
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Whether the engine has permanently given up reconnecting.
    pub fn retries_exhausted(&self) -> bool {
        let state = self.lock();
        state.conn.is_none() && state.failure_count >= MAX_RETRIES
    }

    /// Reconnect step of the periodic cycle.
    ///
    /// No-op while connected or after [`MAX_RETRIES`] consecutive
    /// failures. There is no backoff beyond the cycle cadence; giving
    /// up permanently after the retry budget is a documented
    /// limitation of the engine.
    pub fn try_reconnect(&self) {
        let mut state = self.lock();

        if state.conn.is_some() || state.failure_count >= MAX_RETRIES {
            return;
        }

        if let Err(e) = self.open_locked(&mut state) {
            state.failure_count += 1;
            warn!(
                attempt = state.failure_count,
                max_retries = MAX_RETRIES,
                error = %e,
                "Unable to open the durable store"
            );

            if state.failure_count >= MAX_RETRIES {
                error!(
                    max_retries = MAX_RETRIES,
                    "Store reconnect budget exhausted, persisting disabled until restart"
                );
            }
        }
    }

    /// Immediate write path: persists one reading, subject to the
    /// connected check and the dedup filter.
    pub fn store_reading(&self, reading: &Reading) -> Result<StoreOutcome, StorageError> {
        let mut state = self.lock();
        Self::store_locked(&mut state, reading)
    }

    /// Periodic write path: persists every snapshot entry whose value
    /// changed beyond tolerance. The snapshot must be taken (and the
    /// registry lock released) before this is called.
    pub fn flush_snapshot(&self, snapshot: &[(SensorId, Reading)]) -> FlushStats {
        let mut state = self.lock();
        let mut stats = FlushStats::default();

        for (sensor_id, reading) in snapshot {
            match Self::store_locked(&mut state, reading) {
                Ok(StoreOutcome::Inserted) => stats.inserted += 1,
                Ok(StoreOutcome::Deduplicated) => stats.deduplicated += 1,
                Ok(StoreOutcome::NotConnected) => break,
                Err(e) => {
                    // The failed write is dropped; the cycle moves on.
                    warn!(sensor_id = %sensor_id, error = %e, "Failed to flush reading");
                    stats.failed += 1;
                }
            }
        }

        stats
    }

    fn store_locked(
        state: &mut StorageState,
        reading: &Reading,
    ) -> Result<StoreOutcome, StorageError> {
        if state.conn.is_none() {
            return Ok(StoreOutcome::NotConnected);
        }

        if let Some(prev) = state.last_persisted.get(&reading.sensor_id) {
            let same_temp = (reading.temperature - prev.temperature).abs() <= VALUE_TOLERANCE;
            let same_hum = (reading.humidity - prev.humidity).abs() <= VALUE_TOLERANCE;
            if same_temp && same_hum {
                return Ok(StoreOutcome::Deduplicated);
            }
        }

        let Some(conn) = state.conn.as_ref() else {
            return Ok(StoreOutcome::NotConnected);
        };

        // Application-level uniqueness guard: the schema does not
        // enforce it, and the immediate and periodic paths can race
        // the same value toward the table.
        if Self::recent_duplicate_exists(conn, reading)? {
            return Ok(StoreOutcome::Deduplicated);
        }

        conn.execute(
            "INSERT INTO sensor_data (sensor_id, temperature, humidity) VALUES (?1, ?2, ?3)",
            params![
                reading.sensor_id.as_sql(),
                reading.temperature,
                reading.humidity
            ],
        )?;

        state.last_persisted.insert(
            reading.sensor_id,
            PersistedSample {
                temperature: reading.temperature,
                humidity: reading.humidity,
            },
        );

        Ok(StoreOutcome::Inserted)
    }

    /// True if a row with this exact sensor/temperature/humidity was
    /// inserted within the trailing [`DEDUP_WINDOW`].
    fn recent_duplicate_exists(conn: &Connection, reading: &Reading) -> Result<bool, StorageError> {
        let sql = format!(
            "SELECT 1 FROM sensor_data
             WHERE sensor_id = ?1 AND temperature = ?2 AND humidity = ?3
               AND timestamp >= datetime('now', '-{} seconds')
             LIMIT 1",
            DEDUP_WINDOW.as_secs()
        );

        let found = conn
            .query_row(
                &sql,
                params![
                    reading.sensor_id.as_sql(),
                    reading.temperature,
                    reading.humidity
                ],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        Ok(found)
    }

    /// Reads back every stored row for one sensor, oldest first.
    pub fn readings_for(&self, sensor_id: SensorId) -> Result<Vec<StoredReading>, StorageError> {
        let state = self.lock();

        let Some(conn) = state.conn.as_ref() else {
            return Ok(Vec::new());
        };

        let mut stmt = conn.prepare(
            "SELECT sensor_id, temperature, humidity, timestamp
             FROM sensor_data WHERE sensor_id = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map(params![sensor_id.as_sql()], |row| {
            Ok(StoredReading {
                sensor_id: SensorId::new(row.get::<_, i64>(0)? as u16),
                temperature: row.get(1)?,
                humidity: row.get(2)?,
                timestamp: row.get(3)?,
            })
        })?;

        let mut readings = Vec::new();
        for row in rows {
            readings.push(row?);
        }
        Ok(readings)
    }
}

/// One persisted row, as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredReading {
    pub sensor_id: SensorId,
    pub temperature: f64,
    pub humidity: f64,
    /// Backend-assigned wall-clock timestamp.
    pub timestamp: String,
}

/// Spawns the periodic reconnect/flush task.
///
/// Each tick runs the reconnect step while disconnected, then flushes
/// a registry snapshot while connected. Uses cooperative shutdown via
/// `CancellationToken`; the returned handle is joined at process
/// shutdown.
pub fn spawn_storage_task(
    engine: Arc<StorageEngine>,
    registry: Arc<SensorRegistry>,
    flush_interval: Duration,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(flush_interval);

        info!(
            interval_secs = flush_interval.as_secs_f64(),
            "Storage cycle started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Storage cycle shutting down");
                    break;
                }

                _ = tick.tick() => {
                    run_cycle(&engine, &registry);
                }
            }
        }

        debug!("Storage task completed");
    })
}

/// One pass of the periodic cycle. The registry snapshot is taken and
/// the registry lock released before the storage lock is acquired.
fn run_cycle(engine: &StorageEngine, registry: &SensorRegistry) {
    engine.try_reconnect();

    if !engine.is_connected() {
        return;
    }

    let snapshot = registry.snapshot();
    if snapshot.is_empty() {
        return;
    }

    let stats = engine.flush_snapshot(&snapshot);
    if stats.inserted > 0 || stats.failed > 0 {
        debug!(
            inserted = stats.inserted,
            deduplicated = stats.deduplicated,
            failed = stats.failed,
            "Periodic flush cycle completed"
        );
    }
}
