//! Sensor session registry - shared table of live sessions and their
//! latest readings.
//!
//! The registry is the single owner of session state. All operations
//! serialize through one registry-wide lock; callers get no atomicity
//! across multiple calls. The lock is never held across an `.await`
//! and never while the storage lock is taken.
//!
//! Session slots are not recycled: a disconnected identity stays in
//! the table, is excluded from snapshots, and cannot be admitted
//! again. The identity space is `[0, capacity)` and the total number
//! of admitted sessions is bounded by the same capacity.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use sgw_core::{Reading, SensorId};

/// Default number of sensor identities the gateway accepts.
pub const DEFAULT_CAPACITY: usize = 10;

/// One admitted sensor session.
///
/// The connection handle itself is owned by the session-handler task,
/// not stored here; the registry keeps the identity, the peer address
/// and the freshest reading.
#[derive(Debug, Clone)]
struct SessionRecord {
    peer: SocketAddr,
    connected: bool,
    last_reading: Option<Reading>,
    admitted_at: DateTime<Utc>,
}

/// Errors returned by [`SensorRegistry::admit`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmitError {
    /// The identity was admitted before (live or disconnected).
    #[error("sensor {0} is already registered")]
    DuplicateIdentity(SensorId),

    /// The admitted-session count has reached capacity.
    #[error("sensor capacity reached (max: {max})")]
    CapacityExceeded { max: usize },

    /// The identity lies outside the configured identity space.
    #[error("sensor id {id} outside identity space 0..{capacity}")]
    OutOfRange { id: SensorId, capacity: usize },
}

/// Outcome of [`SensorRegistry::record_reading`].
///
/// A reading for an unknown or disconnected identity is ignored, not
/// treated as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    Ignored,
}

/// Lock-guarded table of sensor sessions.
pub struct SensorRegistry {
    capacity: usize,
    inner: Mutex<BTreeMap<SensorId, SessionRecord>>,
}

impl SensorRegistry {
    /// Creates a registry for identities in `[0, capacity)`.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the configured identity-space size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// A poisoned lock means another thread panicked mid-update; the
    /// table itself is still structurally sound, so recover the guard.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<SensorId, SessionRecord>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits a new session under `id`, connected from `peer`.
    ///
    /// Rejects identities outside the identity space, identities that
    /// were admitted before, and admissions past capacity. On success
    /// the session is marked connected and counts against capacity for
    /// the rest of the process lifetime.
    pub fn admit(&self, id: SensorId, peer: SocketAddr) -> Result<(), AdmitError> {
        let mut sessions = self.lock();

        if sessions.contains_key(&id) {
            return Err(AdmitError::DuplicateIdentity(id));
        }

        if sessions.len() >= self.capacity {
            return Err(AdmitError::CapacityExceeded { max: self.capacity });
        }

        if id.value() as usize >= self.capacity {
            return Err(AdmitError::OutOfRange {
                id,
                capacity: self.capacity,
            });
        }

        sessions.insert(
            id,
            SessionRecord {
                peer,
                connected: true,
                last_reading: None,
                admitted_at: Utc::now(),
            },
        );

        info!(
            sensor_id = %id,
            peer = %peer,
            live_sessions = sessions.values().filter(|s| s.connected).count(),
            "Sensor session admitted"
        );

        Ok(())
    }

    /// Caches the latest reading for a connected identity.
    ///
    /// A no-op for identities that are unknown, out of range or
    /// currently disconnected.
    pub fn record_reading(&self, id: SensorId, reading: Reading) -> RecordOutcome {
        let mut sessions = self.lock();

        match sessions.get_mut(&id) {
            Some(record) if record.connected => {
                record.last_reading = Some(reading);
                RecordOutcome::Recorded
            }
            _ => {
                debug!(sensor_id = %id, "Reading for unknown or disconnected sensor ignored");
                RecordOutcome::Ignored
            }
        }
    }

    /// Marks a session disconnected. The record and its identity stay
    /// in the table; the caller owns (and closes) the connection.
    pub fn disconnect(&self, id: SensorId) {
        let mut sessions = self.lock();

        if let Some(record) = sessions.get_mut(&id) {
            record.connected = false;
            let session_secs = (Utc::now() - record.admitted_at).num_seconds();
            info!(
                sensor_id = %id,
                peer = %record.peer,
                session_secs,
                "Sensor session disconnected"
            );
        }
    }

    /// Returns a consistent point-in-time copy of every connected
    /// sensor that has reported at least once, ordered by identity.
    /// Safe to use without holding any lock afterward.
    pub fn snapshot(&self) -> Vec<(SensorId, Reading)> {
        let sessions = self.lock();

        sessions
            .iter()
            .filter(|(_, record)| record.connected)
            .filter_map(|(id, record)| record.last_reading.clone().map(|r| (*id, r)))
            .collect()
    }

    /// Number of currently connected sessions.
    pub fn live_count(&self) -> usize {
        self.lock().values().filter(|s| s.connected).count()
    }

    /// Whether `id` is currently connected.
    pub fn is_connected(&self, id: SensorId) -> bool {
        self.lock().get(&id).map(|s| s.connected).unwrap_or(false)
    }

    /// The latest cached reading for `id`, if any.
    pub fn latest(&self, id: SensorId) -> Option<Reading> {
        self.lock().get(&id).and_then(|s| s.last_reading.clone())
    }
}

impl Default for SensorRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn reading(id: u16, temp: f64, hum: f64) -> Reading {
        Reading::new(SensorId::new(id), temp, hum)
    }

    #[test]
    fn test_admit_and_live_count() {
        let registry = SensorRegistry::new(10);

        assert!(registry.admit(SensorId::new(3), peer()).is_ok());
        assert_eq!(registry.live_count(), 1);
        assert!(registry.is_connected(SensorId::new(3)));
    }

    #[test]
    fn test_admit_duplicate_identity_rejected() {
        let registry = SensorRegistry::new(10);

        registry.admit(SensorId::new(3), peer()).unwrap();
        let result = registry.admit(SensorId::new(3), peer());

        assert_eq!(result, Err(AdmitError::DuplicateIdentity(SensorId::new(3))));
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn test_admit_out_of_range_rejected() {
        let registry = SensorRegistry::new(10);

        let result = registry.admit(SensorId::new(10), peer());
        assert_eq!(
            result,
            Err(AdmitError::OutOfRange {
                id: SensorId::new(10),
                capacity: 10
            })
        );
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_admit_beyond_capacity_rejected_and_state_unchanged() {
        let registry = SensorRegistry::new(10);
        for id in 0..10u16 {
            registry.admit(SensorId::new(id), peer()).unwrap();
        }
        assert_eq!(registry.live_count(), 10);

        // An eleventh distinct identity is turned away at the capacity
        // check, before the range check sees it.
        let result = registry.admit(SensorId::new(10), peer());
        assert_eq!(result, Err(AdmitError::CapacityExceeded { max: 10 }));
        assert_eq!(registry.live_count(), 10);

        // In-range ids are all taken at this point.
        let result = registry.admit(SensorId::new(5), peer());
        assert_eq!(result, Err(AdmitError::DuplicateIdentity(SensorId::new(5))));
        assert_eq!(registry.live_count(), 10);
    }

    #[test]
    fn test_disconnected_slot_counts_against_capacity() {
        let registry = SensorRegistry::new(2);

        registry.admit(SensorId::new(0), peer()).unwrap();
        registry.admit(SensorId::new(1), peer()).unwrap();
        registry.disconnect(SensorId::new(0));

        // Slot 0 is not recycled: the identity stays taken and the
        // capacity count still includes it.
        assert_eq!(
            registry.admit(SensorId::new(0), peer()),
            Err(AdmitError::DuplicateIdentity(SensorId::new(0)))
        );
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn test_record_reading_for_connected_sensor() {
        let registry = SensorRegistry::new(10);
        registry.admit(SensorId::new(3), peer()).unwrap();

        let outcome = registry.record_reading(SensorId::new(3), reading(3, 21.5, 55.0));
        assert_eq!(outcome, RecordOutcome::Recorded);

        let latest = registry.latest(SensorId::new(3)).unwrap();
        assert!((latest.temperature - 21.5).abs() < f64::EPSILON);
        assert!((latest.humidity - 55.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_reading_for_unknown_sensor_is_noop() {
        let registry = SensorRegistry::new(10);

        let outcome = registry.record_reading(SensorId::new(5), reading(5, 21.5, 55.0));
        assert_eq!(outcome, RecordOutcome::Ignored);
        assert!(registry.latest(SensorId::new(5)).is_none());
    }

    #[test]
    fn test_record_reading_for_disconnected_sensor_is_noop() {
        let registry = SensorRegistry::new(10);
        registry.admit(SensorId::new(3), peer()).unwrap();
        registry.record_reading(SensorId::new(3), reading(3, 20.0, 50.0));
        registry.disconnect(SensorId::new(3));

        let outcome = registry.record_reading(SensorId::new(3), reading(3, 21.5, 55.0));
        assert_eq!(outcome, RecordOutcome::Ignored);

        // The cached reading is the pre-disconnect one.
        let latest = registry.latest(SensorId::new(3)).unwrap();
        assert!((latest.temperature - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_is_ordered_and_excludes_disconnected() {
        let registry = SensorRegistry::new(10);

        for id in [4u16, 1, 7] {
            registry.admit(SensorId::new(id), peer()).unwrap();
            registry.record_reading(SensorId::new(id), reading(id, 20.0 + id as f64, 50.0));
        }
        registry.disconnect(SensorId::new(4));

        let snapshot = registry.snapshot();
        let ids: Vec<u16> = snapshot.iter().map(|(id, _)| id.value()).collect();
        assert_eq!(ids, vec![1, 7]);
    }

    #[test]
    fn test_snapshot_skips_sensors_without_readings() {
        let registry = SensorRegistry::new(10);
        registry.admit(SensorId::new(2), peer()).unwrap();

        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_concurrent_admissions_never_duplicate() {
        use std::sync::Arc;

        let registry = Arc::new(SensorRegistry::new(10));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                let mut admitted = 0;
                for id in 0..10u16 {
                    if registry.admit(SensorId::new(id), peer()).is_ok() {
                        admitted += 1;
                    }
                }
                admitted
            }));
        }

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 10);
        assert_eq!(registry.live_count(), 10);
    }
}
