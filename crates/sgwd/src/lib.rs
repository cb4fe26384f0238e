//! SGW Daemon - concurrent sensor-ingestion gateway
//!
//! This crate provides the gateway's components:
//! - `registry` - shared table of live sensor sessions and latest readings
//! - `server` - TCP accept loop, handshake and per-session handlers
//! - `storage` - durable store engine with dedup and bounded reconnect
//! - `logsink` - best-effort report log collaborator
//! - `config` - gateway configuration with environment overrides
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  accept/handshake   ┌──────────────────┐
//! │  GatewayServer  │────────────────────▶│  SensorRegistry  │
//! │  (TcpListener)  │       admit         │  (lock-guarded)  │
//! └───────┬─────────┘                     └────────▲─────────┘
//!         │ spawn per session                      │ record/snapshot
//!         ▼                                        │
//! ┌─────────────────┐   immediate write   ┌────────┴─────────┐
//! │ SessionHandler  │────────────────────▶│  StorageEngine   │
//! │  (per device)   │                     │ (SQLite + dedup) │
//! └─────────────────┘                     └──────────────────┘
//!                        periodic flush cycle ──────┘
//! ```
//!
//! Two independent lock domains guard the shared state: the registry
//! lock and the storage lock. No code path holds one while acquiring
//! the other; the storage cycle takes a registry snapshot first, then
//! releases it before touching the store.
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Poisoned locks are recovered, not propagated

pub mod config;
pub mod logsink;
pub mod registry;
pub mod server;
pub mod storage;
