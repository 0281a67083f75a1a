//! CareLog Core Library
//!
//! Client-side record cache for a care home's daily care log, with a SQLite
//! backed record store.
//!
//! # Architecture
//!
//! ```text
//!   RecordFilter (kind, date, timing, floor)
//!          │
//!          ▼
//!   OptimisticRecordCache ──── one row per resident ────► UI
//!          │        ▲
//!   create/update/  │ confirm / roll back
//!   delete/list     │
//!          ▼        │
//!   RemoteRecordStore (SqliteRecordStore, or any async backend)
//!          │
//!          ▼
//!   NotificationSink ◄── failures the user has to hear about
//! ```
//!
//! # Core Principle
//!
//! **Edits are visible immediately.** The store only decides whether they
//! stay; a refused edit puts back exactly what was there before.
//!
//! # Modules
//!
//! - [`cache`]: Optimistic cache with provisional records and rollback
//! - [`models`]: Domain types (Record, Resident, RecordFilter, ids)
//! - [`store`]: Store and notification traits, SQLite-backed store
//! - [`db`]: SQLite database layer
//! - [`clock`]: Wall-clock conversion for stored UTC instants
//! - [`config`]: JSON configuration
//! - [`logging`]: tracing subscriber setup

pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod store;

// Re-export commonly used types
pub use cache::{CacheError, CacheResult, FilterOutcome, OptimisticRecordCache, Reconciliation};
pub use clock::WallClock;
pub use config::{CareLogConfig, ConfigError};
pub use db::{Database, DbError};
pub use logging::{init_logging, init_logging_from};
pub use models::{
    CorrelationKey, FieldValue, Floor, Record, RecordField, RecordFilter, RecordId, RecordKind,
    RecordPatch, Resident, ValidationError,
};
pub use store::{
    LogNotifier, NotificationSink, RemoteRecordStore, Severity, SqliteRecordStore, StoreError,
    StoreResult,
};
