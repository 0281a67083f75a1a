//! Collaborators of the record cache: the remote record store it reconciles
//! against and the sink it reports failures to.

mod sqlite;

pub use sqlite::*;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::DbError;
use crate::models::{Record, RecordFilter, RecordPatch, Resident};

/// Record store errors.
///
/// The cache treats every variant the same way (roll back and notify); the
/// distinction is kept for logging and for other callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Rejected by record store: {0}")]
    Rejected(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => StoreError::NotFound(what),
            DbError::Constraint(what) => StoreError::Rejected(what),
            DbError::Timestamp(e) => StoreError::Rejected(e.to_string()),
            DbError::Sqlite(rusqlite::Error::SqliteFailure(code, message))
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Rejected(message.unwrap_or_else(|| code.to_string()))
            }
            DbError::Sqlite(e) => StoreError::Unavailable(e.to_string()),
        }
    }
}

/// Server-side home of care records.
#[async_trait]
pub trait RemoteRecordStore: Send + Sync {
    /// Records matching a filter.
    async fn list(&self, filter: &RecordFilter) -> StoreResult<Vec<Record>>;

    /// Residents in scope of a filter, in display order.
    async fn list_residents(&self, filter: &RecordFilter) -> StoreResult<Vec<Resident>>;

    /// Persist a new record; the store assigns id and timestamps.
    async fn create(&self, record: &Record) -> StoreResult<Record>;

    /// Apply a partial update to a persisted record.
    async fn update(&self, id: &str, patch: &RecordPatch) -> StoreResult<Record>;

    /// Remove a persisted record.
    async fn delete(&self, id: &str) -> StoreResult<()>;
}

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Surfaces messages to the user. Fire-and-forget.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str, severity: Severity);
}

/// Sink that forwards notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => tracing::info!(target: "carelog_core::notify", "{}", message),
            Severity::Warning => tracing::warn!(target: "carelog_core::notify", "{}", message),
            Severity::Error => tracing::error!(target: "carelog_core::notify", "{}", message),
        }
    }
}
