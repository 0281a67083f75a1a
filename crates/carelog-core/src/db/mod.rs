//! SQLite persistence for residents and care records.
//!
//! Queries live next to the table they touch (`residents.rs`,
//! `records.rs`) as methods on [`Database`].

mod records;
mod residents;
mod schema;

use std::path::Path;

use rusqlite::Connection;
use thiserror::Error;

use crate::config::CareLogConfig;
use schema::SCHEMA;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// One connection with the care log schema applied.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        tracing::debug!(path = %path.as_ref().display(), "opening care log database");
        Self::with_schema(Connection::open(path)?)
    }

    /// A throwaway database that lives as long as the value.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::with_schema(Connection::open_in_memory()?)
    }

    /// The database named by `database_path`, or an in-memory one when the
    /// config names none.
    pub fn from_config(config: &CareLogConfig) -> DbResult<Self> {
        match &config.database_path {
            Some(path) => Self::open(path),
            None => Self::open_in_memory(),
        }
    }

    fn with_schema(conn: Connection) -> DbResult<Self> {
        // Every statement is IF NOT EXISTS, so reopening is safe.
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }
}
