//! Record store backed by the local SQLite database.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{RemoteRecordStore, StoreError, StoreResult};
use crate::config::CareLogConfig;
use crate::db::Database;
use crate::models::{Record, RecordFilter, RecordPatch, Resident};

/// [`RemoteRecordStore`] over a [`Database`].
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteRecordStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open the database named by the config, or an in-memory one.
    pub fn open(config: &CareLogConfig) -> StoreResult<Self> {
        Ok(Self::new(Database::from_config(config)?))
    }

    /// Register a resident.
    pub fn add_resident(&self, resident: &Resident) -> StoreResult<()> {
        self.lock()?.insert_resident(resident)?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("Lock poisoned: {}", e)))
    }
}

#[async_trait]
impl RemoteRecordStore for SqliteRecordStore {
    async fn list(&self, filter: &RecordFilter) -> StoreResult<Vec<Record>> {
        Ok(self.lock()?.list_records(filter)?)
    }

    async fn list_residents(&self, filter: &RecordFilter) -> StoreResult<Vec<Resident>> {
        let residents = self.lock()?.list_residents(&filter.floor)?;
        Ok(residents.into_iter().filter(|r| filter.admits(r)).collect())
    }

    async fn create(&self, record: &Record) -> StoreResult<Record> {
        let now = Utc::now();
        let mut created = record.clone();
        created.promote(uuid::Uuid::new_v4().to_string(), Some(now), Some(now));

        self.lock()?.insert_record(&created)?;
        tracing::debug!(id = %created.id, kind = %created.kind, "record created");
        Ok(created)
    }

    async fn update(&self, id: &str, patch: &RecordPatch) -> StoreResult<Record> {
        let db = self.lock()?;
        let mut record = db
            .get_record(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        patch
            .apply_to(&mut record)
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        record.updated_at = Some(Utc::now());

        db.update_record(&record)?;
        Ok(record)
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        if self.lock()?.delete_record(id)? {
            Ok(())
        } else {
            Err(StoreError::NotFound(id.to_string()))
        }
    }
}

