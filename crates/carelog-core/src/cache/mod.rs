//! Optimistic record cache.
//!
//! What a record list page shows. Writes appear immediately and are
//! reconciled with the [`RemoteRecordStore`] afterwards:
//!
//! ```text
//!   user input ──► begin (sync) ──► visible set updated
//!                       │
//!                       ▼
//!                 store request ──► confirm ─────────► keep local values
//!                       │
//!                       └─────────► failure ─────────► restore snapshot + notify
//! ```
//!
//! A failure that arrives after the view was reloaded cannot restore the
//! old snapshot; the refused values are undone on the reloaded rows instead.
//!
//! Residents without a saved record under the active filter get a
//! provisional placeholder (`temp-<key>`). The first substantive write to a
//! placeholder creates the record; the placeholder is then promoted in place.
//!
//! Each operation performs its local change when called and returns a future
//! that performs the store round trip. Dropping that future without polling
//! it leaves the local change in place and sends nothing.

mod state;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::clock::WallClock;
use crate::config::{CareLogConfig, ConfigError};
use crate::models::{FieldValue, Record, RecordField, RecordFilter, RecordId, ValidationError};
use crate::store::{NotificationSink, RemoteRecordStore, Severity, StoreError};

use state::{
    CacheState, CreateOutcome, DeletePlan, FollowUp, IdentityStep, MutationPlan, Snapshot,
    UpdatePlan,
};

/// Errors reported synchronously, before anything changes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Invalid value: {0}")]
    Validation(#[from] ValidationError),

    #[error("Record not in view: {0}")]
    UnknownRecord(String),

    #[error("No filter has been applied")]
    NoActiveFilter,

    #[error("Resident {0} already has a saved record under this filter")]
    ResidentTaken(String),

    #[error("Record {0} is still being saved")]
    CreateInFlight(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// How a change ended up after talking to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// Applied locally; nothing needed sending
    LocalOnly,
    /// Folded into a create already in flight
    Queued,
    /// The store accepted the change
    Confirmed,
    /// A provisional record was created and now carries this id
    Promoted { id: String },
    /// The store refused; the view was restored and the user notified
    RolledBack { reason: StoreError },
    /// The view moved on before the change could be completed
    Superseded,
    /// A change made on the caller's behalf was refused locally
    Rejected(CacheError),
}

/// Result of applying a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// The response was installed; the new visible set
    Applied(Vec<Record>),
    /// A newer filter was applied while this one was loading
    Superseded,
    /// The store could not be reached; the user was notified
    Failed(StoreError),
}

/// Client-side cache of the records visible under one filter.
pub struct OptimisticRecordCache<S, N> {
    state: Arc<Mutex<CacheState>>,
    store: Arc<S>,
    notifier: Arc<N>,
    config: Arc<CareLogConfig>,
    clock: WallClock,
}

impl<S, N> Clone for OptimisticRecordCache<S, N> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            store: Arc::clone(&self.store),
            notifier: Arc::clone(&self.notifier),
            config: Arc::clone(&self.config),
            clock: self.clock,
        }
    }
}

impl<S, N> OptimisticRecordCache<S, N>
where
    S: RemoteRecordStore + 'static,
    N: NotificationSink + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: CareLogConfig) -> Result<Self, ConfigError> {
        let clock = config.clock()?;
        Ok(Self {
            state: Arc::new(Mutex::new(CacheState::new())),
            store,
            notifier,
            config: Arc::new(config),
            clock,
        })
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Every mutation leaves the state consistent, so a panic elsewhere
        // does not invalidate it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Visible records, in resident order.
    pub fn snapshot(&self) -> Vec<Record> {
        self.lock().entries().to_vec()
    }

    /// Look up a visible record. Provisional ids keep resolving after the
    /// record has been promoted.
    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.lock().get(id).cloned()
    }

    pub fn active_filter(&self) -> Option<RecordFilter> {
        self.lock().filter().cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().is_loading()
    }

    /// Number of provisional records currently being created.
    pub fn pending_creates(&self) -> usize {
        self.lock().pending_creates()
    }

    pub fn clock(&self) -> WallClock {
        self.clock
    }

    // =========================================================================
    // Filter
    // =========================================================================

    /// Make `filter` the active filter and load its records.
    ///
    /// Any response to an earlier call that arrives later is discarded.
    pub fn apply_filter(
        &self,
        filter: RecordFilter,
    ) -> impl Future<Output = FilterOutcome> + Send + 'static {
        let generation = self.lock().begin_filter(filter.clone());
        tracing::debug!(generation, kind = %filter.kind, date = %filter.date, "applying filter");
        let this = self.clone();
        async move { this.load(generation, filter).await }
    }

    async fn load(&self, generation: u64, filter: RecordFilter) -> FilterOutcome {
        let residents = match self.store.list_residents(&filter).await {
            Ok(residents) => residents,
            Err(e) => return self.fail_load(generation, e),
        };
        let records = match self.store.list(&filter).await {
            Ok(records) => records,
            Err(e) => return self.fail_load(generation, e),
        };

        let committed = self.lock().commit_filter(generation, records, residents);
        match committed {
            Some(visible) => FilterOutcome::Applied(visible),
            None => FilterOutcome::Superseded,
        }
    }

    fn fail_load(&self, generation: u64, error: StoreError) -> FilterOutcome {
        let current = self.lock().abort_filter(generation);
        if !current {
            return FilterOutcome::Superseded;
        }
        tracing::warn!(generation, error = %error, "failed to load records");
        self.notifier
            .notify(&format!("Could not load records: {}", error), Severity::Error);
        FilterOutcome::Failed(error)
    }

    async fn refresh(&self) {
        let filter = self.active_filter();
        if let Some(filter) = filter {
            self.apply_filter(filter).await;
        }
    }

    // =========================================================================
    // Field writes
    // =========================================================================

    /// Write one field. The new value is visible as soon as this returns;
    /// the returned future saves it.
    ///
    /// Saved records get a partial update. Provisional records are created
    /// with every value entered so far, unless `field` is one of the
    /// configured deferred fields.
    pub fn mutate_field(
        &self,
        id: &RecordId,
        field: RecordField,
        value: FieldValue,
    ) -> CacheResult<impl Future<Output = Reconciliation> + Send + 'static> {
        let plan = self.lock().begin_mutation(id, field, value, &self.config)?;
        let this = self.clone();
        Ok(async move { this.settle_mutation(plan).await })
    }

    /// Write a timestamp field from a wall-clock time.
    pub fn mutate_wall_time(
        &self,
        id: &RecordId,
        field: RecordField,
        wall: NaiveDateTime,
    ) -> CacheResult<impl Future<Output = Reconciliation> + Send + 'static> {
        let instant = self.clock.to_instant(wall);
        self.mutate_field(id, field, FieldValue::Timestamp(instant))
    }

    /// Write a timestamp field from wall-clock text such as
    /// `2024-05-01 08:30`.
    pub fn mutate_wall_text(
        &self,
        id: &RecordId,
        field: RecordField,
        text: &str,
    ) -> CacheResult<impl Future<Output = Reconciliation> + Send + 'static> {
        let instant = self
            .clock
            .parse_wall(text)
            .ok_or_else(|| ValidationError::NotATime {
                field,
                value: text.to_string(),
            })?;
        self.mutate_field(id, field, FieldValue::Timestamp(instant))
    }

    async fn settle_mutation(&self, plan: MutationPlan) -> Reconciliation {
        match plan {
            MutationPlan::LocalOnly => Reconciliation::LocalOnly,
            MutationPlan::Queued => Reconciliation::Queued,
            MutationPlan::Update(update) => self.send_update(update).await,
            MutationPlan::Create(create) => {
                let result = self.store.create(&create.record).await;
                let outcome = self.lock().complete_create(&create, result);
                match outcome {
                    CreateOutcome::Promoted { id, follow_up } => {
                        self.send_follow_up(id, follow_up).await
                    }
                    CreateOutcome::RolledBack(reason) => {
                        self.report_rollback("save", &create.record.id, &reason);
                        Reconciliation::RolledBack { reason }
                    }
                }
            }
        }
    }

    async fn send_update(&self, update: UpdatePlan) -> Reconciliation {
        let result = self.store.update(&update.id, &update.patch).await;
        self.lock().complete_update(&update, &result);
        match result {
            Ok(_) => {
                tracing::debug!(id = %update.id, "update confirmed");
                Reconciliation::Confirmed
            }
            Err(reason) => {
                self.report_rollback("update", &RecordId::Persistent(update.id), &reason);
                Reconciliation::RolledBack { reason }
            }
        }
    }

    async fn send_follow_up(&self, id: String, follow_up: Option<FollowUp>) -> Reconciliation {
        match follow_up {
            None => Reconciliation::Promoted { id },
            Some(FollowUp::Update(update)) => match self.send_update(update).await {
                Reconciliation::Confirmed => Reconciliation::Promoted { id },
                other => other,
            },
            Some(FollowUp::Delete { id, snapshot }) => self.send_delete(id, snapshot).await,
        }
    }

    // =========================================================================
    // Deletes
    // =========================================================================

    /// Remove a record from view. Provisional records never reach the store;
    /// saved records are deleted there and the view is reloaded afterwards.
    pub fn delete_record(
        &self,
        id: &RecordId,
    ) -> CacheResult<impl Future<Output = Reconciliation> + Send + 'static> {
        let plan = self.lock().begin_delete(id)?;
        let this = self.clone();
        Ok(async move {
            match plan {
                DeletePlan::LocalOnly => Reconciliation::LocalOnly,
                DeletePlan::Queued => Reconciliation::Queued,
                DeletePlan::Remote { id, snapshot } => this.send_delete(id, snapshot).await,
            }
        })
    }

    async fn send_delete(&self, id: String, snapshot: Snapshot) -> Reconciliation {
        let result = self.store.delete(&id).await;
        let reload = self.lock().complete_delete(&id, &snapshot, &result);
        match result {
            Ok(()) => {
                tracing::debug!(%id, "delete confirmed, reloading view");
                // The resident may now need a placeholder.
                self.refresh().await;
                Reconciliation::Confirmed
            }
            Err(reason) => {
                self.report_rollback("delete", &RecordId::Persistent(id), &reason);
                if reload {
                    self.refresh().await;
                }
                Reconciliation::RolledBack { reason }
            }
        }
    }

    // =========================================================================
    // Identity changes
    // =========================================================================

    /// Point a row at another resident.
    ///
    /// If that resident already has a saved record under the active filter,
    /// the row shows it instead; a saved row is additionally re-pointed in
    /// the store. Otherwise this is a plain `resident_id` write.
    pub fn change_identity(
        &self,
        id: &RecordId,
        resident_id: &str,
    ) -> CacheResult<impl Future<Output = Reconciliation> + Send + 'static> {
        let step = self.lock().begin_identity(id, resident_id)?;
        let this = self.clone();
        let id = id.clone();
        let resident_id = resident_id.trim().to_string();
        Ok(async move {
            match step {
                IdentityStep::Unchanged | IdentityStep::Replaced(None) => Reconciliation::LocalOnly,
                IdentityStep::Replaced(Some(update)) => this.send_update(update).await,
                IdentityStep::Lookup(filter) => this.lookup_identity(id, resident_id, filter).await,
            }
        })
    }

    async fn lookup_identity(&self, id: RecordId, resident_id: String, filter: RecordFilter) -> Reconciliation {
        let found = match self.store.list(&filter).await {
            Ok(records) => records.into_iter().next(),
            Err(reason) => {
                tracing::warn!(%id, error = %reason, "resident lookup failed");
                self.notifier.notify(
                    &format!("Could not change resident: {}", reason),
                    Severity::Error,
                );
                return Reconciliation::RolledBack { reason };
            }
        };

        match found {
            Some(record) => {
                let replaced = self.lock().replace_identity(&id, record);
                match replaced {
                    Ok(None) => Reconciliation::LocalOnly,
                    Ok(Some(update)) => self.send_update(update).await,
                    Err(_) => Reconciliation::Superseded,
                }
            }
            None => {
                let write = self.mutate_field(&id, RecordField::ResidentId, FieldValue::Text(resident_id));
                match write {
                    Ok(pending) => pending.await,
                    Err(CacheError::UnknownRecord(_)) => Reconciliation::Superseded,
                    Err(e) => {
                        self.notifier.notify(&e.to_string(), Severity::Warning);
                        Reconciliation::Rejected(e)
                    }
                }
            }
        }
    }

    fn report_rollback(&self, action: &str, id: &RecordId, reason: &StoreError) {
        tracing::warn!(%id, action, error = %reason, "store refused change, rolled back");
        self.notifier.notify(
            &format!("Could not {} record: {}", action, reason),
            Severity::Error,
        );
    }
}
