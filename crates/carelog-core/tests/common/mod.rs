//! Scripted store and notifier shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use carelog_core::{
    CareLogConfig, NotificationSink, OptimisticRecordCache, Record, RecordFilter, RecordKind,
    RecordPatch, RemoteRecordStore, Resident, Severity, StoreError, StoreResult,
};

/// A request the cache sent to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ListResidents,
    List(RecordFilter),
    Create(Record),
    Update(String, RecordPatch),
    Delete(String),
}

#[derive(Default)]
struct FakeState {
    residents: Vec<Resident>,
    records: Vec<Record>,
    calls: Vec<Call>,
    failing: HashSet<&'static str>,
    next_id: u32,
}

/// In-memory store that records every call and fails on request.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<FakeState>,
}

impl FakeStore {
    pub fn with_residents(ids: &[&str]) -> Self {
        let store = Self::default();
        for id in ids {
            store.add_resident(id, "1F");
        }
        store
    }

    pub fn add_resident(&self, id: &str, floor: &str) {
        let mut resident = Resident::new(format!("Resident {}", id), floor.to_string());
        resident.id = id.to_string();
        self.state.lock().unwrap().residents.push(resident);
    }

    /// Seed a saved record and return it.
    pub fn seed(&self, filter: &RecordFilter, resident_id: &str, id: &str) -> Record {
        let mut record = Record::provisional(filter, resident_id);
        let now = Utc::now();
        record.promote(id.to_string(), Some(now), Some(now));
        self.state.lock().unwrap().records.push(record.clone());
        record
    }

    /// Make every subsequent call of `operation` fail.
    pub fn fail(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.remove(operation);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls other than list reads.
    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::List(_) | Call::ListResidents))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn records(&self) -> Vec<Record> {
        self.state.lock().unwrap().records.clone()
    }

    fn begin(&self, call: Call, operation: &'static str) -> StoreResult<std::sync::MutexGuard<'_, FakeState>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.failing.contains(operation) {
            return Err(StoreError::Unavailable(format!("{} failed", operation)));
        }
        Ok(state)
    }
}

#[async_trait]
impl RemoteRecordStore for FakeStore {
    async fn list(&self, filter: &RecordFilter) -> StoreResult<Vec<Record>> {
        let state = self.begin(Call::List(filter.clone()), "list")?;
        // Records only show for residents the store knows, on the selected floor.
        let on_floor = |resident_id: &str| {
            state
                .residents
                .iter()
                .any(|r| r.id == resident_id && filter.floor.admits(&r.floor))
        };
        Ok(state
            .records
            .iter()
            .filter(|r| {
                r.kind == filter.kind
                    && r.date == filter.date
                    && r.timing == filter.timing
                    && on_floor(&r.resident_id)
                    && filter
                        .resident_id
                        .as_ref()
                        .map_or(true, |id| &r.resident_id == id)
            })
            .cloned()
            .collect())
    }

    async fn list_residents(&self, filter: &RecordFilter) -> StoreResult<Vec<Resident>> {
        let state = self.begin(Call::ListResidents, "list_residents")?;
        Ok(state
            .residents
            .iter()
            .filter(|r| filter.admits(r))
            .cloned()
            .collect())
    }

    async fn create(&self, record: &Record) -> StoreResult<Record> {
        let mut state = self.begin(Call::Create(record.clone()), "create")?;
        state.next_id += 1;
        let mut created = record.clone();
        let now = Utc::now();
        created.promote(format!("rec-{}", state.next_id), Some(now), Some(now));
        state.records.push(created.clone());
        Ok(created)
    }

    async fn update(&self, id: &str, patch: &RecordPatch) -> StoreResult<Record> {
        let mut state = self.begin(Call::Update(id.to_string(), patch.clone()), "update")?;
        let record = state
            .records
            .iter_mut()
            .find(|r| r.id.persistent() == Some(id))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        patch
            .apply_to(record)
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        record.updated_at = Some(Utc::now());
        Ok(record.clone())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let mut state = self.begin(Call::Delete(id.to_string()), "delete")?;
        let before = state.records.len();
        state.records.retain(|r| r.id.persistent() != Some(id));
        if state.records.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

/// Notifier that keeps everything it is told.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, Severity)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, Severity)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn errors(&self) -> usize {
        self.messages()
            .iter()
            .filter(|(_, severity)| *severity == Severity::Error)
            .count()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, message: &str, severity: Severity) {
        self.messages
            .lock()
            .unwrap()
            .push((message.to_string(), severity));
    }
}

pub type TestCache = OptimisticRecordCache<FakeStore, RecordingNotifier>;

pub fn may_first() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

/// Morning medication round on 2024-05-01, all floors.
pub fn morning_round() -> RecordFilter {
    RecordFilter::new(RecordKind::Medication, may_first()).with_timing("朝後")
}

pub fn cache_over(store: FakeStore) -> (TestCache, Arc<FakeStore>, Arc<RecordingNotifier>) {
    let store = Arc::new(store);
    let notifier = Arc::new(RecordingNotifier::default());
    let cache = OptimisticRecordCache::new(
        Arc::clone(&store),
        Arc::clone(&notifier),
        CareLogConfig::default(),
    )
    .unwrap();
    (cache, store, notifier)
}
