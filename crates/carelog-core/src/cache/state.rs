//! Synchronous half of the record cache.
//!
//! Every operation here runs to completion without suspending. The async
//! façade in the parent module calls `begin_*` before talking to the store
//! and `complete_*` with the store's answer; this module decides what the
//! user sees at each of those points.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};

use super::{CacheError, CacheResult};
use crate::config::CareLogConfig;
use crate::models::{
    CorrelationKey, FieldValue, Record, RecordField, RecordFilter, RecordId, RecordPatch,
    Resident, ValidationError,
};
use crate::store::{StoreError, StoreResult};

/// Copy of the visible set taken before an optimistic change.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    generation: u64,
    filter: Option<RecordFilter>,
    entries: Vec<Record>,
}

/// Server identity handed out for a correlation key.
#[derive(Debug, Clone)]
struct Promotion {
    id: String,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Promotion {
    fn apply(&self, record: &mut Record) {
        record.promote(self.id.clone(), self.created_at, self.updated_at);
    }
}

/// Bookkeeping for a create that has not come back yet.
#[derive(Debug, Default)]
struct PendingCreate {
    /// Fields written while the create was in flight
    queued: BTreeSet<RecordField>,
    /// State before the first queued write
    queued_snapshot: Option<Snapshot>,
    /// Set when the record was deleted while the create was in flight
    delete_snapshot: Option<Snapshot>,
}

/// A field write on a saved record the store has not answered yet.
#[derive(Debug, Clone)]
struct PendingWrite {
    ticket: u64,
    value: FieldValue,
    /// Value the store held before any unanswered write to this field
    confirmed: FieldValue,
}

#[derive(Debug)]
pub(crate) struct UpdatePlan {
    pub id: String,
    pub patch: RecordPatch,
    pub ticket: u64,
    pub snapshot: Snapshot,
}

#[derive(Debug)]
pub(crate) struct CreatePlan {
    pub key: CorrelationKey,
    pub record: Record,
    /// The write that triggered the create and the value it replaced
    pub field: RecordField,
    pub prior: FieldValue,
    pub snapshot: Snapshot,
}

#[derive(Debug)]
pub(crate) enum MutationPlan {
    /// Nothing to send
    LocalOnly,
    /// Folded into the create already in flight for this key
    Queued,
    Update(UpdatePlan),
    Create(CreatePlan),
}

#[derive(Debug)]
pub(crate) enum DeletePlan {
    LocalOnly,
    Queued,
    Remote { id: String, snapshot: Snapshot },
}

#[derive(Debug)]
pub(crate) enum IdentityStep {
    Unchanged,
    /// A saved record for the new resident was already in view
    Replaced(Option<UpdatePlan>),
    /// The store has to be asked whether the new resident has a record
    Lookup(RecordFilter),
}

#[derive(Debug)]
pub(crate) enum FollowUp {
    Update(UpdatePlan),
    Delete { id: String, snapshot: Snapshot },
}

#[derive(Debug)]
pub(crate) enum CreateOutcome {
    Promoted {
        id: String,
        follow_up: Option<FollowUp>,
    },
    RolledBack(StoreError),
}

/// Visible records for the active filter plus everything needed to
/// reconcile them with the store.
#[derive(Debug, Default)]
pub(crate) struct CacheState {
    filter: Option<RecordFilter>,
    /// Bumped by every filter application; stale responses carry an old value
    generation: u64,
    loading: bool,
    entries: Vec<Record>,
    /// Residents in scope of the last installed response, in display order
    residents: Vec<String>,
    /// Edited provisional drafts that are out of view, by slot
    stash: HashMap<CorrelationKey, Record>,
    creates: HashMap<CorrelationKey, PendingCreate>,
    promotions: HashMap<CorrelationKey, Promotion>,
    /// Unanswered field writes on saved records, by record id
    inflight: HashMap<String, BTreeMap<RecordField, PendingWrite>>,
    next_ticket: u64,
}

impl CacheState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(&self) -> Option<&RecordFilter> {
        self.filter.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn entries(&self) -> &[Record] {
        &self.entries
    }

    pub fn pending_creates(&self) -> usize {
        self.creates.len()
    }

    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.locate(id).map(|idx| &self.entries[idx])
    }

    /// Find an entry. A provisional id resolves through its correlation key,
    /// so it keeps working after the record has been promoted.
    fn locate(&self, id: &RecordId) -> Option<usize> {
        match id {
            RecordId::Persistent(_) => self.entries.iter().position(|r| &r.id == id),
            RecordId::Provisional(key) => self
                .entries
                .iter()
                .position(|r| &r.correlation_key() == key),
        }
    }

    fn require(&self, id: &RecordId) -> CacheResult<usize> {
        self.locate(id)
            .ok_or_else(|| CacheError::UnknownRecord(id.to_string()))
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            generation: self.generation,
            filter: self.filter.clone(),
            entries: self.entries.clone(),
        }
    }

    fn issue_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    /// A draft is kept out of view only if losing it would lose input.
    fn worth_keeping(&self, record: &Record) -> bool {
        record.has_local_edits() || self.creates.contains_key(&record.correlation_key())
    }

    fn stash_provisional(&mut self) {
        let drafts: Vec<Record> = self
            .entries
            .iter()
            .filter(|r| r.is_provisional() && self.worth_keeping(r))
            .cloned()
            .collect();
        for draft in drafts {
            self.stash.insert(draft.correlation_key(), draft);
        }
    }

    /// Another entry already showing `resident_id`.
    fn occupant(&self, resident_id: &str, except: usize) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .position(|(j, r)| j != except && r.resident_id == resident_id)
    }

    /// Take a placeholder out of view.
    fn shelve(&mut self, idx: usize) {
        let record = self.entries.remove(idx);
        if self.worth_keeping(&record) {
            self.stash.insert(record.correlation_key(), record);
        }
    }

    /// Give a resident in scope whose row moved away a placeholder again.
    fn refill(&mut self, resident_id: &str) {
        let Some(filter) = &self.filter else {
            return;
        };
        if !self.residents.iter().any(|r| r == resident_id)
            || self.entries.iter().any(|r| r.resident_id == resident_id)
        {
            return;
        }
        let key = filter.correlation_key(resident_id);
        let placeholder = self
            .stash
            .remove(&key)
            .unwrap_or_else(|| Record::provisional(filter, resident_id));
        self.entries.push(placeholder);
        self.sort_entries();
    }

    /// Residents out of scope go last.
    fn sort_entries(&mut self) {
        let order = &self.residents;
        self.entries.sort_by_key(|r| {
            order
                .iter()
                .position(|id| *id == r.resident_id)
                .unwrap_or(usize::MAX)
        });
    }

    // ---------------------------------------------------------------------
    // Filter
    // ---------------------------------------------------------------------

    /// Start applying a filter. Returns the generation the response must
    /// carry to be accepted.
    ///
    /// Re-applying the active filter keeps the current rows on screen until
    /// the response arrives; a different filter clears them.
    pub fn begin_filter(&mut self, filter: RecordFilter) -> u64 {
        self.generation += 1;
        self.loading = true;
        self.promotions.clear();
        if self.filter.as_ref() != Some(&filter) {
            self.stash_provisional();
            self.entries.clear();
            self.residents.clear();
            self.filter = Some(filter);
        }
        self.generation
    }

    /// Install a list response. Returns `None` if a newer filter application
    /// has started since `generation` was issued.
    pub fn commit_filter(
        &mut self,
        generation: u64,
        records: Vec<Record>,
        residents: Vec<Resident>,
    ) -> Option<Vec<Record>> {
        if generation != self.generation {
            tracing::debug!(
                generation,
                current = self.generation,
                "discarding superseded list response"
            );
            return None;
        }
        let filter = self.filter.clone()?;
        self.stash_provisional();

        // Records with an unanswered resident move sit in the slot they
        // are moving to.
        let mut saved: HashMap<String, Record> = HashMap::new();
        for record in records {
            let slot = self
                .pending_move(&record)
                .unwrap_or_else(|| record.resident_id.clone());
            if saved.contains_key(&slot) {
                tracing::warn!(
                    id = %record.id,
                    resident = %slot,
                    "store returned a second record for one slot, keeping the first"
                );
                continue;
            }
            saved.insert(slot, record);
        }

        let mut seen = HashSet::new();
        let mut order = Vec::with_capacity(residents.len());
        let mut entries = Vec::with_capacity(residents.len());
        for resident in &residents {
            if !seen.insert(resident.id.as_str()) {
                continue;
            }
            order.push(resident.id.clone());
            let key = filter.correlation_key(&resident.id);
            let draft = self.stash.remove(&key);
            let entry = match (saved.remove(&resident.id), draft) {
                // Our own create landed before its response did: the draft
                // holds the newest local values.
                (Some(record), Some(mut draft)) if self.creates.contains_key(&key) => {
                    draft.promote(
                        record.id.to_string(),
                        record.created_at,
                        record.updated_at,
                    );
                    draft
                }
                (Some(mut record), _) => {
                    self.overlay_inflight(&mut record);
                    record
                }
                (None, Some(draft)) => draft,
                (None, None) => Record::provisional(&filter, &resident.id),
            };
            entries.push(entry);
        }
        for record in saved.values() {
            tracing::debug!(
                id = %record.id,
                resident = %record.resident_id,
                "dropping record for a resident out of scope"
            );
        }

        self.entries = entries;
        self.residents = order;
        self.loading = false;
        Some(self.entries.clone())
    }

    /// Give up on a list request that failed.
    pub fn abort_filter(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.loading = false;
        true
    }

    fn pending_move(&self, record: &Record) -> Option<String> {
        let writes = self.inflight.get(record.id.persistent()?)?;
        writes
            .get(&RecordField::ResidentId)?
            .value
            .as_text()
            .map(str::to_string)
    }

    /// Re-apply field writes the store has not confirmed yet, so a fresh
    /// list response never shows an older value than the user typed.
    fn overlay_inflight(&self, record: &mut Record) {
        let Some(id) = record.id.persistent().map(str::to_string) else {
            return;
        };
        if let Some(writes) = self.inflight.get(&id) {
            for (field, write) in writes {
                if let Err(e) = record.set(*field, write.value.clone()) {
                    tracing::warn!(%id, %field, error = %e, "cannot overlay pending write");
                }
            }
        }
    }

    fn track_write(&mut self, id: &str, field: RecordField, value: FieldValue, ticket: u64, prior: FieldValue) {
        let writes = self.inflight.entry(id.to_string()).or_default();
        let confirmed = writes.get(&field).map_or(prior, |w| w.confirmed.clone());
        writes.insert(
            field,
            PendingWrite {
                ticket,
                value,
                confirmed,
            },
        );
    }

    // ---------------------------------------------------------------------
    // Field writes
    // ---------------------------------------------------------------------

    /// Apply a field write locally and decide what to send.
    pub fn begin_mutation(
        &mut self,
        id: &RecordId,
        field: RecordField,
        value: FieldValue,
        config: &CareLogConfig,
    ) -> CacheResult<MutationPlan> {
        let mut idx = self.require(id)?;
        let current = &self.entries[idx];
        let value = current.validate_field(field, &value)?;

        let rekeys = matches!(field, RecordField::ResidentId | RecordField::Timing);
        if rekeys && current.is_provisional() && self.creates.contains_key(&current.correlation_key())
        {
            return Err(CacheError::CreateInFlight(current.id.to_string()));
        }

        // Moving a row onto another resident: that resident's placeholder
        // gives way, a saved record does not. The resident left behind gets
        // a placeholder of their own.
        let mut displaced = None;
        let mut vacated = None;
        if let (RecordField::ResidentId, Some(resident)) = (field, value.as_text()) {
            if let Some(other) = self.occupant(resident, idx) {
                if !self.entries[other].is_provisional() {
                    return Err(CacheError::ResidentTaken(resident.to_string()));
                }
                displaced = Some(other);
            }
            if current.resident_id != resident {
                vacated = Some(current.resident_id.clone());
            }
        }
        let prior = current.get(field);

        let snapshot = self.snapshot();
        if let Some(other) = displaced {
            self.shelve(other);
            if other < idx {
                idx -= 1;
            }
        }
        self.entries[idx].set(field, value.clone())?;
        let record = self.entries[idx].clone();
        if let Some(resident) = vacated {
            self.refill(&resident);
        }

        match record.id.clone() {
            RecordId::Persistent(record_id) => {
                let ticket = self.issue_ticket();
                self.track_write(&record_id, field, value.clone(), ticket, prior);
                tracing::debug!(id = %record_id, %field, ticket, "sending field update");
                Ok(MutationPlan::Update(UpdatePlan {
                    id: record_id,
                    patch: RecordPatch::new().with(field, value),
                    ticket,
                    snapshot,
                }))
            }
            RecordId::Provisional(key) => {
                if let Some(pending) = self.creates.get_mut(&key) {
                    pending.queued.insert(field);
                    pending.queued_snapshot.get_or_insert(snapshot);
                    tracing::debug!(%key, %field, "create in flight, queueing field");
                    return Ok(MutationPlan::Queued);
                }
                if !config.materializes(field) {
                    return Ok(MutationPlan::LocalOnly);
                }
                self.creates.insert(key.clone(), PendingCreate::default());
                tracing::debug!(%key, %field, "materializing provisional record");
                Ok(MutationPlan::Create(CreatePlan {
                    key,
                    record,
                    field,
                    prior,
                    snapshot,
                }))
            }
        }
    }

    /// Restore a snapshot, keeping any server identity handed out since.
    ///
    /// Snapshots from an earlier filter generation are not restored; the
    /// caller undoes the refused change on the current rows instead.
    pub fn rollback(&mut self, snapshot: &Snapshot) -> bool {
        if snapshot.generation != self.generation {
            tracing::debug!(
                generation = snapshot.generation,
                current = self.generation,
                "view reloaded since the change, not restoring snapshot"
            );
            return false;
        }
        self.entries = snapshot.entries.clone();
        for record in self.entries.iter_mut().filter(|r| r.is_provisional()) {
            if let Some(promotion) = self.promotions.get(&record.correlation_key()) {
                promotion.apply(record);
            }
        }
        true
    }

    /// The store accepted `plan`: later writes to the same fields now start
    /// from its values.
    fn confirm_writes(&mut self, plan: &UpdatePlan) {
        if let Some(writes) = self.inflight.get_mut(&plan.id) {
            for (field, value) in &plan.patch.fields {
                match writes.get(field).map(|w| w.ticket) {
                    Some(ticket) if ticket == plan.ticket => {
                        writes.remove(field);
                    }
                    Some(_) => {
                        if let Some(write) = writes.get_mut(field) {
                            write.confirmed = value.clone();
                        }
                    }
                    None => {}
                }
            }
            if writes.is_empty() {
                self.inflight.remove(&plan.id);
            }
        }
    }

    fn drop_writes(&mut self, plan: &UpdatePlan) {
        if let Some(writes) = self.inflight.get_mut(&plan.id) {
            writes.retain(|_, write| write.ticket != plan.ticket);
            if writes.is_empty() {
                self.inflight.remove(&plan.id);
            }
        }
    }

    /// Put back the last confirmed value of every field `plan` wrote that
    /// has not been written again since.
    fn revert_refused(&mut self, plan: &UpdatePlan) {
        let Some(writes) = self.inflight.get(&plan.id) else {
            return;
        };
        let reverts: Vec<(RecordField, FieldValue)> = plan
            .patch
            .fields
            .keys()
            .filter_map(|field| {
                writes
                    .get(field)
                    .filter(|w| w.ticket == plan.ticket)
                    .map(|w| (*field, w.confirmed.clone()))
            })
            .collect();

        let id = RecordId::Persistent(plan.id.clone());
        for (field, value) in reverts {
            let Some(mut idx) = self.locate(&id) else {
                return;
            };
            let vacated = (field == RecordField::ResidentId)
                .then(|| self.entries[idx].resident_id.clone());
            if let (Some(_), Some(resident)) = (&vacated, value.as_text()) {
                if let Some(other) = self.occupant(resident, idx) {
                    if !self.entries[other].is_provisional() {
                        tracing::warn!(%id, %resident, "cannot move refused record back, slot holds a saved record");
                        continue;
                    }
                    self.shelve(other);
                    if other < idx {
                        idx -= 1;
                    }
                }
            }
            if let Err(e) = self.entries[idx].set(field, value) {
                tracing::warn!(%id, %field, error = %e, "cannot revert refused write");
                continue;
            }
            if let Some(resident) = vacated {
                self.refill(&resident);
            }
        }
    }

    /// Handle the store's answer to an update. A successful answer leaves
    /// local values untouched; a refusal undoes the write.
    pub fn complete_update<T>(&mut self, plan: &UpdatePlan, result: &StoreResult<T>) {
        match result {
            Ok(_) => self.confirm_writes(plan),
            Err(_) => {
                if !self.rollback(&plan.snapshot) {
                    self.revert_refused(plan);
                }
                self.drop_writes(plan);
            }
        }
    }

    /// Undo the write that triggered a refused create, unless the draft has
    /// been changed again since.
    fn revert_draft(&mut self, plan: &CreatePlan) {
        // Moving a draft back could collide with the slot's new placeholder.
        if plan.field == RecordField::ResidentId {
            return;
        }
        let written = plan.record.get(plan.field);
        let revert = |draft: &mut Record| {
            if draft.get(plan.field) != written {
                return;
            }
            if let Err(e) = draft.set(plan.field, plan.prior.clone()) {
                tracing::warn!(key = %plan.key, field = %plan.field, error = %e, "cannot revert refused write");
            }
        };
        if let Some(idx) = self
            .entries
            .iter()
            .position(|r| r.is_provisional() && r.correlation_key() == plan.key)
        {
            revert(&mut self.entries[idx]);
        } else if let Some(mut draft) = self.stash.remove(&plan.key) {
            revert(&mut draft);
            if self.worth_keeping(&draft) {
                self.stash.insert(draft.correlation_key(), draft);
            }
        }
    }

    /// Handle the store's answer to a create.
    pub fn complete_create(&mut self, plan: &CreatePlan, result: StoreResult<Record>) -> CreateOutcome {
        let pending = self.creates.remove(&plan.key).unwrap_or_default();

        let server = match result.and_then(|server| match server.id {
            RecordId::Persistent(id) => Ok((id, server.created_at, server.updated_at)),
            RecordId::Provisional(_) => Err(StoreError::Rejected(
                "store answered a create without an id".to_string(),
            )),
        }) {
            Ok(server) => server,
            Err(e) => {
                if !self.rollback(&plan.snapshot) {
                    self.revert_draft(plan);
                }
                return CreateOutcome::RolledBack(e);
            }
        };

        let (id, created_at, updated_at) = server;
        let promotion = Promotion {
            id: id.clone(),
            created_at,
            updated_at,
        };
        self.promotions.insert(plan.key.clone(), promotion.clone());

        let promoted = if let Some(idx) = self
            .entries
            .iter()
            .position(|r| r.is_provisional() && r.correlation_key() == plan.key)
        {
            promotion.apply(&mut self.entries[idx]);
            Some(self.entries[idx].clone())
        } else if let Some(mut draft) = self.stash.remove(&plan.key) {
            promotion.apply(&mut draft);
            Some(draft)
        } else {
            self.entries
                .iter()
                .find(|r| r.id.persistent() == Some(id.as_str()))
                .cloned()
        };
        tracing::debug!(key = %plan.key, %id, "provisional record promoted");

        if let Some(snapshot) = pending.delete_snapshot {
            return CreateOutcome::Promoted {
                id: id.clone(),
                follow_up: Some(FollowUp::Delete { id, snapshot }),
            };
        }

        let follow_up = match promoted {
            Some(record) if !pending.queued.is_empty() => {
                let ticket = self.issue_ticket();
                let patch = record.patch(pending.queued.iter().copied());
                for (field, value) in &patch.fields {
                    // The store holds what the create carried.
                    let sent = plan.record.get(*field);
                    self.track_write(&id, *field, value.clone(), ticket, sent);
                }
                Some(FollowUp::Update(UpdatePlan {
                    id: id.clone(),
                    patch,
                    ticket,
                    snapshot: pending
                        .queued_snapshot
                        .unwrap_or_else(|| plan.snapshot.clone()),
                }))
            }
            _ => None,
        };

        CreateOutcome::Promoted { id, follow_up }
    }

    // ---------------------------------------------------------------------
    // Deletes
    // ---------------------------------------------------------------------

    /// Remove a record from view and decide what to send.
    pub fn begin_delete(&mut self, id: &RecordId) -> CacheResult<DeletePlan> {
        let idx = self.require(id)?;
        let snapshot = self.snapshot();
        let record = self.entries.remove(idx);

        match record.id {
            RecordId::Provisional(key) => {
                self.stash.remove(&key);
                match self.creates.get_mut(&key) {
                    Some(pending) => {
                        pending.delete_snapshot.get_or_insert(snapshot);
                        Ok(DeletePlan::Queued)
                    }
                    None => Ok(DeletePlan::LocalOnly),
                }
            }
            RecordId::Persistent(record_id) => Ok(DeletePlan::Remote {
                id: record_id,
                snapshot,
            }),
        }
    }

    /// Handle the store's answer to a delete. Returns whether the active
    /// filter has to be reloaded to bring a refused delete's record back.
    pub fn complete_delete(&mut self, id: &str, snapshot: &Snapshot, result: &StoreResult<()>) -> bool {
        match result {
            Ok(()) => {
                self.inflight.remove(id);
                self.promotions.retain(|_, promotion| promotion.id != id);
                false
            }
            Err(_) => {
                if self.rollback(snapshot) {
                    return false;
                }
                snapshot.filter.is_some()
                    && snapshot.filter == self.filter
                    && self.locate(&RecordId::Persistent(id.to_string())).is_none()
            }
        }
    }

    // ---------------------------------------------------------------------
    // Identity changes
    // ---------------------------------------------------------------------

    /// Start re-pointing a row to another resident.
    pub fn begin_identity(&mut self, id: &RecordId, resident_id: &str) -> CacheResult<IdentityStep> {
        let filter = self.filter.clone().ok_or(CacheError::NoActiveFilter)?;
        let idx = self.require(id)?;
        let resident_id = resident_id.trim();
        if resident_id.is_empty() {
            return Err(ValidationError::Empty(RecordField::ResidentId).into());
        }

        let current = &self.entries[idx];
        if current.resident_id == resident_id {
            return Ok(IdentityStep::Unchanged);
        }
        if current.is_provisional() && self.creates.contains_key(&current.correlation_key()) {
            return Err(CacheError::CreateInFlight(current.id.to_string()));
        }

        let saved = self
            .entries
            .iter()
            .find(|r| !r.is_provisional() && r.resident_id == resident_id)
            .cloned();
        match saved {
            Some(record) => Ok(IdentityStep::Replaced(self.replace_identity(id, record)?)),
            None => Ok(IdentityStep::Lookup(filter.for_resident(resident_id))),
        }
    }

    /// Show an existing saved record in place of the row being re-pointed.
    ///
    /// Returns the update to send when the replaced row was itself saved.
    pub fn replace_identity(&mut self, id: &RecordId, record: Record) -> CacheResult<Option<UpdatePlan>> {
        let idx = self.require(id)?;
        let snapshot = self.snapshot();
        let resident_id = record.resident_id.clone();
        let replaced = std::mem::replace(&mut self.entries[idx], record);

        let mut position = 0;
        self.entries.retain(|r| {
            let keep = position == idx || r.resident_id != resident_id;
            position += 1;
            keep
        });
        if let Some(filter) = &self.filter {
            self.stash.remove(&filter.correlation_key(&resident_id));
        }
        self.refill(&replaced.resident_id);

        match replaced.id {
            RecordId::Persistent(record_id) => {
                let ticket = self.issue_ticket();
                Ok(Some(UpdatePlan {
                    id: record_id,
                    patch: RecordPatch::new().with(RecordField::ResidentId, resident_id),
                    ticket,
                    snapshot,
                }))
            }
            RecordId::Provisional(_) => Ok(None),
        }
    }
}
