//! Query dimensions that decide which records are visible.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::id::CorrelationKey;
use super::record::RecordKind;
use super::resident::Resident;

/// Floor selector for a list view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Floor {
    /// Every floor
    All,
    /// One named floor (e.g. "2F")
    Named(String),
}

impl Floor {
    /// Check whether a resident's floor falls under this selector.
    pub fn admits(&self, floor: &str) -> bool {
        match self {
            Floor::All => true,
            Floor::Named(name) => name == floor,
        }
    }
}

/// The active query for one record list page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Which kind of record the page shows
    pub kind: RecordKind,
    /// Care date (local calendar day)
    pub date: NaiveDate,
    /// Time-of-day bucket (e.g. "朝後"); None for kinds without one
    pub timing: Option<String>,
    /// Floor selector
    pub floor: Floor,
    /// Restrict to a single resident
    pub resident_id: Option<String>,
}

impl RecordFilter {
    pub fn new(kind: RecordKind, date: NaiveDate) -> Self {
        Self {
            kind,
            date,
            timing: None,
            floor: Floor::All,
            resident_id: None,
        }
    }

    pub fn with_timing(mut self, timing: impl Into<String>) -> Self {
        self.timing = Some(timing.into());
        self
    }

    pub fn with_floor(mut self, floor: Floor) -> Self {
        self.floor = floor;
        self
    }

    /// Narrow this filter to a single resident, on whichever floor they
    /// live.
    pub fn for_resident(&self, resident_id: &str) -> Self {
        let mut narrowed = self.clone();
        narrowed.floor = Floor::All;
        narrowed.resident_id = Some(resident_id.to_string());
        narrowed
    }

    /// Key of the slot the given resident occupies under this filter.
    pub fn correlation_key(&self, resident_id: &str) -> CorrelationKey {
        CorrelationKey::derive(self.kind, resident_id, self.date, self.timing.as_deref())
    }

    /// Check whether a resident is in scope.
    pub fn admits(&self, resident: &Resident) -> bool {
        resident.active
            && self.floor.admits(&resident.floor)
            && self
                .resident_id
                .as_deref()
                .map_or(true, |id| id == resident.id)
    }
}
