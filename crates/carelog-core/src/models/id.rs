//! Record identity: server-assigned ids and client-side placeholders.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::record::RecordKind;

/// Prefix used when a provisional id has to be rendered as a plain string.
const PROVISIONAL_PREFIX: &str = "temp-";

/// Deterministic key naming the slot a record occupies under a filter.
///
/// Deriving the key twice from the same inputs yields the same key, which is
/// what lets a placeholder be matched against a record that arrives later.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive the key for a resident's slot on a given day and timing.
    pub fn derive(kind: RecordKind, resident_id: &str, date: NaiveDate, timing: Option<&str>) -> Self {
        Self(format!(
            "{}:{}:{}:{}",
            kind.as_str(),
            resident_id,
            date.format("%Y-%m-%d"),
            timing.unwrap_or("-")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a record in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RecordId {
    /// Assigned by the record store on creation
    Persistent(String),
    /// Client-only placeholder, not yet known to the store
    Provisional(CorrelationKey),
}

impl RecordId {
    /// Parse a rendered id, recognising the provisional `temp-` form.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(PROVISIONAL_PREFIX) {
            Some(key) => RecordId::Provisional(CorrelationKey::new(key)),
            None => RecordId::Persistent(raw.to_string()),
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, RecordId::Provisional(_))
    }

    /// Server id, if this record has been persisted.
    pub fn persistent(&self) -> Option<&str> {
        match self {
            RecordId::Persistent(id) => Some(id),
            RecordId::Provisional(_) => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Persistent(id) => f.write_str(id),
            RecordId::Provisional(key) => write!(f, "{}{}", PROVISIONAL_PREFIX, key),
        }
    }
}
