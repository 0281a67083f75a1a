//! Care records: one logged observation or action for a resident.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::filter::RecordFilter;
use super::id::{CorrelationKey, RecordId};

/// Field validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Empty(RecordField),

    #[error("{field} expects {expected}")]
    WrongType {
        field: RecordField,
        expected: &'static str,
    },

    #[error("{field} is not a valid measurement: {value}")]
    NotAMeasurement { field: RecordField, value: String },

    #[error("{field} is not a wall-clock time: {value}")]
    NotATime { field: RecordField, value: String },

    #[error("Unknown record kind: {0}")]
    UnknownKind(String),

    #[error("Unknown record field: {0}")]
    UnknownField(String),
}

/// Kind of care record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Medication,
    Weight,
    Bathing,
    Excretion,
    Vitals,
    Meal,
    Cleaning,
    Communication,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Medication => "medication",
            RecordKind::Weight => "weight",
            RecordKind::Bathing => "bathing",
            RecordKind::Excretion => "excretion",
            RecordKind::Vitals => "vitals",
            RecordKind::Meal => "meal",
            RecordKind::Cleaning => "cleaning",
            RecordKind::Communication => "communication",
        }
    }

    /// Kinds whose `value` field holds a number.
    pub fn is_measured(&self) -> bool {
        matches!(self, RecordKind::Weight | RecordKind::Vitals)
    }
}

impl FromStr for RecordKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "medication" => Ok(RecordKind::Medication),
            "weight" => Ok(RecordKind::Weight),
            "bathing" => Ok(RecordKind::Bathing),
            "excretion" => Ok(RecordKind::Excretion),
            "vitals" => Ok(RecordKind::Vitals),
            "meal" => Ok(RecordKind::Meal),
            "cleaning" => Ok(RecordKind::Cleaning),
            "communication" => Ok(RecordKind::Communication),
            _ => Err(ValidationError::UnknownKind(s.to_string())),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutable attribute of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    ResidentId,
    RecordedAt,
    Timing,
    Value,
    Result,
    Notes,
    StaffId,
    ConfirmedBy,
    Category,
}

impl RecordField {
    pub const ALL: [RecordField; 9] = [
        RecordField::ResidentId,
        RecordField::RecordedAt,
        RecordField::Timing,
        RecordField::Value,
        RecordField::Result,
        RecordField::Notes,
        RecordField::StaffId,
        RecordField::ConfirmedBy,
        RecordField::Category,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordField::ResidentId => "resident_id",
            RecordField::RecordedAt => "recorded_at",
            RecordField::Timing => "timing",
            RecordField::Value => "value",
            RecordField::Result => "result",
            RecordField::Notes => "notes",
            RecordField::StaffId => "staff_id",
            RecordField::ConfirmedBy => "confirmed_by",
            RecordField::Category => "category",
        }
    }
}

impl FromStr for RecordField {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownField(s.to_string()))
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value written to a record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Timestamp(DateTime<Utc>),
    Null,
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    fn from_text(value: &Option<String>) -> Self {
        value.clone().map_or(FieldValue::Null, FieldValue::Text)
    }
}

impl From<&str> for FieldValue {
    fn from(text: &str) -> Self {
        FieldValue::Text(text.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(text: String) -> Self {
        FieldValue::Text(text)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(instant: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(instant)
    }
}

/// Partial update: only the listed fields change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPatch {
    pub fields: BTreeMap<RecordField, FieldValue>,
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: RecordField, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field, value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, field: RecordField) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    /// Apply every field of the patch, stopping at the first invalid value.
    pub fn apply_to(&self, record: &mut Record) -> Result<(), ValidationError> {
        for (field, value) in &self.fields {
            record.set(*field, value.clone())?;
        }
        Ok(())
    }
}

/// A care record, real or provisional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Server id or provisional placeholder
    pub id: RecordId,
    /// Record kind
    pub kind: RecordKind,
    /// Care date the record belongs to
    pub date: NaiveDate,
    /// Owning resident
    pub resident_id: String,
    /// When the care was given (stored instant)
    pub recorded_at: Option<DateTime<Utc>>,
    /// Time-of-day bucket
    pub timing: Option<String>,
    /// Measurement (weight in kg, temperature, ...)
    pub value: Option<String>,
    /// Outcome marker (e.g. "○", "×")
    pub result: Option<String>,
    /// Free-form notes
    pub notes: Option<String>,
    /// Staff member who performed the care
    pub staff_id: Option<String>,
    /// Staff member who double-checked
    pub confirmed_by: Option<String>,
    /// Kind-specific category (e.g. bath type)
    pub category: Option<String>,
    /// Server creation timestamp
    pub created_at: Option<DateTime<Utc>>,
    /// Server update timestamp
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record {
    /// Create a blank placeholder for a resident's slot under a filter.
    pub fn provisional(filter: &RecordFilter, resident_id: &str) -> Self {
        Self {
            id: RecordId::Provisional(filter.correlation_key(resident_id)),
            kind: filter.kind,
            date: filter.date,
            resident_id: resident_id.to_string(),
            recorded_at: None,
            timing: filter.timing.clone(),
            value: None,
            result: None,
            notes: None,
            staff_id: None,
            confirmed_by: None,
            category: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.id.is_provisional()
    }

    /// Key of the slot this record occupies.
    pub fn correlation_key(&self) -> CorrelationKey {
        CorrelationKey::derive(
            self.kind,
            &self.resident_id,
            self.date,
            self.timing.as_deref(),
        )
    }

    /// Read a field.
    pub fn get(&self, field: RecordField) -> FieldValue {
        match field {
            RecordField::ResidentId => FieldValue::Text(self.resident_id.clone()),
            RecordField::RecordedAt => self
                .recorded_at
                .map_or(FieldValue::Null, FieldValue::Timestamp),
            RecordField::Timing => FieldValue::from_text(&self.timing),
            RecordField::Value => FieldValue::from_text(&self.value),
            RecordField::Result => FieldValue::from_text(&self.result),
            RecordField::Notes => FieldValue::from_text(&self.notes),
            RecordField::StaffId => FieldValue::from_text(&self.staff_id),
            RecordField::ConfirmedBy => FieldValue::from_text(&self.confirmed_by),
            RecordField::Category => FieldValue::from_text(&self.category),
        }
    }

    /// Check a value against a field of this record's kind, returning the
    /// value as it would be stored.
    pub fn validate_field(
        &self,
        field: RecordField,
        value: &FieldValue,
    ) -> Result<FieldValue, ValidationError> {
        match (field, value) {
            (RecordField::ResidentId, FieldValue::Text(text)) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Err(ValidationError::Empty(field));
                }
                Ok(FieldValue::Text(trimmed.to_string()))
            }
            (RecordField::ResidentId, _) => Err(ValidationError::Empty(field)),
            (RecordField::RecordedAt, FieldValue::Text(_)) => Err(ValidationError::WrongType {
                field,
                expected: "a timestamp",
            }),
            (RecordField::RecordedAt, other) => Ok(other.clone()),
            (_, FieldValue::Timestamp(_)) => Err(ValidationError::WrongType {
                field,
                expected: "text",
            }),
            (_, FieldValue::Null) => Ok(FieldValue::Null),
            (RecordField::Value, FieldValue::Text(text)) if self.kind.is_measured() => {
                let trimmed = text.trim();
                match trimmed.parse::<f64>() {
                    Ok(number) if number.is_finite() && number >= 0.0 => {
                        Ok(FieldValue::Text(trimmed.to_string()))
                    }
                    _ => Err(ValidationError::NotAMeasurement {
                        field,
                        value: text.clone(),
                    }),
                }
            }
            (_, FieldValue::Text(text)) => Ok(FieldValue::Text(text.trim().to_string())),
        }
    }

    /// Write a field after validating it.
    ///
    /// A provisional record's id follows its correlation key, so moving it
    /// to another resident or timing moves the placeholder with it.
    pub fn set(&mut self, field: RecordField, value: FieldValue) -> Result<(), ValidationError> {
        let value = self.validate_field(field, &value)?;
        let text = value.as_text().map(str::to_string);
        match field {
            RecordField::ResidentId => {
                if let Some(text) = text {
                    self.resident_id = text;
                }
            }
            RecordField::RecordedAt => {
                self.recorded_at = match value {
                    FieldValue::Timestamp(instant) => Some(instant),
                    _ => None,
                };
            }
            RecordField::Timing => self.timing = text,
            RecordField::Value => self.value = text,
            RecordField::Result => self.result = text,
            RecordField::Notes => self.notes = text,
            RecordField::StaffId => self.staff_id = text,
            RecordField::ConfirmedBy => self.confirmed_by = text,
            RecordField::Category => self.category = text,
        }
        if self.is_provisional() {
            self.id = RecordId::Provisional(self.correlation_key());
        }
        Ok(())
    }

    /// Collect the current values of the given fields.
    pub fn patch<I>(&self, fields: I) -> RecordPatch
    where
        I: IntoIterator<Item = RecordField>,
    {
        RecordPatch {
            fields: fields
                .into_iter()
                .map(|field| (field, self.get(field)))
                .collect(),
        }
    }

    /// Every non-null field, as sent when a record is first created.
    pub fn filled_fields(&self) -> RecordPatch {
        RecordPatch {
            fields: RecordField::ALL
                .into_iter()
                .map(|field| (field, self.get(field)))
                .filter(|(_, value)| !value.is_null())
                .collect(),
        }
    }

    /// Whether anything beyond the slot itself (resident and timing) has
    /// been filled in.
    pub fn has_local_edits(&self) -> bool {
        RecordField::ALL
            .into_iter()
            .filter(|field| !matches!(field, RecordField::ResidentId | RecordField::Timing))
            .any(|field| !self.get(field).is_null())
    }

    /// Take on server identity while keeping every local field value.
    pub fn promote(
        &mut self,
        id: String,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    ) {
        self.id = RecordId::Persistent(id);
        self.created_at = created_at;
        self.updated_at = updated_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordFilter;

    fn weight_filter() -> RecordFilter {
        RecordFilter::new(
            RecordKind::Weight,
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        )
    }

    #[test]
    fn test_provisional_record() {
        let record = Record::provisional(&weight_filter(), "r1");
        assert!(record.is_provisional());
        assert_eq!(record.id.to_string(), "temp-weight:r1:2024-05-01:-");
        assert_eq!(record.correlation_key(), weight_filter().correlation_key("r1"));
        assert!(record.filled_fields().get(RecordField::Notes).is_none());
    }

    #[test]
    fn test_slot_fields_are_not_edits() {
        let filter = weight_filter().with_timing("朝");
        let mut record = Record::provisional(&filter, "r1");
        assert!(!record.has_local_edits());
        record.set(RecordField::ResidentId, "r2".into()).unwrap();
        assert!(!record.has_local_edits());
        record.set(RecordField::StaffId, "s-1".into()).unwrap();
        assert!(record.has_local_edits());
    }

    #[test]
    fn test_set_trims_text() {
        let mut record = Record::provisional(&weight_filter(), "r1");
        record.set(RecordField::Notes, "  ate well  ".into()).unwrap();
        assert_eq!(record.notes.as_deref(), Some("ate well"));
    }

    #[test]
    fn test_measured_value_validation() {
        let mut record = Record::provisional(&weight_filter(), "r1");
        assert!(record.set(RecordField::Value, "42.5".into()).is_ok());
        let err = record.set(RecordField::Value, "heavy".into()).unwrap_err();
        assert!(matches!(err, ValidationError::NotAMeasurement { .. }));
        assert_eq!(record.value.as_deref(), Some("42.5"));
        assert!(record.set(RecordField::Value, "-1".into()).is_err());
    }

    #[test]
    fn test_resident_id_cannot_be_cleared() {
        let mut record = Record::provisional(&weight_filter(), "r1");
        assert_eq!(
            record.set(RecordField::ResidentId, FieldValue::Null),
            Err(ValidationError::Empty(RecordField::ResidentId))
        );
        assert!(record.set(RecordField::ResidentId, "   ".into()).is_err());
    }

    #[test]
    fn test_type_mismatch() {
        let mut record = Record::provisional(&weight_filter(), "r1");
        assert!(record.set(RecordField::RecordedAt, "10:00".into()).is_err());
        assert!(record
            .set(RecordField::Notes, FieldValue::Timestamp(Utc::now()))
            .is_err());
    }

    #[test]
    fn test_provisional_id_follows_resident() {
        let mut record = Record::provisional(&weight_filter(), "r1");
        record.set(RecordField::ResidentId, "r2".into()).unwrap();
        assert_eq!(
            record.id,
            RecordId::Provisional(weight_filter().correlation_key("r2"))
        );
    }

    #[test]
    fn test_promote_keeps_fields() {
        let mut record = Record::provisional(&weight_filter(), "r1");
        record.set(RecordField::Value, "40".into()).unwrap();
        let now = Utc::now();
        record.promote("srv-1".into(), Some(now), Some(now));
        assert_eq!(record.id, RecordId::Persistent("srv-1".into()));
        assert_eq!(record.value.as_deref(), Some("40"));
        assert_eq!(record.created_at, Some(now));
    }

    #[test]
    fn test_patch_round_trip() {
        let mut record = Record::provisional(&weight_filter(), "r1");
        let patch = RecordPatch::new()
            .with(RecordField::Value, "51.2")
            .with(RecordField::StaffId, "staff-9");
        patch.apply_to(&mut record).unwrap();
        assert_eq!(record.patch([RecordField::Value, RecordField::StaffId]), patch);
    }

    #[test]
    fn test_field_names_parse() {
        for field in RecordField::ALL {
            assert_eq!(field.as_str().parse::<RecordField>().unwrap(), field);
        }
        assert!("bogus".parse::<RecordField>().is_err());
        assert_eq!("vitals".parse::<RecordKind>().unwrap(), RecordKind::Vitals);
    }
}
