//! Care record database operations.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{Floor, Record, RecordFilter, RecordId, RecordKind, ValidationError};

const RECORD_COLUMNS: &str = "c.id, c.kind, c.record_date, c.resident_id, c.recorded_at, \
     c.timing, c.value, c.result, c.notes, c.staff_id, c.confirmed_by, c.category, \
     c.created_at, c.updated_at";

impl Database {
    /// Insert a persisted record. Provisional records have no row.
    pub fn insert_record(&self, record: &Record) -> DbResult<()> {
        let id = persistent_id(record)?;
        let now = Utc::now();

        self.conn.execute(
            r#"
            INSERT INTO care_records (
                id, kind, record_date, resident_id, recorded_at, timing, value,
                result, notes, staff_id, confirmed_by, category, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                id,
                record.kind.as_str(),
                record.date.format("%Y-%m-%d").to_string(),
                record.resident_id,
                record.recorded_at.map(|t| t.to_rfc3339()),
                record.timing,
                record.value,
                record.result,
                record.notes,
                record.staff_id,
                record.confirmed_by,
                record.category,
                record.created_at.unwrap_or(now).to_rfc3339(),
                record.updated_at.unwrap_or(now).to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Overwrite every mutable column of a persisted record.
    pub fn update_record(&self, record: &Record) -> DbResult<bool> {
        let id = persistent_id(record)?;
        let updated_at = record.updated_at.unwrap_or_else(Utc::now);

        let rows_affected = self.conn.execute(
            r#"
            UPDATE care_records SET
                resident_id = ?2,
                recorded_at = ?3,
                timing = ?4,
                value = ?5,
                result = ?6,
                notes = ?7,
                staff_id = ?8,
                confirmed_by = ?9,
                category = ?10,
                updated_at = ?11
            WHERE id = ?1
            "#,
            params![
                id,
                record.resident_id,
                record.recorded_at.map(|t| t.to_rfc3339()),
                record.timing,
                record.value,
                record.result,
                record.notes,
                record.staff_id,
                record.confirmed_by,
                record.category,
                updated_at.to_rfc3339(),
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a record by ID.
    pub fn get_record(&self, id: &str) -> DbResult<Option<Record>> {
        let sql = format!("SELECT {} FROM care_records c WHERE c.id = ?", RECORD_COLUMNS);
        self.conn
            .query_row(&sql, [id], RecordRow::from_row)
            .optional()?
            .map(Record::try_from)
            .transpose()
    }

    /// List records matching a filter, in the same order residents are listed.
    ///
    /// Timing matches exactly: a filter without timing only sees records
    /// without timing.
    pub fn list_records(&self, filter: &RecordFilter) -> DbResult<Vec<Record>> {
        let floor_name = match &filter.floor {
            Floor::All => None,
            Floor::Named(name) => Some(name.as_str()),
        };
        let sql = format!(
            r#"
            SELECT {}
            FROM care_records c
            JOIN residents r ON r.id = c.resident_id
            WHERE c.kind = ?1
              AND c.record_date = ?2
              AND c.timing IS ?3
              AND (?4 IS NULL OR r.floor = ?4)
              AND (?5 IS NULL OR c.resident_id = ?5)
            ORDER BY r.floor, r.room, r.name, c.created_at
            "#,
            RECORD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let rows = stmt.query_map(
            params![
                filter.kind.as_str(),
                filter.date.format("%Y-%m-%d").to_string(),
                filter.timing,
                floor_name,
                filter.resident_id,
            ],
            RecordRow::from_row,
        )?;

        let mut records = Vec::new();
        for row in rows {
            records.push(Record::try_from(row?)?);
        }
        Ok(records)
    }

    /// Delete a record.
    pub fn delete_record(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM care_records WHERE id = ?", [id])?;
        Ok(rows_affected > 0)
    }
}

fn persistent_id(record: &Record) -> DbResult<&str> {
    record.id.persistent().ok_or_else(|| {
        DbError::Constraint(format!("provisional record {} cannot be stored", record.id))
    })
}

/// Intermediate row struct for database mapping.
struct RecordRow {
    id: String,
    kind: String,
    record_date: String,
    resident_id: String,
    recorded_at: Option<String>,
    timing: Option<String>,
    value: Option<String>,
    result: Option<String>,
    notes: Option<String>,
    staff_id: Option<String>,
    confirmed_by: Option<String>,
    category: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            record_date: row.get(2)?,
            resident_id: row.get(3)?,
            recorded_at: row.get(4)?,
            timing: row.get(5)?,
            value: row.get(6)?,
            result: row.get(7)?,
            notes: row.get(8)?,
            staff_id: row.get(9)?,
            confirmed_by: row.get(10)?,
            category: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}

impl TryFrom<RecordRow> for Record {
    type Error = DbError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse::<RecordKind>()
            .map_err(|e: ValidationError| DbError::Constraint(e.to_string()))?;

        Ok(Record {
            id: RecordId::Persistent(row.id),
            kind,
            date: NaiveDate::parse_from_str(&row.record_date, "%Y-%m-%d")?,
            resident_id: row.resident_id,
            recorded_at: row.recorded_at.as_deref().map(parse_instant).transpose()?,
            timing: row.timing,
            value: row.value,
            result: row.result,
            notes: row.notes,
            staff_id: row.staff_id,
            confirmed_by: row.confirmed_by,
            category: row.category,
            created_at: Some(parse_instant(&row.created_at)?),
            updated_at: Some(parse_instant(&row.updated_at)?),
        })
    }
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc))
}
