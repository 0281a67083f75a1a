//! SQLite schema definition.

/// Complete database schema for carelog.
pub(super) const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Residents
-- ============================================================================

CREATE TABLE IF NOT EXISTS residents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    floor TEXT NOT NULL,
    room TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_residents_floor ON residents(floor);

-- ============================================================================
-- Care Records (one row per logged observation, all kinds share the table)
-- ============================================================================

CREATE TABLE IF NOT EXISTS care_records (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN (
        'medication', 'weight', 'bathing', 'excretion',
        'vitals', 'meal', 'cleaning', 'communication'
    )),
    record_date TEXT NOT NULL,                   -- local care date, YYYY-MM-DD
    resident_id TEXT NOT NULL REFERENCES residents(id),
    recorded_at TEXT,                            -- RFC 3339, always UTC
    timing TEXT,
    value TEXT,
    result TEXT,
    notes TEXT,
    staff_id TEXT,
    confirmed_by TEXT,
    category TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_slot ON care_records(kind, record_date, timing);
CREATE INDEX IF NOT EXISTS idx_records_resident ON care_records(resident_id);
"#;
