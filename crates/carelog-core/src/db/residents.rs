//! Resident database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbResult};
use crate::models::{Floor, Resident};

impl Database {
    /// Insert a new resident.
    pub fn insert_resident(&self, resident: &Resident) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO residents (id, name, floor, room, active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                resident.id,
                resident.name,
                resident.floor,
                resident.room,
                resident.active,
                resident.created_at,
                resident.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Update an existing resident.
    pub fn update_resident(&self, resident: &Resident) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE residents SET
                name = ?2,
                floor = ?3,
                room = ?4,
                active = ?5,
                updated_at = datetime('now')
            WHERE id = ?1
            "#,
            params![
                resident.id,
                resident.name,
                resident.floor,
                resident.room,
                resident.active,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a resident by ID.
    pub fn get_resident(&self, id: &str) -> DbResult<Option<Resident>> {
        self.conn
            .query_row(
                r#"
                SELECT id, name, floor, room, active, created_at, updated_at
                FROM residents
                WHERE id = ?
                "#,
                [id],
                resident_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List active residents on a floor, in room order.
    pub fn list_residents(&self, floor: &Floor) -> DbResult<Vec<Resident>> {
        let floor_name = match floor {
            Floor::All => None,
            Floor::Named(name) => Some(name.as_str()),
        };
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, name, floor, room, active, created_at, updated_at
            FROM residents
            WHERE active = 1 AND (?1 IS NULL OR floor = ?1)
            ORDER BY floor, room, name
            "#,
        )?;

        let rows = stmt.query_map(params![floor_name], resident_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Mark a resident as discharged. Their records are kept.
    pub fn deactivate_resident(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE residents SET active = 0, updated_at = datetime('now') WHERE id = ?",
            [id],
        )?;
        Ok(rows_affected > 0)
    }
}

fn resident_from_row(row: &Row<'_>) -> rusqlite::Result<Resident> {
    Ok(Resident {
        id: row.get(0)?,
        name: row.get(1)?,
        floor: row.get(2)?,
        room: row.get(3)?,
        active: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup_db();

        let resident = Resident::new("Suzuki Ichiro".into(), "2F".into()).with_room("203");
        db.insert_resident(&resident).unwrap();

        let retrieved = db.get_resident(&resident.id).unwrap().unwrap();
        assert_eq!(retrieved, resident);
        assert!(db.get_resident("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_resident() {
        let db = setup_db();

        let mut resident = Resident::new("Suzuki Ichiro".into(), "2F".into());
        db.insert_resident(&resident).unwrap();

        resident.floor = "3F".into();
        resident.room = Some("305".into());
        assert!(db.update_resident(&resident).unwrap());

        let retrieved = db.get_resident(&resident.id).unwrap().unwrap();
        assert_eq!(retrieved.floor, "3F");
        assert_eq!(retrieved.room.as_deref(), Some("305"));
    }

    #[test]
    fn test_list_by_floor() {
        let db = setup_db();

        let a = Resident::new("Aoki".into(), "1F".into()).with_room("102");
        let b = Resident::new("Baba".into(), "1F".into()).with_room("101");
        let c = Resident::new("Chiba".into(), "2F".into()).with_room("201");
        for resident in [&a, &b, &c] {
            db.insert_resident(resident).unwrap();
        }

        let first = db.list_residents(&Floor::Named("1F".into())).unwrap();
        let names: Vec<_> = first.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Baba", "Aoki"]);

        assert_eq!(db.list_residents(&Floor::All).unwrap().len(), 3);
    }

    #[test]
    fn test_deactivated_residents_hidden() {
        let db = setup_db();

        let resident = Resident::new("Aoki".into(), "1F".into());
        db.insert_resident(&resident).unwrap();
        assert!(db.deactivate_resident(&resident.id).unwrap());

        assert!(db.list_residents(&Floor::All).unwrap().is_empty());
        let retrieved = db.get_resident(&resident.id).unwrap().unwrap();
        assert!(!retrieved.active);
    }
}
