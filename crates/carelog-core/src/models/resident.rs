//! Resident models.

use serde::{Deserialize, Serialize};

/// A resident of the care home.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resident {
    /// UUID, generated on admission
    pub id: String,
    /// Display name
    pub name: String,
    /// Floor the resident lives on (e.g. "2F")
    pub floor: String,
    /// Room number
    pub room: Option<String>,
    /// Whether the resident is currently admitted
    pub active: bool,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
}

impl Resident {
    /// Create a new resident with required fields.
    pub fn new(name: String, floor: String) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            floor,
            room: None,
            active: true,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }
}
