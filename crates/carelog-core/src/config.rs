//! Runtime configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::WallClock;
use crate::models::RecordField;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("UTC offset out of range: {0} minutes")]
    InvalidOffset(i32),
}

/// Settings for the record cache and its backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CareLogConfig {
    /// Wall-clock offset from UTC, in minutes
    pub utc_offset_minutes: i32,
    /// Fields whose edit alone does not save a provisional record
    pub deferred_fields: Vec<RecordField>,
    /// SQLite database path (in-memory when unset)
    pub database_path: Option<PathBuf>,
    /// Default `tracing` filter directive
    pub log_filter: String,
}

impl Default for CareLogConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 9 * 60,
            deferred_fields: vec![RecordField::Notes, RecordField::ResidentId],
            database_path: None,
            log_filter: "carelog_core=info".to_string(),
        }
    }
}

impl CareLogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file, falling back to defaults if it does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        // Surface a bad offset at load time rather than on first use.
        config.clock()?;
        Ok(config)
    }

    /// Write as pretty JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn clock(&self) -> Result<WallClock, ConfigError> {
        WallClock::new(self.utc_offset_minutes)
    }

    /// Whether editing `field` on a provisional record should create it.
    pub fn materializes(&self, field: RecordField) -> bool {
        !self.deferred_fields.contains(&field)
    }

    pub fn with_utc_offset(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    pub fn with_deferred_fields(mut self, fields: Vec<RecordField>) -> Self {
        self.deferred_fields = fields;
        self
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CareLogConfig::default();
        assert_eq!(config.utc_offset_minutes, 540);
        assert!(!config.materializes(RecordField::Notes));
        assert!(config.materializes(RecordField::Result));
        assert_eq!(config.clock().unwrap(), WallClock::jst());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CareLogConfig::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, CareLogConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carelog.json");

        let config = CareLogConfig::new()
            .with_utc_offset(0)
            .with_deferred_fields(vec![])
            .with_database_path(dir.path().join("care.db"));
        config.save(&path).unwrap();

        let loaded = CareLogConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.materializes(RecordField::Notes));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carelog.json");
        fs::write(&path, r#"{"utc_offset_minutes": 60}"#).unwrap();

        let loaded = CareLogConfig::load(&path).unwrap();
        assert_eq!(loaded.utc_offset_minutes, 60);
        assert_eq!(loaded.log_filter, "carelog_core=info");
    }

    #[test]
    fn test_malformed_and_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carelog.json");

        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            CareLogConfig::load(&path),
            Err(ConfigError::Json(_))
        ));

        fs::write(&path, r#"{"utc_offset_minutes": 100000}"#).unwrap();
        assert!(matches!(
            CareLogConfig::load(&path),
            Err(ConfigError::InvalidOffset(100000))
        ));
    }
}
