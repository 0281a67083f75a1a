//! Wall-clock conversion.
//!
//! Records store UTC instants. Staff enter and read times on the care home's
//! wall clock, a fixed offset from UTC. All conversion between the two goes
//! through [`WallClock`].

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::config::ConfigError;

const WALL_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Converts between stored instants and local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClock {
    offset: FixedOffset,
}

impl WallClock {
    /// Create a clock `offset_minutes` east of UTC.
    pub fn new(offset_minutes: i32) -> Result<Self, ConfigError> {
        let offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigError::InvalidOffset(offset_minutes))?;
        Ok(Self { offset })
    }

    /// Japan Standard Time (+09:00).
    pub fn jst() -> Self {
        Self {
            offset: FixedOffset::east_opt(9 * 3600).expect("+09:00 is a valid offset"),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Wall-clock time to stored instant.
    pub fn to_instant(&self, wall: NaiveDateTime) -> DateTime<Utc> {
        // A fixed offset has no gaps or folds, so the mapping is unique.
        (wall - Duration::seconds(i64::from(self.offset.local_minus_utc()))).and_utc()
    }

    /// Stored instant to wall-clock time.
    pub fn to_wall(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        self.offset.from_utc_datetime(&instant.naive_utc()).naive_local()
    }

    /// Local calendar day an instant falls on.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        self.to_wall(instant).date()
    }

    /// Half-open instant range `[start, end)` covering a local day.
    pub fn day_bounds(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.to_instant(date.and_time(chrono::NaiveTime::MIN));
        (start, start + Duration::days(1))
    }

    /// Parse a wall-clock string as typed into a form.
    pub fn parse_wall(&self, raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        WALL_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|wall| self.to_instant(wall))
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::jst()
    }
}
