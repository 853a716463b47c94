//! Provider record shapes and the canonical entities they map onto.
//!
//! Every provider shape (`*Input`) deserializes with all fields optional so a
//! single malformed record never fails a whole response; conversion into the
//! domain entity is where required fields are enforced.

pub mod box_score;
pub mod game;
pub mod odds;
pub mod stadium;
pub mod stats;
pub mod team;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ValidationError;

pub use box_score::{BoxScoreInput, PeriodInput};
pub use game::{Game, GameInput, GameStatus, GameUpdate, PeriodScore};
pub use odds::{
    GameOddsInput, LineMovement, Market, MovementDirection, OddsInput, OddsKey, OddsPeriod,
    OddsSnapshot, TrackedLine,
};
pub use stadium::{Stadium, StadiumInput};
pub use stats::{TeamSeasonStats, TeamSeasonStatsInput};
pub use team::{Team, TeamInput};

/// Outcome of an idempotent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Row existed and every mutable field already matched
    Unchanged,
}

impl UpsertOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }

    pub fn merge(self, other: UpsertOutcome) -> UpsertOutcome {
        match (self, other) {
            (UpsertOutcome::Inserted, _) | (_, UpsertOutcome::Inserted) => UpsertOutcome::Inserted,
            (UpsertOutcome::Updated, _) | (_, UpsertOutcome::Updated) => UpsertOutcome::Updated,
            _ => UpsertOutcome::Unchanged,
        }
    }
}

/// A stored text column held a value no enum variant matches.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Provider timestamps come as RFC 3339 or as offset-less ISO 8601.
/// Offset-less values are taken as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    parse_naive(raw).map(|naive| naive.and_utc())
}

/// Provider wall-clock times (`DateTime`) are US Eastern.
///
/// Daylight time runs from 02:00 on the second Sunday of March to 02:00 on
/// the first Sunday of November.
pub(crate) fn parse_eastern_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let local = parse_naive(raw)?;
    let offset_hours = if is_eastern_daylight_time(local) { 4 } else { 5 };
    Ok((local + Duration::hours(offset_hours)).and_utc())
}

fn is_eastern_daylight_time(local: NaiveDateTime) -> bool {
    let transition = |month, nth| {
        NaiveDate::from_weekday_of_month_opt(local.year(), month, Weekday::Sun, nth)
            .and_then(|day| day.and_hms_opt(2, 0, 0))
    };
    match (transition(3, 2), transition(11, 1)) {
        (Some(start), Some(end)) => local >= start && local < end,
        _ => false,
    }
}

fn parse_naive(raw: &str) -> Result<NaiveDateTime, ValidationError> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| ValidationError::InvalidTimestamp(raw.to_string()))
}

/// Empty provider strings carry no information.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
