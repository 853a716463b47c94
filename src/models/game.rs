use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{non_empty, parse_eastern_timestamp, parse_timestamp, ParseEnumError};
use crate::error::ValidationError;

/// Game record as returned by `scores/json/Games/{season}` and inside box scores.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GameInput {
    #[serde(rename = "GameID")]
    pub game_id: Option<i64>,
    #[serde(rename = "Season")]
    pub season: Option<i32>,
    #[serde(rename = "Week")]
    pub week: Option<i32>,
    #[serde(rename = "HomeTeam")]
    pub home_team: Option<String>,
    #[serde(rename = "AwayTeam")]
    pub away_team: Option<String>,
    #[serde(rename = "DateTimeUTC")]
    pub date_time_utc: Option<String>,
    #[serde(rename = "DateTime")]
    pub date_time: Option<String>,
    #[serde(rename = "StadiumID")]
    pub stadium_id: Option<i64>,
    #[serde(rename = "Status")]
    pub status: Option<String>,
    #[serde(rename = "Period")]
    pub period: Option<String>,
    #[serde(rename = "TimeRemaining")]
    pub time_remaining: Option<String>,
    #[serde(rename = "HomeScore")]
    pub home_score: Option<i32>,
    #[serde(rename = "AwayScore")]
    pub away_score: Option<i32>,
    #[serde(rename = "HomeScoreQuarter1")]
    pub home_score_q1: Option<i32>,
    #[serde(rename = "HomeScoreQuarter2")]
    pub home_score_q2: Option<i32>,
    #[serde(rename = "HomeScoreQuarter3")]
    pub home_score_q3: Option<i32>,
    #[serde(rename = "HomeScoreQuarter4")]
    pub home_score_q4: Option<i32>,
    #[serde(rename = "HomeScoreOvertime")]
    pub home_score_ot: Option<i32>,
    #[serde(rename = "AwayScoreQuarter1")]
    pub away_score_q1: Option<i32>,
    #[serde(rename = "AwayScoreQuarter2")]
    pub away_score_q2: Option<i32>,
    #[serde(rename = "AwayScoreQuarter3")]
    pub away_score_q3: Option<i32>,
    #[serde(rename = "AwayScoreQuarter4")]
    pub away_score_q4: Option<i32>,
    #[serde(rename = "AwayScoreOvertime")]
    pub away_score_ot: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Scheduled,
    InProgress,
    Final,
    Postponed,
    Canceled,
}

impl GameStatus {
    pub const ALL: [GameStatus; 5] = [
        GameStatus::Scheduled,
        GameStatus::InProgress,
        GameStatus::Final,
        GameStatus::Postponed,
        GameStatus::Canceled,
    ];

    /// Map a provider status string.
    pub fn from_provider(raw: &str) -> Result<Self, ValidationError> {
        let normalized = raw.trim().to_ascii_lowercase();
        let status = match normalized.as_str() {
            "scheduled" | "delayed" => GameStatus::Scheduled,
            "inprogress" | "in progress" | "suspended" => GameStatus::InProgress,
            "final" | "forfeit" => GameStatus::Final,
            "postponed" => GameStatus::Postponed,
            "canceled" | "cancelled" | "notnecessary" => GameStatus::Canceled,
            s if is_overtime_final(s) => GameStatus::Final,
            _ => return Err(ValidationError::UnknownStatus(raw.to_string())),
        };
        Ok(status)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::Scheduled => "scheduled",
            GameStatus::InProgress => "in_progress",
            GameStatus::Final => "final",
            GameStatus::Postponed => "postponed",
            GameStatus::Canceled => "canceled",
        }
    }

    /// Terminal games only accept score corrections.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GameStatus::Final | GameStatus::Postponed | GameStatus::Canceled
        )
    }
}

/// `f/ot`, `f/2ot`, `f/10ot`
fn is_overtime_final(s: &str) -> bool {
    s.strip_prefix("f/")
        .and_then(|rest| rest.strip_suffix("ot"))
        .map(|n| n.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GameStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("game status", s))
    }
}

/// Points scored in one period. Periods 1-4 are quarters, 5 and up overtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodScore {
    pub period: i16,
    pub home_points: Option<i32>,
    pub away_points: Option<i32>,
}

/// Validated provider game, before its team codes are resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct GameUpdate {
    pub upstream_id: i64,
    pub season: i32,
    pub week: i32,
    pub home_team_code: String,
    pub away_team_code: String,
    pub scheduled_at: DateTime<Utc>,
    pub stadium_upstream_id: Option<i64>,
    pub status: GameStatus,
    pub period: Option<String>,
    pub time_remaining: Option<String>,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub period_scores: Vec<PeriodScore>,
}

impl TryFrom<GameInput> for GameUpdate {
    type Error = ValidationError;

    fn try_from(input: GameInput) -> Result<Self, Self::Error> {
        let missing = |field| ValidationError::missing("game", field);

        let upstream_id = input.game_id.ok_or_else(|| missing("GameID"))?;
        let season = input.season.ok_or_else(|| missing("Season"))?;
        let week = input.week.ok_or_else(|| missing("Week"))?;
        let home_team_code = non_empty(input.home_team)
            .ok_or_else(|| missing("HomeTeam"))?
            .to_uppercase();
        let away_team_code = non_empty(input.away_team)
            .ok_or_else(|| missing("AwayTeam"))?
            .to_uppercase();
        let scheduled_at = match (non_empty(input.date_time_utc), non_empty(input.date_time)) {
            (Some(utc), _) => parse_timestamp(&utc)?,
            (None, Some(eastern)) => parse_eastern_timestamp(&eastern)?,
            (None, None) => return Err(missing("DateTimeUTC")),
        };
        let status = non_empty(input.status).ok_or_else(|| missing("Status"))?;
        let status = GameStatus::from_provider(&status)?;

        let quarters = [
            (1, input.home_score_q1, input.away_score_q1),
            (2, input.home_score_q2, input.away_score_q2),
            (3, input.home_score_q3, input.away_score_q3),
            (4, input.home_score_q4, input.away_score_q4),
            (5, input.home_score_ot, input.away_score_ot),
        ];
        let period_scores = quarters
            .into_iter()
            .filter(|(_, home, away)| home.is_some() || away.is_some())
            // Providers report 0/0 overtime for games that never went to overtime
            .filter(|(period, home, away)| {
                *period < 5 || home.unwrap_or(0) != 0 || away.unwrap_or(0) != 0
            })
            .map(|(period, home_points, away_points)| PeriodScore {
                period,
                home_points,
                away_points,
            })
            .collect();

        Ok(GameUpdate {
            upstream_id,
            season,
            week,
            home_team_code,
            away_team_code,
            scheduled_at,
            stadium_upstream_id: input.stadium_id,
            status,
            period: non_empty(input.period),
            time_remaining: non_empty(input.time_remaining),
            home_score: input.home_score,
            away_score: input.away_score,
            period_scores,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: Uuid,
    pub upstream_id: i64,
    pub season: i32,
    pub week: i32,
    pub home_team_id: Uuid,
    pub away_team_id: Uuid,
    pub home_team_code: String,
    pub away_team_code: String,
    pub scheduled_at: DateTime<Utc>,
    pub stadium_upstream_id: Option<i64>,
    pub status: GameStatus,
    pub period: Option<String>,
    pub time_remaining: Option<String>,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub period_scores: Vec<PeriodScore>,
}

impl Game {
    pub fn from_update(update: GameUpdate, home_team_id: Uuid, away_team_id: Uuid) -> Self {
        Game {
            id: Uuid::new_v4(),
            upstream_id: update.upstream_id,
            season: update.season,
            week: update.week,
            home_team_id,
            away_team_id,
            home_team_code: update.home_team_code,
            away_team_code: update.away_team_code,
            scheduled_at: update.scheduled_at,
            stadium_upstream_id: update.stadium_upstream_id,
            status: update.status,
            period: update.period,
            time_remaining: update.time_remaining,
            home_score: update.home_score,
            away_score: update.away_score,
            period_scores: update.period_scores,
        }
    }

    pub fn total_score(&self) -> Option<i32> {
        Some(self.home_score? + self.away_score?)
    }

    pub fn margin(&self) -> Option<i32> {
        Some(self.home_score? - self.away_score?)
    }

    /// Started and not yet settled: the set of games worth polling.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at < now && !self.status.is_terminal()
    }

    /// Row columns other than scores match.
    pub fn same_schedule(&self, other: &Game) -> bool {
        self.season == other.season
            && self.week == other.week
            && self.home_team_id == other.home_team_id
            && self.away_team_id == other.away_team_id
            && self.home_team_code == other.home_team_code
            && self.away_team_code == other.away_team_code
            && self.scheduled_at == other.scheduled_at
            && self.stadium_upstream_id == other.stadium_upstream_id
            && self.status == other.status
            && self.period == other.period
            && self.time_remaining == other.time_remaining
    }

    pub fn same_scores(&self, other: &Game) -> bool {
        self.home_score == other.home_score && self.away_score == other.away_score
    }
}
