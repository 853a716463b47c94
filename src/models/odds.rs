use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{non_empty, parse_timestamp, ParseEnumError};
use crate::error::ValidationError;

/// Provider sportsbook groups used to filter odds requests.
pub const CONSENSUS_GROUP: &str = "G1000";
pub const MAJOR_US_GROUP: &str = "G1001";
pub const SHARP_GROUP: &str = "G1002";

/// One sportsbook's line for one game, as the provider sends it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OddsInput {
    #[serde(rename = "GameOddId")]
    pub game_odd_id: Option<i64>,
    #[serde(rename = "GameId")]
    pub game_id: Option<i64>,
    #[serde(rename = "SportsbookId")]
    pub sportsbook_id: Option<i64>,
    #[serde(rename = "Sportsbook")]
    pub sportsbook: Option<String>,
    #[serde(rename = "OddType")]
    pub odd_type: Option<String>,
    #[serde(rename = "Created")]
    pub created: Option<String>,
    #[serde(rename = "Updated")]
    pub updated: Option<String>,
    #[serde(rename = "HomePointSpread")]
    pub home_point_spread: Option<f64>,
    #[serde(rename = "AwayPointSpread")]
    pub away_point_spread: Option<f64>,
    #[serde(rename = "HomePointSpreadPayout")]
    pub home_point_spread_payout: Option<i32>,
    #[serde(rename = "AwayPointSpreadPayout")]
    pub away_point_spread_payout: Option<i32>,
    #[serde(rename = "OverUnder")]
    pub over_under: Option<f64>,
    #[serde(rename = "OverPayout")]
    pub over_payout: Option<i32>,
    #[serde(rename = "UnderPayout")]
    pub under_payout: Option<i32>,
    #[serde(rename = "HomeMoneyLine")]
    pub home_money_line: Option<i32>,
    #[serde(rename = "AwayMoneyLine")]
    pub away_money_line: Option<i32>,
    #[serde(rename = "HomeTeamTotal")]
    pub home_team_total: Option<f64>,
    #[serde(rename = "AwayTeamTotal")]
    pub away_team_total: Option<f64>,
}

/// Game-level odds envelope from `GameOddsByWeek` and `GameOddsLineMovement`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GameOddsInput {
    #[serde(rename = "GameId")]
    pub game_id: Option<i64>,
    #[serde(rename = "Season")]
    pub season: Option<i32>,
    #[serde(rename = "Week")]
    pub week: Option<i32>,
    #[serde(rename = "PregameOdds")]
    pub pregame_odds: Vec<OddsInput>,
    #[serde(rename = "LiveOdds")]
    pub live_odds: Vec<OddsInput>,
}

impl GameOddsInput {
    /// Pregame then live entries, in provider order.
    pub fn into_odds(self) -> Vec<OddsInput> {
        let mut odds = self.pregame_odds;
        odds.extend(self.live_odds);
        odds
    }
}

impl OddsInput {
    /// When the provider last touched this line.
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        self.updated
            .as_deref()
            .or(self.created.as_deref())
            .and_then(|raw| parse_timestamp(raw).ok())
    }

    /// In-play line rather than a pregame one.
    pub fn is_live(&self) -> bool {
        self.odd_type
            .as_deref()
            .is_some_and(|raw| normalize_odd_type(raw) == "live")
    }

    /// Split into one snapshot per market that carries values.
    pub fn into_snapshots(
        self,
        game_id: Uuid,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<OddsSnapshot>, ValidationError> {
        let sportsbook_id = self
            .sportsbook_id
            .ok_or_else(|| ValidationError::missing("odds", "SportsbookId"))?;
        let period = OddsPeriod::from_odd_type(self.odd_type.as_deref().unwrap_or(""))?;
        let sportsbook_name = non_empty(self.sportsbook);

        let base = OddsSnapshot {
            id: Uuid::nil(),
            game_id,
            sportsbook_id,
            sportsbook_name,
            market: Market::Spread,
            period,
            home_line: None,
            away_line: None,
            total_line: None,
            home_price: None,
            away_price: None,
            over_price: None,
            under_price: None,
            fetched_at,
        };

        let market_snapshot = |market: Market| OddsSnapshot {
            id: Uuid::new_v4(),
            market,
            ..base.clone()
        };

        let mut snapshots = Vec::with_capacity(4);
        if self.home_point_spread.is_some() || self.away_point_spread.is_some() {
            snapshots.push(OddsSnapshot {
                home_line: self.home_point_spread,
                away_line: self.away_point_spread,
                home_price: self.home_point_spread_payout,
                away_price: self.away_point_spread_payout,
                ..market_snapshot(Market::Spread)
            });
        }
        if self.over_under.is_some() {
            snapshots.push(OddsSnapshot {
                total_line: self.over_under,
                over_price: self.over_payout,
                under_price: self.under_payout,
                ..market_snapshot(Market::Total)
            });
        }
        if self.home_money_line.is_some() || self.away_money_line.is_some() {
            snapshots.push(OddsSnapshot {
                home_price: self.home_money_line,
                away_price: self.away_money_line,
                ..market_snapshot(Market::Moneyline)
            });
        }
        if self.home_team_total.is_some() || self.away_team_total.is_some() {
            snapshots.push(OddsSnapshot {
                home_line: self.home_team_total,
                away_line: self.away_team_total,
                ..market_snapshot(Market::TeamTotal)
            });
        }

        Ok(snapshots)
    }
}

/// Keep only the most recent entry per (sportsbook, odd type).
///
/// Line-movement feeds return every historical version of a line; only the
/// newest one is the current line. Entries without a timestamp lose to any
/// entry that has one; ties go to the later entry.
pub fn latest_per_book(odds: Vec<OddsInput>) -> Vec<OddsInput> {
    let mut latest: HashMap<(Option<i64>, String), (usize, OddsInput)> = HashMap::new();
    for (position, entry) in odds.into_iter().enumerate() {
        let key = (
            entry.sportsbook_id,
            entry
                .odd_type
                .as_deref()
                .map(normalize_odd_type)
                .unwrap_or_default(),
        );
        let replace = match latest.get(&key) {
            Some((_, current)) => entry.observed_at() >= current.observed_at(),
            None => true,
        };
        if replace {
            latest.insert(key, (position, entry));
        }
    }

    let mut kept: Vec<(usize, OddsInput)> = latest.into_values().collect();
    kept.sort_by_key(|(position, _)| *position);
    kept.into_iter().map(|(_, entry)| entry).collect()
}

fn normalize_odd_type(raw: &str) -> String {
    raw.to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    Spread,
    Total,
    Moneyline,
    TeamTotal,
}

impl Market {
    pub const ALL: [Market; 4] = [Market::Spread, Market::Total, Market::Moneyline, Market::TeamTotal];

    pub fn as_str(self) -> &'static str {
        match self {
            Market::Spread => "spread",
            Market::Total => "total",
            Market::Moneyline => "moneyline",
            Market::TeamTotal => "team_total",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OddsPeriod {
    FullGame,
    FirstHalf,
    SecondHalf,
    Q1,
    Q2,
    Q3,
    Q4,
}

impl OddsPeriod {
    pub const ALL: [OddsPeriod; 7] = [
        OddsPeriod::FullGame,
        OddsPeriod::FirstHalf,
        OddsPeriod::SecondHalf,
        OddsPeriod::Q1,
        OddsPeriod::Q2,
        OddsPeriod::Q3,
        OddsPeriod::Q4,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OddsPeriod::FullGame => "full_game",
            OddsPeriod::FirstHalf => "first_half",
            OddsPeriod::SecondHalf => "second_half",
            OddsPeriod::Q1 => "q1",
            OddsPeriod::Q2 => "q2",
            OddsPeriod::Q3 => "q3",
            OddsPeriod::Q4 => "q4",
        }
    }

    /// Map the provider's `OddType`.
    pub fn from_odd_type(raw: &str) -> Result<Self, ValidationError> {
        let period = match normalize_odd_type(raw).as_str() {
            "" | "pregame" | "game" | "live" | "full game" => OddsPeriod::FullGame,
            "1st half" | "first half" => OddsPeriod::FirstHalf,
            "2nd half" | "second half" => OddsPeriod::SecondHalf,
            "1st quarter" | "first quarter" => OddsPeriod::Q1,
            "2nd quarter" | "second quarter" => OddsPeriod::Q2,
            "3rd quarter" | "third quarter" => OddsPeriod::Q3,
            "4th quarter" | "fourth quarter" => OddsPeriod::Q4,
            _ => return Err(ValidationError::UnknownOddType(raw.to_string())),
        };
        Ok(period)
    }
}

macro_rules! text_enum {
    ($ty:ident, $kind:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $ty::ALL
                    .into_iter()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| ParseEnumError::new($kind, s))
            }
        }
    };
}

text_enum!(Market, "market");
text_enum!(OddsPeriod, "odds period");
text_enum!(TrackedLine, "tracked line");
text_enum!(MovementDirection, "movement direction");

/// Identity of a line across snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OddsKey {
    pub game_id: Uuid,
    pub sportsbook_id: i64,
    pub market: Market,
    pub period: OddsPeriod,
}

/// Append-only observation of one line at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsSnapshot {
    pub id: Uuid,
    pub game_id: Uuid,
    pub sportsbook_id: i64,
    pub sportsbook_name: Option<String>,
    pub market: Market,
    pub period: OddsPeriod,
    /// Home spread, or home team total for `team_total`
    pub home_line: Option<f64>,
    /// Away spread, or away team total for `team_total`
    pub away_line: Option<f64>,
    pub total_line: Option<f64>,
    pub home_price: Option<i32>,
    pub away_price: Option<i32>,
    pub over_price: Option<i32>,
    pub under_price: Option<i32>,
    pub fetched_at: DateTime<Utc>,
}

impl OddsSnapshot {
    pub fn key(&self) -> OddsKey {
        OddsKey {
            game_id: self.game_id,
            sportsbook_id: self.sportsbook_id,
            market: self.market,
            period: self.period,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedLine {
    Spread,
    Total,
}

impl TrackedLine {
    pub const ALL: [TrackedLine; 2] = [TrackedLine::Spread, TrackedLine::Total];

    pub fn market(self) -> Market {
        match self {
            TrackedLine::Spread => Market::Spread,
            TrackedLine::Total => Market::Total,
        }
    }

    /// The tracked value of a snapshot: home spread or game total.
    pub fn value(self, snapshot: &OddsSnapshot) -> Option<f64> {
        match self {
            TrackedLine::Spread => snapshot.home_line,
            TrackedLine::Total => snapshot.total_line,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrackedLine::Spread => "spread",
            TrackedLine::Total => "total",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementDirection {
    TowardHome,
    TowardAway,
    TotalUp,
    TotalDown,
}

impl MovementDirection {
    pub const ALL: [MovementDirection; 4] = [
        MovementDirection::TowardHome,
        MovementDirection::TowardAway,
        MovementDirection::TotalUp,
        MovementDirection::TotalDown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MovementDirection::TowardHome => "toward_home",
            MovementDirection::TowardAway => "toward_away",
            MovementDirection::TotalUp => "total_up",
            MovementDirection::TotalDown => "total_down",
        }
    }
}

/// A change in a tracked line between two consecutive snapshots of one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineMovement {
    pub id: Uuid,
    pub game_id: Uuid,
    pub sportsbook_id: i64,
    pub sportsbook_name: Option<String>,
    pub market: Market,
    pub period: OddsPeriod,
    pub tracked: TrackedLine,
    pub previous_value: f64,
    pub new_value: f64,
    pub direction: MovementDirection,
    pub magnitude: f64,
    pub detected_at: DateTime<Utc>,
    /// Snapshot whose arrival produced this movement
    pub snapshot_id: Uuid,
}
