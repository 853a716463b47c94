use serde::Deserialize;

use super::game::{GameInput, GameUpdate, PeriodScore};
use crate::error::ValidationError;

/// Box score envelope from `stats/json/BoxScore/{id}` and `BoxScoresByWeek`.
///
/// Only the game block and the period line are used; player and team
/// breakdowns are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BoxScoreInput {
    #[serde(rename = "Game")]
    pub game: Option<GameInput>,
    #[serde(rename = "Periods")]
    pub periods: Vec<PeriodInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PeriodInput {
    /// 1-4 for quarters, 5 and up for overtime periods
    #[serde(rename = "Number")]
    pub number: Option<i16>,
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "HomeScore")]
    pub home_score: Option<i32>,
    #[serde(rename = "AwayScore")]
    pub away_score: Option<i32>,
}

impl BoxScoreInput {
    /// Provider game id, when the game block is present.
    pub fn game_id(&self) -> Option<i64> {
        self.game.as_ref().and_then(|g| g.game_id)
    }
}

impl TryFrom<BoxScoreInput> for GameUpdate {
    type Error = ValidationError;

    fn try_from(input: BoxScoreInput) -> Result<Self, Self::Error> {
        let game = input
            .game
            .ok_or_else(|| ValidationError::missing("box score", "Game"))?;
        let mut update = GameUpdate::try_from(game)?;

        let periods: Vec<PeriodScore> = input
            .periods
            .into_iter()
            .filter_map(|p| {
                Some(PeriodScore {
                    period: p.number.filter(|n| *n > 0)?,
                    home_points: p.home_score,
                    away_points: p.away_score,
                })
            })
            .collect();
        // The period line is more granular than the quarter columns on the game block.
        if !periods.is_empty() {
            update.period_scores = periods;
        }
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GameStatus;

    #[test]
    fn period_line_overrides_quarter_columns() {
        let input: BoxScoreInput = serde_json::from_str(
            r#"{
                "Game": {"GameID": 9, "Season": 2024, "Week": 1, "HomeTeam": "OSU",
                         "AwayTeam": "MICH", "DateTimeUTC": "2024-11-30T17:00:00",
                         "Status": "InProgress", "HomeScore": 10, "AwayScore": 3,
                         "HomeScoreQuarter1": 10, "AwayScoreQuarter1": 3},
                "Periods": [
                    {"Number": 1, "Name": "1", "HomeScore": 7, "AwayScore": 3},
                    {"Number": 2, "Name": "2", "HomeScore": 3, "AwayScore": 0}
                ],
                "PlayerGames": []
            }"#,
        )
        .unwrap();
        assert_eq!(input.game_id(), Some(9));

        let update = GameUpdate::try_from(input).unwrap();
        assert_eq!(update.status, GameStatus::InProgress);
        assert_eq!(update.period_scores.len(), 2);
        assert_eq!(update.period_scores[0].home_points, Some(7));
    }

    #[test]
    fn missing_game_block() {
        let input: BoxScoreInput = serde_json::from_str(r#"{"Periods": []}"#).unwrap();
        assert!(matches!(
            GameUpdate::try_from(input),
            Err(ValidationError::MissingField { field: "Game", .. })
        ));
    }
}
