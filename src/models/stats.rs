use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Season aggregate as returned by `scores/json/TeamSeasonStats/{season}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TeamSeasonStatsInput {
    #[serde(rename = "TeamID")]
    pub team_id: Option<i64>,
    #[serde(rename = "Season")]
    pub season: Option<i32>,
    #[serde(rename = "Games")]
    pub games: Option<i32>,
    #[serde(rename = "Wins")]
    pub wins: Option<i32>,
    #[serde(rename = "Losses")]
    pub losses: Option<i32>,
    #[serde(rename = "PointsPerGame")]
    pub points_per_game: Option<f64>,
    #[serde(rename = "TotalYardsPerGame")]
    pub yards_per_game: Option<f64>,
    #[serde(rename = "PassingYardsPerGame")]
    pub pass_yards_per_game: Option<f64>,
    #[serde(rename = "RushingYardsPerGame")]
    pub rush_yards_per_game: Option<f64>,
    #[serde(rename = "YardsPerPlay")]
    pub yards_per_play: Option<f64>,
    #[serde(rename = "PointsAllowedPerGame")]
    pub points_allowed_per_game: Option<f64>,
    #[serde(rename = "YardsAllowedPerGame")]
    pub yards_allowed_per_game: Option<f64>,
    #[serde(rename = "PassingYardsAllowedPerGame")]
    pub pass_yards_allowed_per_game: Option<f64>,
    #[serde(rename = "RushingYardsAllowedPerGame")]
    pub rush_yards_allowed_per_game: Option<f64>,
    #[serde(rename = "YardsPerPlayAllowed")]
    pub yards_per_play_allowed: Option<f64>,
    #[serde(rename = "ThirdDownConversionPercentage")]
    pub third_down_pct: Option<f64>,
    #[serde(rename = "RedZoneScoringPercentage")]
    pub red_zone_pct: Option<f64>,
    #[serde(rename = "Turnovers")]
    pub turnovers: Option<i32>,
    #[serde(rename = "Takeaways")]
    pub takeaways: Option<i32>,
    #[serde(rename = "TurnoverMargin")]
    pub turnover_margin: Option<i32>,
}

/// Per-season aggregates for one team, keyed on (team, season).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSeasonStats {
    pub team_upstream_id: i64,
    pub season: i32,
    pub games: Option<i32>,
    pub wins: Option<i32>,
    pub losses: Option<i32>,
    pub points_per_game: Option<f64>,
    pub yards_per_game: Option<f64>,
    pub pass_yards_per_game: Option<f64>,
    pub rush_yards_per_game: Option<f64>,
    pub yards_per_play: Option<f64>,
    pub points_allowed_per_game: Option<f64>,
    pub yards_allowed_per_game: Option<f64>,
    pub pass_yards_allowed_per_game: Option<f64>,
    pub rush_yards_allowed_per_game: Option<f64>,
    pub yards_per_play_allowed: Option<f64>,
    pub third_down_pct: Option<f64>,
    pub red_zone_pct: Option<f64>,
    pub turnovers: Option<i32>,
    pub takeaways: Option<i32>,
    pub turnover_margin: Option<i32>,
}

impl TryFrom<TeamSeasonStatsInput> for TeamSeasonStats {
    type Error = ValidationError;

    fn try_from(input: TeamSeasonStatsInput) -> Result<Self, Self::Error> {
        Ok(TeamSeasonStats {
            team_upstream_id: input
                .team_id
                .ok_or_else(|| ValidationError::missing("team season stats", "TeamID"))?,
            season: input
                .season
                .ok_or_else(|| ValidationError::missing("team season stats", "Season"))?,
            games: input.games,
            wins: input.wins,
            losses: input.losses,
            points_per_game: input.points_per_game,
            yards_per_game: input.yards_per_game,
            pass_yards_per_game: input.pass_yards_per_game,
            rush_yards_per_game: input.rush_yards_per_game,
            yards_per_play: input.yards_per_play,
            points_allowed_per_game: input.points_allowed_per_game,
            yards_allowed_per_game: input.yards_allowed_per_game,
            pass_yards_allowed_per_game: input.pass_yards_allowed_per_game,
            rush_yards_allowed_per_game: input.rush_yards_allowed_per_game,
            yards_per_play_allowed: input.yards_per_play_allowed,
            third_down_pct: input.third_down_pct,
            red_zone_pct: input.red_zone_pct,
            turnovers: input.turnovers,
            takeaways: input.takeaways,
            turnover_margin: input.turnover_margin,
        })
    }
}
