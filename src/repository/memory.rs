use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RepoResult, Repository};
use crate::error::RepoError;
use crate::models::{
    Game, LineMovement, OddsKey, OddsPeriod, OddsSnapshot, PeriodScore, Stadium, Team,
    TeamSeasonStats, TrackedLine, UpsertOutcome,
};

#[derive(Default)]
struct State {
    teams: HashMap<i64, Team>,
    stadiums: HashMap<i64, Stadium>,
    games: HashMap<i64, Game>,
    stats: HashMap<(i64, i32), TeamSeasonStats>,
    /// Insertion order doubles as the tie-breaker for equal `fetched_at`.
    odds: Vec<OddsSnapshot>,
    movements: Vec<LineMovement>,
}

/// In-process store with the same write semantics as [`super::PgRepository`].
///
/// Backs dry runs (`STORE=memory`) and the test-suite.
#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn game_count(&self) -> usize {
        self.state.read().await.games.len()
    }

    pub async fn odds_count(&self) -> usize {
        self.state.read().await.odds.len()
    }

    pub async fn stadium(&self, upstream_id: i64) -> Option<Stadium> {
        self.state.read().await.stadiums.get(&upstream_id).cloned()
    }

    pub async fn team_season_stats(
        &self,
        team_upstream_id: i64,
        season: i32,
    ) -> Option<TeamSeasonStats> {
        self.state
            .read()
            .await
            .stats
            .get(&(team_upstream_id, season))
            .cloned()
    }
}

/// Upsert each period score; returns whether any changed.
fn merge_period_scores(stored: &mut Vec<PeriodScore>, incoming: &[PeriodScore]) -> bool {
    let mut changed = false;
    for score in incoming {
        match stored.iter_mut().find(|s| s.period == score.period) {
            Some(existing) if existing == score => {}
            Some(existing) => {
                *existing = *score;
                changed = true;
            }
            None => {
                stored.push(*score);
                changed = true;
            }
        }
    }
    stored.sort_by_key(|s| s.period);
    changed
}

fn matches_key(snapshot: &OddsSnapshot, key: &OddsKey) -> bool {
    snapshot.key() == *key
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn upsert_team(&self, team: &Team) -> RepoResult<UpsertOutcome> {
        let mut state = self.state.write().await;
        if let Some(other) = state
            .teams
            .values()
            .find(|t| t.code == team.code && t.upstream_id != team.upstream_id)
        {
            return Err(RepoError::constraint(
                "team",
                format!("code {} already belongs to team {}", team.code, other.upstream_id),
            ));
        }
        match state.teams.get_mut(&team.upstream_id) {
            Some(existing) if existing.same_attributes(team) => Ok(UpsertOutcome::Unchanged),
            Some(existing) => {
                *existing = Team {
                    id: existing.id,
                    ..team.clone()
                };
                Ok(UpsertOutcome::Updated)
            }
            None => {
                state.teams.insert(team.upstream_id, team.clone());
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn upsert_stadium(&self, stadium: &Stadium) -> RepoResult<UpsertOutcome> {
        let mut state = self.state.write().await;
        match state.stadiums.get_mut(&stadium.upstream_id) {
            Some(existing) if existing.same_attributes(stadium) => Ok(UpsertOutcome::Unchanged),
            Some(existing) => {
                *existing = Stadium {
                    id: existing.id,
                    ..stadium.clone()
                };
                Ok(UpsertOutcome::Updated)
            }
            None => {
                state.stadiums.insert(stadium.upstream_id, stadium.clone());
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn upsert_game(&self, game: &Game) -> RepoResult<UpsertOutcome> {
        let mut state = self.state.write().await;

        for team_id in [game.home_team_id, game.away_team_id] {
            if !state.teams.values().any(|t| t.id == team_id) {
                return Err(RepoError::constraint("game", format!("unknown team {team_id}")));
            }
        }

        let Some(existing) = state.games.get_mut(&game.upstream_id) else {
            let mut stored = game.clone();
            stored.period_scores.clear();
            merge_period_scores(&mut stored.period_scores, &game.period_scores);
            state.games.insert(game.upstream_id, stored);
            return Ok(UpsertOutcome::Inserted);
        };

        let mut changed = false;
        if existing.status.is_terminal() {
            if !existing.same_scores(game) {
                existing.home_score = game.home_score;
                existing.away_score = game.away_score;
                changed = true;
            }
        } else if !(existing.same_schedule(game) && existing.same_scores(game)) {
            *existing = Game {
                id: existing.id,
                period_scores: std::mem::take(&mut existing.period_scores),
                ..game.clone()
            };
            changed = true;
        }
        changed |= merge_period_scores(&mut existing.period_scores, &game.period_scores);

        Ok(if changed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Unchanged
        })
    }

    async fn upsert_team_season_stats(
        &self,
        stats: &TeamSeasonStats,
    ) -> RepoResult<UpsertOutcome> {
        let mut state = self.state.write().await;
        if !state.teams.contains_key(&stats.team_upstream_id) {
            return Err(RepoError::not_found("team", stats.team_upstream_id));
        }
        let key = (stats.team_upstream_id, stats.season);
        match state.stats.get_mut(&key) {
            Some(existing) if existing == stats => Ok(UpsertOutcome::Unchanged),
            Some(existing) => {
                *existing = stats.clone();
                Ok(UpsertOutcome::Updated)
            }
            None => {
                state.stats.insert(key, stats.clone());
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn insert_odds_snapshot(&self, snapshot: &OddsSnapshot) -> RepoResult<Uuid> {
        self.record_odds(snapshot, &[]).await
    }

    async fn record_odds(
        &self,
        snapshot: &OddsSnapshot,
        movements: &[LineMovement],
    ) -> RepoResult<Uuid> {
        let mut state = self.state.write().await;
        if !state.games.values().any(|g| g.id == snapshot.game_id) {
            return Err(RepoError::constraint(
                "odds",
                format!("unknown game {}", snapshot.game_id),
            ));
        }
        state.odds.push(snapshot.clone());
        state
            .movements
            .extend(movements.iter().cloned().map(|m| LineMovement {
                snapshot_id: snapshot.id,
                ..m
            }));
        Ok(snapshot.id)
    }

    async fn latest_odds(&self, key: &OddsKey) -> RepoResult<Option<OddsSnapshot>> {
        let state = self.state.read().await;
        // max_by_key keeps the last of equal maxima, matching insertion order
        Ok(state
            .odds
            .iter()
            .filter(|s| matches_key(s, key))
            .max_by_key(|s| s.fetched_at)
            .cloned())
    }

    async fn odds_history(&self, key: &OddsKey) -> RepoResult<Vec<OddsSnapshot>> {
        let state = self.state.read().await;
        let mut history: Vec<OddsSnapshot> = state
            .odds
            .iter()
            .filter(|s| matches_key(s, key))
            .cloned()
            .collect();
        history.sort_by_key(|s| s.fetched_at);
        Ok(history)
    }

    async fn line_movements(&self, game_id: Uuid) -> RepoResult<Vec<LineMovement>> {
        let state = self.state.read().await;
        let mut movements: Vec<LineMovement> = state
            .movements
            .iter()
            .filter(|m| m.game_id == game_id)
            .cloned()
            .collect();
        movements.sort_by_key(|m| m.detected_at);
        Ok(movements)
    }

    async fn consensus_line(
        &self,
        game_id: Uuid,
        tracked: TrackedLine,
        sportsbook_ids: &[i64],
    ) -> RepoResult<Option<f64>> {
        let state = self.state.read().await;
        let mut latest: HashMap<i64, &OddsSnapshot> = HashMap::new();
        for snapshot in state.odds.iter().filter(|s| {
            s.game_id == game_id
                && s.market == tracked.market()
                && s.period == OddsPeriod::FullGame
                && sportsbook_ids.contains(&s.sportsbook_id)
                && tracked.value(s).is_some()
        }) {
            match latest.get(&snapshot.sportsbook_id) {
                Some(current) if current.fetched_at > snapshot.fetched_at => {}
                _ => {
                    latest.insert(snapshot.sportsbook_id, snapshot);
                }
            }
        }

        let values: Vec<f64> = latest.values().filter_map(|s| tracked.value(s)).collect();
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(values.iter().sum::<f64>() / values.len() as f64))
    }

    async fn find_team_by_code(&self, code: &str) -> RepoResult<Team> {
        let code = code.to_uppercase();
        self.state
            .read()
            .await
            .teams
            .values()
            .find(|t| t.code == code)
            .cloned()
            .ok_or_else(|| RepoError::not_found("team", code))
    }

    async fn find_team_by_upstream_id(&self, upstream_id: i64) -> RepoResult<Team> {
        self.state
            .read()
            .await
            .teams
            .get(&upstream_id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("team", upstream_id))
    }

    async fn find_game_by_upstream_id(&self, upstream_id: i64) -> RepoResult<Game> {
        self.state
            .read()
            .await
            .games
            .get(&upstream_id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("game", upstream_id))
    }

    async fn active_games(&self, now: DateTime<Utc>) -> RepoResult<Vec<Game>> {
        let state = self.state.read().await;
        let mut games: Vec<Game> = state
            .games
            .values()
            .filter(|g| g.is_active(now))
            .cloned()
            .collect();
        games.sort_by_key(|g| (g.scheduled_at, g.upstream_id));
        Ok(games)
    }

    async fn team_count(&self) -> RepoResult<i64> {
        Ok(self.state.read().await.teams.len() as i64)
    }

    async fn ping(&self) -> RepoResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GameStatus;
    use chrono::TimeZone;

    fn team(upstream_id: i64, code: &str) -> Team {
        Team {
            id: Uuid::new_v4(),
            upstream_id,
            code: code.to_string(),
            school_name: format!("{code} University"),
            mascot: None,
            conference: Some("SEC".into()),
            division: None,
            talent_composite: None,
            city: None,
            state: None,
        }
    }

    #[test]
    fn period_merge_reports_changes() {
        let mut stored = vec![PeriodScore {
            period: 1,
            home_points: Some(7),
            away_points: Some(0),
        }];
        let same = stored.clone();
        assert!(!merge_period_scores(&mut stored, &same));

        let corrected = [PeriodScore {
            period: 1,
            home_points: Some(7),
            away_points: Some(3),
        }];
        assert!(merge_period_scores(&mut stored, &corrected));
        assert_eq!(stored[0].away_points, Some(3));
    }

    #[tokio::test]
    async fn team_update_keeps_surrogate_key() {
        let repo = MemoryRepository::new();
        let original = team(1, "ALA");
        repo.upsert_team(&original).await.unwrap();

        let mut renamed = team(1, "ALA");
        renamed.conference = Some("Big Ten".into());
        assert_eq!(
            repo.upsert_team(&renamed).await.unwrap(),
            UpsertOutcome::Updated
        );

        let stored = repo.find_team_by_upstream_id(1).await.unwrap();
        assert_eq!(stored.id, original.id);
        assert_eq!(stored.conference.as_deref(), Some("Big Ten"));
    }

    #[tokio::test]
    async fn game_requires_known_teams() {
        let repo = MemoryRepository::new();
        let game = Game {
            id: Uuid::new_v4(),
            upstream_id: 5,
            season: 2024,
            week: 1,
            home_team_id: Uuid::new_v4(),
            away_team_id: Uuid::new_v4(),
            home_team_code: "A".into(),
            away_team_code: "B".into(),
            scheduled_at: Utc.with_ymd_and_hms(2024, 8, 31, 16, 0, 0).unwrap(),
            stadium_upstream_id: None,
            status: GameStatus::Scheduled,
            period: None,
            time_remaining: None,
            home_score: None,
            away_score: None,
            period_scores: Vec::new(),
        };
        let err = repo.upsert_game(&game).await.unwrap_err();
        assert!(err.is_constraint(), "{err:?}");
    }
}
