//! Normalize provider records and write them through the repository.
//!
//! Shared by the scheduler (initial sync, backfill, polling, nightly refresh)
//! and the webhook. Invalid or unresolvable records are skipped and logged;
//! nothing is fabricated to satisfy a foreign key.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, RepoError, Result};
use crate::line_movement::LineMovementDetector;
use crate::metrics::Metrics;
use crate::models::{
    BoxScoreInput, Game, GameInput, GameOddsInput, GameUpdate, OddsInput, OddsKey, OddsSnapshot,
    Stadium, StadiumInput, Team, TeamInput, TeamSeasonStats, TeamSeasonStatsInput, UpsertOutcome,
};
use crate::publisher::RedisPublisher;
use crate::repository::{RepoResult, Repository};

/// A single entity that could not be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    /// e.g. `game 14000`
    pub entity: String,
    pub stage: &'static str,
    pub error: String,
}

impl EntityFailure {
    pub fn new(entity: impl Into<String>, stage: &'static str, error: &Error) -> Self {
        Self {
            entity: entity.into(),
            stage,
            error: error.to_string(),
        }
    }
}

/// Counts for one batch of provider records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub received: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Invalid or unresolvable records
    pub skipped: usize,
    pub failures: Vec<EntityFailure>,
}

impl IngestSummary {
    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn changed(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn merge(&mut self, other: IngestSummary) {
        self.received += other.received;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }
}

/// Counts for one fetch-detect-write pass over a game's odds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OddsSummary {
    pub snapshots_written: usize,
    pub movements_detected: usize,
    pub skipped: usize,
}

impl OddsSummary {
    pub fn merge(&mut self, other: OddsSummary) {
        self.snapshots_written += other.snapshots_written;
        self.movements_detected += other.movements_detected;
        self.skipped += other.skipped;
    }
}

/// Team code -> surrogate key, cleared after each nightly refresh.
#[derive(Clone, Default)]
pub struct TeamCache {
    inner: Arc<RwLock<HashMap<String, Uuid>>>,
}

impl TeamCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Double-checked: concurrent misses for the same code hit the store once.
    pub async fn get_or_insert_with<F, Fut>(&self, code: &str, factory: F) -> RepoResult<Uuid>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = RepoResult<Uuid>>,
    {
        {
            let cache = self.inner.read().await;
            if let Some(&id) = cache.get(code) {
                return Ok(id);
            }
        }

        let mut cache = self.inner.write().await;
        if let Some(&id) = cache.get(code) {
            return Ok(id);
        }

        let id = factory().await?;
        cache.insert(code.to_string(), id);
        Ok(id)
    }

    pub async fn clear(&self) {
        let mut cache = self.inner.write().await;
        let evicted = cache.len();
        cache.clear();
        debug!(evicted, "Cleared team resolution cache");
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

pub struct Ingestor {
    repo: Arc<dyn Repository>,
    detector: LineMovementDetector,
    teams: TeamCache,
    publisher: Option<RedisPublisher>,
    metrics: Arc<Metrics>,
}

impl Ingestor {
    pub fn new(repo: Arc<dyn Repository>, metrics: Arc<Metrics>) -> Self {
        Self {
            repo,
            detector: LineMovementDetector::new(),
            teams: TeamCache::new(),
            publisher: None,
            metrics,
        }
    }

    pub fn with_publisher(mut self, publisher: RedisPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    pub fn team_cache(&self) -> &TeamCache {
        &self.teams
    }

    fn skip(&self, summary: &mut IngestSummary, record: &str, error: &Error) {
        Metrics::inc(&self.metrics.records_skipped);
        summary.skipped += 1;
        warn!(record, error = %error, "Skipping provider record");
    }

    fn fail(&self, summary: &mut IngestSummary, entity: String, error: Error) {
        Metrics::inc(&self.metrics.upsert_failures);
        warn!(entity = %entity, error = %error, "Write failed");
        summary.failures.push(EntityFailure::new(entity, "upsert", &error));
    }

    fn wrote(&self, summary: &mut IngestSummary, outcome: UpsertOutcome) {
        Metrics::inc(&self.metrics.upserts);
        summary.record(outcome);
    }

    pub async fn ingest_teams(&self, inputs: Vec<TeamInput>) -> IngestSummary {
        let mut summary = IngestSummary {
            received: inputs.len(),
            ..Default::default()
        };
        for input in inputs {
            let raw_id = input.team_id;
            let team = match Team::try_from(input) {
                Ok(team) => team,
                Err(e) => {
                    self.skip(&mut summary, &format!("team {raw_id:?}"), &e.into());
                    continue;
                }
            };
            match self.repo.upsert_team(&team).await {
                Ok(outcome) => self.wrote(&mut summary, outcome),
                Err(e) => self.fail(&mut summary, format!("team {}", team.code), e.into()),
            }
        }
        info!(
            received = summary.received,
            changed = summary.changed(),
            skipped = summary.skipped,
            failed = summary.failures.len(),
            "Ingested teams"
        );
        summary
    }

    pub async fn ingest_stadiums(&self, inputs: Vec<StadiumInput>) -> IngestSummary {
        let mut summary = IngestSummary {
            received: inputs.len(),
            ..Default::default()
        };
        for input in inputs {
            let raw_id = input.stadium_id;
            let stadium = match Stadium::try_from(input) {
                Ok(stadium) => stadium,
                Err(e) => {
                    self.skip(&mut summary, &format!("stadium {raw_id:?}"), &e.into());
                    continue;
                }
            };
            match self.repo.upsert_stadium(&stadium).await {
                Ok(outcome) => self.wrote(&mut summary, outcome),
                Err(e) => self.fail(
                    &mut summary,
                    format!("stadium {}", stadium.upstream_id),
                    e.into(),
                ),
            }
        }
        info!(
            received = summary.received,
            changed = summary.changed(),
            skipped = summary.skipped,
            "Ingested stadiums"
        );
        summary
    }

    pub async fn ingest_team_season_stats(
        &self,
        inputs: Vec<TeamSeasonStatsInput>,
    ) -> IngestSummary {
        let mut summary = IngestSummary {
            received: inputs.len(),
            ..Default::default()
        };
        for input in inputs {
            let raw_id = input.team_id;
            let stats = match TeamSeasonStats::try_from(input) {
                Ok(stats) => stats,
                Err(e) => {
                    self.skip(&mut summary, &format!("team stats {raw_id:?}"), &e.into());
                    continue;
                }
            };
            let entity = format!("team stats {}/{}", stats.team_upstream_id, stats.season);
            match self.repo.upsert_team_season_stats(&stats).await {
                Ok(outcome) => self.wrote(&mut summary, outcome),
                Err(e) if e.is_not_found() => self.skip(&mut summary, &entity, &e.into()),
                Err(e) => self.fail(&mut summary, entity, e.into()),
            }
        }
        info!(
            received = summary.received,
            changed = summary.changed(),
            skipped = summary.skipped,
            "Ingested team season stats"
        );
        summary
    }

    pub async fn ingest_games(&self, inputs: Vec<GameInput>) -> IngestSummary {
        let mut summary = IngestSummary {
            received: inputs.len(),
            ..Default::default()
        };
        for input in inputs {
            let raw_id = input.game_id;
            let update = match GameUpdate::try_from(input) {
                Ok(update) => update,
                Err(e) => {
                    self.skip(&mut summary, &format!("game {raw_id:?}"), &e.into());
                    continue;
                }
            };
            self.apply_game_update(update, &mut summary).await;
        }
        info!(
            received = summary.received,
            changed = summary.changed(),
            skipped = summary.skipped,
            failed = summary.failures.len(),
            "Ingested games"
        );
        summary
    }

    pub async fn ingest_box_scores(&self, inputs: Vec<BoxScoreInput>) -> IngestSummary {
        let mut summary = IngestSummary {
            received: inputs.len(),
            ..Default::default()
        };
        for input in inputs {
            let raw_id = input.game_id();
            match GameUpdate::try_from(input) {
                Ok(update) => self.apply_game_update(update, &mut summary).await,
                Err(e) => self.skip(&mut summary, &format!("box score {raw_id:?}"), &e.into()),
            }
        }
        summary
    }

    async fn apply_game_update(&self, update: GameUpdate, summary: &mut IngestSummary) {
        let entity = format!("game {}", update.upstream_id);
        match self.ingest_game(update).await {
            Ok(outcome) => self.wrote(summary, outcome),
            Err(Error::Repo(e)) if e.is_not_found() => self.skip(summary, &entity, &e.into()),
            Err(e) => self.fail(summary, entity, e),
        }
    }

    /// Resolve both team codes, then upsert the game with its period scores.
    ///
    /// `RepoError::NotFound` when either team is not stored yet.
    pub async fn ingest_game(&self, update: GameUpdate) -> Result<UpsertOutcome> {
        let home = self.resolve_team(&update.home_team_code).await?;
        let away = self.resolve_team(&update.away_team_code).await?;
        let game = Game::from_update(update, home, away);
        let outcome = self.repo.upsert_game(&game).await?;
        debug!(game = game.upstream_id, ?outcome, "Upserted game");
        Ok(outcome)
    }

    /// Box score for one game: scores and period breakdown.
    pub async fn ingest_box_score(&self, input: BoxScoreInput) -> Result<UpsertOutcome> {
        let update = GameUpdate::try_from(input)?;
        self.ingest_game(update).await
    }

    async fn resolve_team(&self, code: &str) -> RepoResult<Uuid> {
        let repo = &self.repo;
        self.teams
            .get_or_insert_with(code, || async move {
                repo.find_team_by_code(code).await.map(|t| t.id)
            })
            .await
    }

    /// Clears cached team resolutions; the next lookup per code hits the store.
    pub async fn clear_team_cache(&self) {
        self.teams.clear().await;
    }

    /// Fetch-detect-write for one game's odds.
    ///
    /// Inputs are reduced to one snapshot per key first: live lines win over
    /// pregame ones, otherwise the later entry wins. Each remaining snapshot is
    /// compared with the latest stored snapshot for its key, then written
    /// together with any detected movement.
    pub async fn ingest_odds(
        &self,
        game: &Game,
        inputs: Vec<OddsInput>,
        detect: bool,
    ) -> Result<OddsSummary> {
        let fetched_at = Utc::now();
        let mut summary = OddsSummary::default();
        let mut published = Vec::new();

        let mut current: Vec<(bool, OddsSnapshot)> = Vec::new();
        let mut positions: HashMap<OddsKey, usize> = HashMap::new();
        for input in inputs {
            let live = input.is_live();
            let snapshots = match input.into_snapshots(game.id, fetched_at) {
                Ok(snapshots) => snapshots,
                Err(e) => {
                    Metrics::inc(&self.metrics.records_skipped);
                    summary.skipped += 1;
                    debug!(game = game.upstream_id, error = %e, "Skipping odds record");
                    continue;
                }
            };
            for snapshot in snapshots {
                match positions.get(&snapshot.key()) {
                    Some(&i) if live || !current[i].0 => current[i] = (live, snapshot),
                    Some(_) => {}
                    None => {
                        positions.insert(snapshot.key(), current.len());
                        current.push((live, snapshot));
                    }
                }
            }
        }

        for (_, snapshot) in current {
            let movements = if detect {
                let previous = self.repo.latest_odds(&snapshot.key()).await?;
                self.detector
                    .detect(previous.as_ref(), &snapshot, Utc::now())
            } else {
                Vec::new()
            };

            self.repo.record_odds(&snapshot, &movements).await?;
            Metrics::inc(&self.metrics.odds_snapshots);
            summary.snapshots_written += 1;

            for movement in &movements {
                Metrics::inc(&self.metrics.line_movements);
                info!(
                    game = game.upstream_id,
                    sportsbook = movement.sportsbook_id,
                    market = %movement.market,
                    period = %movement.period,
                    direction = %movement.direction,
                    from = movement.previous_value,
                    to = movement.new_value,
                    magnitude = movement.magnitude,
                    "Line movement detected"
                );
            }
            summary.movements_detected += movements.len();
            published.extend(movements);
        }

        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.publish(&published).await {
                warn!(game = game.upstream_id, error = %e, "Failed to publish line movements");
            }
        }

        Ok(summary)
    }

    /// Odds keyed by the provider game id, as delivered by week-level feeds
    /// and webhooks. Unknown games are skipped.
    pub async fn ingest_game_odds(
        &self,
        input: GameOddsInput,
        detect: bool,
    ) -> Result<OddsSummary> {
        let Some(upstream_id) = input.game_id else {
            Metrics::inc(&self.metrics.records_skipped);
            return Ok(OddsSummary {
                skipped: 1,
                ..Default::default()
            });
        };

        let game = match self.repo.find_game_by_upstream_id(upstream_id).await {
            Ok(game) => game,
            Err(RepoError::NotFound { .. }) => {
                Metrics::inc(&self.metrics.records_skipped);
                debug!(game = upstream_id, "Odds for unknown game, skipping");
                return Ok(OddsSummary {
                    skipped: 1,
                    ..Default::default()
                });
            }
            Err(e) => return Err(e.into()),
        };

        self.ingest_odds(&game, input.into_odds(), detect).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn team_cache_hits_store_once() {
        let cache = TeamCache::new();
        let calls = AtomicUsize::new(0);
        let id = Uuid::new_v4();

        for _ in 0..3 {
            let got = cache
                .get_or_insert_with("ALA", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(id)
                })
                .await
                .unwrap();
            assert_eq!(got, id);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.clear().await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn team_cache_does_not_store_misses() {
        let cache = TeamCache::new();
        let err = cache
            .get_or_insert_with("NOPE", || async { Err(RepoError::not_found("team", "NOPE")) })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(cache.len().await, 0);
    }

    #[test]
    fn summaries_merge() {
        let mut a = IngestSummary {
            received: 2,
            inserted: 1,
            skipped: 1,
            ..Default::default()
        };
        a.merge(IngestSummary {
            received: 3,
            updated: 2,
            unchanged: 1,
            ..Default::default()
        });
        assert_eq!(a.received, 5);
        assert_eq!(a.changed(), 3);
        assert_eq!(a.unchanged, 1);
    }
}
