//! Persistence.
//!
//! Every write is idempotent: upserts key on the provider's natural id and only
//! touch a row when some mutable field differs. Odds snapshots are
//! insert-only.

mod memory;
mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::RepoError;
use crate::models::{
    Game, LineMovement, OddsKey, OddsSnapshot, Stadium, Team, TeamSeasonStats, TrackedLine,
    UpsertOutcome,
};

pub type RepoResult<T> = std::result::Result<T, RepoError>;

#[async_trait]
pub trait Repository: Send + Sync {
    async fn upsert_team(&self, team: &Team) -> RepoResult<UpsertOutcome>;

    async fn upsert_stadium(&self, stadium: &Stadium) -> RepoResult<UpsertOutcome>;

    /// Game row and its period scores, atomically. Once the stored status is
    /// terminal only scores change.
    async fn upsert_game(&self, game: &Game) -> RepoResult<UpsertOutcome>;

    /// `RepoError::NotFound` when the team is not stored yet.
    async fn upsert_team_season_stats(&self, stats: &TeamSeasonStats)
        -> RepoResult<UpsertOutcome>;

    async fn insert_odds_snapshot(&self, snapshot: &OddsSnapshot) -> RepoResult<Uuid>;

    /// Snapshot plus the movements it produced, atomically.
    async fn record_odds(
        &self,
        snapshot: &OddsSnapshot,
        movements: &[LineMovement],
    ) -> RepoResult<Uuid>;

    /// Most recent snapshot for the key by `fetched_at`.
    async fn latest_odds(&self, key: &OddsKey) -> RepoResult<Option<OddsSnapshot>>;

    /// All snapshots for the key, oldest first.
    async fn odds_history(&self, key: &OddsKey) -> RepoResult<Vec<OddsSnapshot>>;

    async fn line_movements(&self, game_id: Uuid) -> RepoResult<Vec<LineMovement>>;

    /// Mean of the latest full-game value per listed sportsbook. `None` when
    /// none of them has quoted the line.
    async fn consensus_line(
        &self,
        game_id: Uuid,
        tracked: TrackedLine,
        sportsbook_ids: &[i64],
    ) -> RepoResult<Option<f64>>;

    async fn consensus_spread(
        &self,
        game_id: Uuid,
        sportsbook_ids: &[i64],
    ) -> RepoResult<Option<f64>> {
        self.consensus_line(game_id, TrackedLine::Spread, sportsbook_ids).await
    }

    async fn consensus_total(
        &self,
        game_id: Uuid,
        sportsbook_ids: &[i64],
    ) -> RepoResult<Option<f64>> {
        self.consensus_line(game_id, TrackedLine::Total, sportsbook_ids).await
    }

    async fn find_team_by_code(&self, code: &str) -> RepoResult<Team>;

    async fn find_team_by_upstream_id(&self, upstream_id: i64) -> RepoResult<Team>;

    async fn find_game_by_upstream_id(&self, upstream_id: i64) -> RepoResult<Game>;

    /// Games that have kicked off and are not settled.
    async fn active_games(&self, now: DateTime<Utc>) -> RepoResult<Vec<Game>>;

    async fn team_count(&self) -> RepoResult<i64>;

    async fn ping(&self) -> RepoResult<()>;
}
