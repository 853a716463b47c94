use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{RepoResult, Repository};
use crate::error::RepoError;
use crate::models::{
    Game, GameStatus, LineMovement, OddsKey, OddsSnapshot, PeriodScore, Stadium, Team,
    TeamSeasonStats, TrackedLine, UpsertOutcome,
};

const GAME_COLUMNS: &str = "id, upstream_id, season, week, home_team_id, away_team_id, \
    home_team_code, away_team_code, scheduled_at, stadium_upstream_id, status, period, \
    time_remaining, home_score, away_score";

const TEAM_COLUMNS: &str = "id, upstream_id, code, school_name, mascot, conference, division, \
    talent_composite, city, state";

const ODDS_COLUMNS: &str = "id, game_id, sportsbook_id, sportsbook_name, market, period, \
    home_line, away_line, total_line, home_price, away_price, over_price, under_price, fetched_at";

/// PostgreSQL store
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Connect, retrying with exponential backoff (2s, 4s, 8s, ...).
    pub async fn connect_with_retry(
        url: &str,
        max_connections: u32,
        max_retries: u32,
    ) -> RepoResult<Self> {
        let mut attempt = 0;
        loop {
            match PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
            {
                Ok(pool) => {
                    info!("Connected to PostgreSQL");
                    return Ok(Self { pool });
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_retries {
                        return Err(RepoError::Database(e));
                    }
                    warn!(attempt, error = %e, "Database connection failed, retrying");
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> RepoResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn period_scores_for(&self, game_ids: &[Uuid]) -> RepoResult<HashMap<Uuid, Vec<PeriodScore>>> {
        let rows = sqlx::query(
            r#"
            SELECT game_id, period, home_points, away_points
            FROM game_period_scores
            WHERE game_id = ANY($1)
            ORDER BY game_id, period
            "#,
        )
        .bind(game_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_game: HashMap<Uuid, Vec<PeriodScore>> = HashMap::new();
        for row in rows {
            by_game
                .entry(row.try_get("game_id")?)
                .or_default()
                .push(PeriodScore {
                    period: row.try_get("period")?,
                    home_points: row.try_get("home_points")?,
                    away_points: row.try_get("away_points")?,
                });
        }
        Ok(by_game)
    }

    async fn games_with_periods(&self, rows: Vec<PgRow>) -> RepoResult<Vec<Game>> {
        let mut games = rows
            .iter()
            .map(game_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let ids: Vec<Uuid> = games.iter().map(|g| g.id).collect();
        let mut periods = self.period_scores_for(&ids).await?;
        for game in &mut games {
            game.period_scores = periods.remove(&game.id).unwrap_or_default();
        }
        Ok(games)
    }
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn team_from_row(row: &PgRow) -> Result<Team, sqlx::Error> {
    Ok(Team {
        id: row.try_get("id")?,
        upstream_id: row.try_get("upstream_id")?,
        code: row.try_get("code")?,
        school_name: row.try_get("school_name")?,
        mascot: row.try_get("mascot")?,
        conference: row.try_get("conference")?,
        division: row.try_get("division")?,
        talent_composite: row.try_get("talent_composite")?,
        city: row.try_get("city")?,
        state: row.try_get("state")?,
    })
}

fn game_from_row(row: &PgRow) -> Result<Game, sqlx::Error> {
    Ok(Game {
        id: row.try_get("id")?,
        upstream_id: row.try_get("upstream_id")?,
        season: row.try_get("season")?,
        week: row.try_get("week")?,
        home_team_id: row.try_get("home_team_id")?,
        away_team_id: row.try_get("away_team_id")?,
        home_team_code: row.try_get("home_team_code")?,
        away_team_code: row.try_get("away_team_code")?,
        scheduled_at: row.try_get("scheduled_at")?,
        stadium_upstream_id: row.try_get("stadium_upstream_id")?,
        status: parse_column(row, "status")?,
        period: row.try_get("period")?,
        time_remaining: row.try_get("time_remaining")?,
        home_score: row.try_get("home_score")?,
        away_score: row.try_get("away_score")?,
        period_scores: Vec::new(),
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<OddsSnapshot, sqlx::Error> {
    Ok(OddsSnapshot {
        id: row.try_get("id")?,
        game_id: row.try_get("game_id")?,
        sportsbook_id: row.try_get("sportsbook_id")?,
        sportsbook_name: row.try_get("sportsbook_name")?,
        market: parse_column(row, "market")?,
        period: parse_column(row, "period")?,
        home_line: row.try_get("home_line")?,
        away_line: row.try_get("away_line")?,
        total_line: row.try_get("total_line")?,
        home_price: row.try_get("home_price")?,
        away_price: row.try_get("away_price")?,
        over_price: row.try_get("over_price")?,
        under_price: row.try_get("under_price")?,
        fetched_at: row.try_get("fetched_at")?,
    })
}

fn movement_from_row(row: &PgRow) -> Result<LineMovement, sqlx::Error> {
    Ok(LineMovement {
        id: row.try_get("id")?,
        game_id: row.try_get("game_id")?,
        sportsbook_id: row.try_get("sportsbook_id")?,
        sportsbook_name: row.try_get("sportsbook_name")?,
        market: parse_column(row, "market")?,
        period: parse_column(row, "period")?,
        tracked: parse_column(row, "tracked")?,
        previous_value: row.try_get("previous_value")?,
        new_value: row.try_get("new_value")?,
        direction: parse_column(row, "direction")?,
        magnitude: row.try_get("magnitude")?,
        detected_at: row.try_get("detected_at")?,
        snapshot_id: row.try_get("snapshot_id")?,
    })
}

/// `RETURNING (xmax = 0) AS inserted` yields true for fresh rows; no row means
/// the conflict update's `WHERE` filtered it out.
/// Unique and foreign-key violations become [`RepoError::Constraint`].
fn constraint_error(entity: &'static str) -> impl FnOnce(sqlx::Error) -> RepoError {
    move |e| {
        let detail = e
            .as_database_error()
            .filter(|db| db.is_unique_violation() || db.is_foreign_key_violation())
            .map(|db| db.message().to_string());
        match detail {
            Some(detail) => RepoError::constraint(entity, detail),
            None => RepoError::Database(e),
        }
    }
}

fn outcome_from(row: Option<PgRow>) -> Result<UpsertOutcome, sqlx::Error> {
    let Some(row) = row else {
        return Ok(UpsertOutcome::Unchanged);
    };
    if row.try_get::<bool, _>("inserted")? {
        Ok(UpsertOutcome::Inserted)
    } else {
        Ok(UpsertOutcome::Updated)
    }
}

async fn insert_snapshot(
    tx: &mut Transaction<'_, Postgres>,
    snapshot: &OddsSnapshot,
) -> Result<Uuid, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO odds (
            id, game_id, sportsbook_id, sportsbook_name, market, period,
            home_line, away_line, total_line,
            home_price, away_price, over_price, under_price, fetched_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING id
        "#,
    )
    .bind(snapshot.id)
    .bind(snapshot.game_id)
    .bind(snapshot.sportsbook_id)
    .bind(&snapshot.sportsbook_name)
    .bind(snapshot.market.as_str())
    .bind(snapshot.period.as_str())
    .bind(snapshot.home_line)
    .bind(snapshot.away_line)
    .bind(snapshot.total_line)
    .bind(snapshot.home_price)
    .bind(snapshot.away_price)
    .bind(snapshot.over_price)
    .bind(snapshot.under_price)
    .bind(snapshot.fetched_at)
    .fetch_one(&mut **tx)
    .await?;

    row.try_get("id")
}

#[async_trait]
impl Repository for PgRepository {
    #[instrument(skip(self, team), fields(team = %team.code))]
    async fn upsert_team(&self, team: &Team) -> RepoResult<UpsertOutcome> {
        let row = sqlx::query(
            r#"
            INSERT INTO teams (
                id, upstream_id, code, school_name, mascot, conference, division,
                talent_composite, city, state
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (upstream_id) DO UPDATE SET
                code = EXCLUDED.code,
                school_name = EXCLUDED.school_name,
                mascot = EXCLUDED.mascot,
                conference = EXCLUDED.conference,
                division = EXCLUDED.division,
                talent_composite = EXCLUDED.talent_composite,
                city = EXCLUDED.city,
                state = EXCLUDED.state,
                updated_at = now()
            WHERE (teams.code, teams.school_name, teams.mascot, teams.conference,
                   teams.division, teams.talent_composite, teams.city, teams.state)
                IS DISTINCT FROM
                  (EXCLUDED.code, EXCLUDED.school_name, EXCLUDED.mascot, EXCLUDED.conference,
                   EXCLUDED.division, EXCLUDED.talent_composite, EXCLUDED.city, EXCLUDED.state)
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(team.id)
        .bind(team.upstream_id)
        .bind(&team.code)
        .bind(&team.school_name)
        .bind(&team.mascot)
        .bind(&team.conference)
        .bind(&team.division)
        .bind(team.talent_composite)
        .bind(&team.city)
        .bind(&team.state)
        .fetch_optional(&self.pool)
        .await
        .map_err(constraint_error("team"))?;

        Ok(outcome_from(row)?)
    }

    async fn upsert_stadium(&self, stadium: &Stadium) -> RepoResult<UpsertOutcome> {
        let row = sqlx::query(
            r#"
            INSERT INTO stadiums (id, upstream_id, name, city, state, country, capacity, surface)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (upstream_id) DO UPDATE SET
                name = EXCLUDED.name,
                city = EXCLUDED.city,
                state = EXCLUDED.state,
                country = EXCLUDED.country,
                capacity = EXCLUDED.capacity,
                surface = EXCLUDED.surface,
                updated_at = now()
            WHERE (stadiums.name, stadiums.city, stadiums.state, stadiums.country,
                   stadiums.capacity, stadiums.surface)
                IS DISTINCT FROM
                  (EXCLUDED.name, EXCLUDED.city, EXCLUDED.state, EXCLUDED.country,
                   EXCLUDED.capacity, EXCLUDED.surface)
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(stadium.id)
        .bind(stadium.upstream_id)
        .bind(&stadium.name)
        .bind(&stadium.city)
        .bind(&stadium.state)
        .bind(&stadium.country)
        .bind(stadium.capacity)
        .bind(&stadium.surface)
        .fetch_optional(&self.pool)
        .await?;

        Ok(outcome_from(row)?)
    }

    #[instrument(skip(self, game), fields(game = game.upstream_id))]
    async fn upsert_game(&self, game: &Game) -> RepoResult<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let stored_status: Option<String> =
            sqlx::query_scalar("SELECT status FROM games WHERE upstream_id = $1 FOR UPDATE")
                .bind(game.upstream_id)
                .fetch_optional(&mut *tx)
                .await?;
        let frozen = match stored_status {
            Some(status) => GameStatus::from_str(&status)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?
                .is_terminal(),
            None => false,
        };

        let game_outcome = if frozen {
            let row = sqlx::query(
                r#"
                UPDATE games
                SET home_score = $2, away_score = $3, updated_at = now()
                WHERE upstream_id = $1
                  AND (home_score, away_score) IS DISTINCT FROM ($2, $3)
                RETURNING false AS inserted
                "#,
            )
            .bind(game.upstream_id)
            .bind(game.home_score)
            .bind(game.away_score)
            .fetch_optional(&mut *tx)
            .await?;
            outcome_from(row)?
        } else {
            let row = sqlx::query(
                r#"
                INSERT INTO games (
                    id, upstream_id, season, week, home_team_id, away_team_id,
                    home_team_code, away_team_code, scheduled_at, stadium_upstream_id,
                    status, period, time_remaining, home_score, away_score
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                ON CONFLICT (upstream_id) DO UPDATE SET
                    season = EXCLUDED.season,
                    week = EXCLUDED.week,
                    home_team_id = EXCLUDED.home_team_id,
                    away_team_id = EXCLUDED.away_team_id,
                    home_team_code = EXCLUDED.home_team_code,
                    away_team_code = EXCLUDED.away_team_code,
                    scheduled_at = EXCLUDED.scheduled_at,
                    stadium_upstream_id = EXCLUDED.stadium_upstream_id,
                    status = EXCLUDED.status,
                    period = EXCLUDED.period,
                    time_remaining = EXCLUDED.time_remaining,
                    home_score = EXCLUDED.home_score,
                    away_score = EXCLUDED.away_score,
                    updated_at = now()
                WHERE (games.season, games.week, games.home_team_id, games.away_team_id,
                       games.home_team_code, games.away_team_code, games.scheduled_at,
                       games.stadium_upstream_id, games.status, games.period,
                       games.time_remaining, games.home_score, games.away_score)
                    IS DISTINCT FROM
                      (EXCLUDED.season, EXCLUDED.week, EXCLUDED.home_team_id, EXCLUDED.away_team_id,
                       EXCLUDED.home_team_code, EXCLUDED.away_team_code, EXCLUDED.scheduled_at,
                       EXCLUDED.stadium_upstream_id, EXCLUDED.status, EXCLUDED.period,
                       EXCLUDED.time_remaining, EXCLUDED.home_score, EXCLUDED.away_score)
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(game.id)
            .bind(game.upstream_id)
            .bind(game.season)
            .bind(game.week)
            .bind(game.home_team_id)
            .bind(game.away_team_id)
            .bind(&game.home_team_code)
            .bind(&game.away_team_code)
            .bind(game.scheduled_at)
            .bind(game.stadium_upstream_id)
            .bind(game.status.as_str())
            .bind(&game.period)
            .bind(&game.time_remaining)
            .bind(game.home_score)
            .bind(game.away_score)
            .fetch_optional(&mut *tx)
            .await
            .map_err(constraint_error("game"))?;
            outcome_from(row)?
        };

        let game_id: Uuid = sqlx::query_scalar("SELECT id FROM games WHERE upstream_id = $1")
            .bind(game.upstream_id)
            .fetch_one(&mut *tx)
            .await?;

        let mut periods_changed = false;
        for score in &game.period_scores {
            let row = sqlx::query(
                r#"
                INSERT INTO game_period_scores (game_id, period, home_points, away_points)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (game_id, period) DO UPDATE SET
                    home_points = EXCLUDED.home_points,
                    away_points = EXCLUDED.away_points,
                    updated_at = now()
                WHERE (game_period_scores.home_points, game_period_scores.away_points)
                    IS DISTINCT FROM (EXCLUDED.home_points, EXCLUDED.away_points)
                RETURNING game_id
                "#,
            )
            .bind(game_id)
            .bind(score.period)
            .bind(score.home_points)
            .bind(score.away_points)
            .fetch_optional(&mut *tx)
            .await?;
            periods_changed |= row.is_some();
        }

        tx.commit().await?;

        let outcome = match (game_outcome, periods_changed) {
            (UpsertOutcome::Unchanged, true) => UpsertOutcome::Updated,
            (outcome, _) => outcome,
        };
        debug!(?outcome, frozen, "Upserted game");
        Ok(outcome)
    }

    async fn upsert_team_season_stats(
        &self,
        stats: &TeamSeasonStats,
    ) -> RepoResult<UpsertOutcome> {
        let team_id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM teams WHERE upstream_id = $1")
                .bind(stats.team_upstream_id)
                .fetch_optional(&self.pool)
                .await?;
        let team_id = team_id.ok_or_else(|| RepoError::not_found("team", stats.team_upstream_id))?;

        let row = sqlx::query(
            r#"
            INSERT INTO team_season_stats (
                team_id, season, games, wins, losses,
                points_per_game, yards_per_game, pass_yards_per_game, rush_yards_per_game,
                yards_per_play, points_allowed_per_game, yards_allowed_per_game,
                pass_yards_allowed_per_game, rush_yards_allowed_per_game, yards_per_play_allowed,
                third_down_pct, red_zone_pct, turnovers, takeaways, turnover_margin
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                      $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            ON CONFLICT (team_id, season) DO UPDATE SET
                games = EXCLUDED.games,
                wins = EXCLUDED.wins,
                losses = EXCLUDED.losses,
                points_per_game = EXCLUDED.points_per_game,
                yards_per_game = EXCLUDED.yards_per_game,
                pass_yards_per_game = EXCLUDED.pass_yards_per_game,
                rush_yards_per_game = EXCLUDED.rush_yards_per_game,
                yards_per_play = EXCLUDED.yards_per_play,
                points_allowed_per_game = EXCLUDED.points_allowed_per_game,
                yards_allowed_per_game = EXCLUDED.yards_allowed_per_game,
                pass_yards_allowed_per_game = EXCLUDED.pass_yards_allowed_per_game,
                rush_yards_allowed_per_game = EXCLUDED.rush_yards_allowed_per_game,
                yards_per_play_allowed = EXCLUDED.yards_per_play_allowed,
                third_down_pct = EXCLUDED.third_down_pct,
                red_zone_pct = EXCLUDED.red_zone_pct,
                turnovers = EXCLUDED.turnovers,
                takeaways = EXCLUDED.takeaways,
                turnover_margin = EXCLUDED.turnover_margin,
                updated_at = now()
            WHERE (team_season_stats.games, team_season_stats.wins, team_season_stats.losses,
                   team_season_stats.points_per_game, team_season_stats.yards_per_game,
                   team_season_stats.pass_yards_per_game, team_season_stats.rush_yards_per_game,
                   team_season_stats.yards_per_play, team_season_stats.points_allowed_per_game,
                   team_season_stats.yards_allowed_per_game,
                   team_season_stats.pass_yards_allowed_per_game,
                   team_season_stats.rush_yards_allowed_per_game,
                   team_season_stats.yards_per_play_allowed, team_season_stats.third_down_pct,
                   team_season_stats.red_zone_pct, team_season_stats.turnovers,
                   team_season_stats.takeaways, team_season_stats.turnover_margin)
                IS DISTINCT FROM
                  (EXCLUDED.games, EXCLUDED.wins, EXCLUDED.losses,
                   EXCLUDED.points_per_game, EXCLUDED.yards_per_game,
                   EXCLUDED.pass_yards_per_game, EXCLUDED.rush_yards_per_game,
                   EXCLUDED.yards_per_play, EXCLUDED.points_allowed_per_game,
                   EXCLUDED.yards_allowed_per_game, EXCLUDED.pass_yards_allowed_per_game,
                   EXCLUDED.rush_yards_allowed_per_game, EXCLUDED.yards_per_play_allowed,
                   EXCLUDED.third_down_pct, EXCLUDED.red_zone_pct, EXCLUDED.turnovers,
                   EXCLUDED.takeaways, EXCLUDED.turnover_margin)
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(team_id)
        .bind(stats.season)
        .bind(stats.games)
        .bind(stats.wins)
        .bind(stats.losses)
        .bind(stats.points_per_game)
        .bind(stats.yards_per_game)
        .bind(stats.pass_yards_per_game)
        .bind(stats.rush_yards_per_game)
        .bind(stats.yards_per_play)
        .bind(stats.points_allowed_per_game)
        .bind(stats.yards_allowed_per_game)
        .bind(stats.pass_yards_allowed_per_game)
        .bind(stats.rush_yards_allowed_per_game)
        .bind(stats.yards_per_play_allowed)
        .bind(stats.third_down_pct)
        .bind(stats.red_zone_pct)
        .bind(stats.turnovers)
        .bind(stats.takeaways)
        .bind(stats.turnover_margin)
        .fetch_optional(&self.pool)
        .await?;

        Ok(outcome_from(row)?)
    }

    async fn insert_odds_snapshot(&self, snapshot: &OddsSnapshot) -> RepoResult<Uuid> {
        let mut tx = self.pool.begin().await?;
        let id = insert_snapshot(&mut tx, snapshot)
            .await
            .map_err(constraint_error("odds"))?;
        tx.commit().await?;
        Ok(id)
    }

    #[instrument(skip_all, fields(game_id = %snapshot.game_id, market = %snapshot.market))]
    async fn record_odds(
        &self,
        snapshot: &OddsSnapshot,
        movements: &[LineMovement],
    ) -> RepoResult<Uuid> {
        let mut tx = self.pool.begin().await?;
        let id = insert_snapshot(&mut tx, snapshot)
            .await
            .map_err(constraint_error("odds"))?;

        for movement in movements {
            sqlx::query(
                r#"
                INSERT INTO line_movement (
                    id, game_id, sportsbook_id, sportsbook_name, market, period, tracked,
                    previous_value, new_value, direction, magnitude, detected_at, snapshot_id
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(movement.id)
            .bind(movement.game_id)
            .bind(movement.sportsbook_id)
            .bind(&movement.sportsbook_name)
            .bind(movement.market.as_str())
            .bind(movement.period.as_str())
            .bind(movement.tracked.as_str())
            .bind(movement.previous_value)
            .bind(movement.new_value)
            .bind(movement.direction.as_str())
            .bind(movement.magnitude)
            .bind(movement.detected_at)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    async fn latest_odds(&self, key: &OddsKey) -> RepoResult<Option<OddsSnapshot>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {ODDS_COLUMNS}
            FROM odds
            WHERE game_id = $1 AND sportsbook_id = $2 AND market = $3 AND period = $4
            ORDER BY fetched_at DESC, seq DESC
            LIMIT 1
            "#
        ))
        .bind(key.game_id)
        .bind(key.sportsbook_id)
        .bind(key.market.as_str())
        .bind(key.period.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(snapshot_from_row).transpose()?)
    }

    async fn odds_history(&self, key: &OddsKey) -> RepoResult<Vec<OddsSnapshot>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ODDS_COLUMNS}
            FROM odds
            WHERE game_id = $1 AND sportsbook_id = $2 AND market = $3 AND period = $4
            ORDER BY fetched_at, seq
            "#
        ))
        .bind(key.game_id)
        .bind(key.sportsbook_id)
        .bind(key.market.as_str())
        .bind(key.period.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(snapshot_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn line_movements(&self, game_id: Uuid) -> RepoResult<Vec<LineMovement>> {
        let rows = sqlx::query(
            r#"
            SELECT id, game_id, sportsbook_id, sportsbook_name, market, period, tracked,
                   previous_value, new_value, direction, magnitude, detected_at, snapshot_id
            FROM line_movement
            WHERE game_id = $1
            ORDER BY detected_at
            "#,
        )
        .bind(game_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(movement_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn consensus_line(
        &self,
        game_id: Uuid,
        tracked: TrackedLine,
        sportsbook_ids: &[i64],
    ) -> RepoResult<Option<f64>> {
        let column = match tracked {
            TrackedLine::Spread => "home_line",
            TrackedLine::Total => "total_line",
        };
        let consensus: Option<f64> = sqlx::query_scalar(&format!(
            r#"
            SELECT AVG(value)
            FROM (
                SELECT DISTINCT ON (sportsbook_id) {column} AS value
                FROM odds
                WHERE game_id = $1
                  AND sportsbook_id = ANY($2)
                  AND market = $3
                  AND period = 'full_game'
                  AND {column} IS NOT NULL
                ORDER BY sportsbook_id, fetched_at DESC, seq DESC
            ) latest
            "#
        ))
        .bind(game_id)
        .bind(sportsbook_ids)
        .bind(tracked.market().as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(consensus)
    }

    async fn find_team_by_code(&self, code: &str) -> RepoResult<Team> {
        let row = sqlx::query(&format!("SELECT {TEAM_COLUMNS} FROM teams WHERE code = $1"))
            .bind(code.to_uppercase())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(team_from_row(&row)?),
            None => Err(RepoError::not_found("team", code)),
        }
    }

    async fn find_team_by_upstream_id(&self, upstream_id: i64) -> RepoResult<Team> {
        let row = sqlx::query(&format!(
            "SELECT {TEAM_COLUMNS} FROM teams WHERE upstream_id = $1"
        ))
        .bind(upstream_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(team_from_row(&row)?),
            None => Err(RepoError::not_found("team", upstream_id)),
        }
    }

    async fn find_game_by_upstream_id(&self, upstream_id: i64) -> RepoResult<Game> {
        let row = sqlx::query(&format!(
            "SELECT {GAME_COLUMNS} FROM games WHERE upstream_id = $1"
        ))
        .bind(upstream_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| RepoError::not_found("game", upstream_id))?;
        self.games_with_periods(vec![row])
            .await?
            .pop()
            .ok_or_else(|| RepoError::not_found("game", upstream_id))
    }

    async fn active_games(&self, now: DateTime<Utc>) -> RepoResult<Vec<Game>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {GAME_COLUMNS}
            FROM games
            WHERE scheduled_at < $1
              AND status NOT IN ('final', 'postponed', 'canceled')
            ORDER BY scheduled_at
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        self.games_with_periods(rows).await
    }

    async fn team_count(&self) -> RepoResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM teams")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn ping(&self) -> RepoResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
