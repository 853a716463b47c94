//! Sync scheduler: initial sync, backfill, active-game polling and the
//! nightly reference refresh.

use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::client::SportsDataSource;
use crate::config::{Backfill, InitialSyncMode, SchedulerConfig};
use crate::error::{ClientError, Error, Result};
use crate::ingest::{EntityFailure, Ingestor, OddsSummary};
use crate::metrics::Metrics;
use crate::models::Game;
use crate::server::HealthState;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    InitialSync,
    Steady,
    ShuttingDown,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Idle => "idle",
            SchedulerState::InitialSync => "initial_sync",
            SchedulerState::Steady => "steady",
            SchedulerState::ShuttingDown => "shutting_down",
        }
    }
}

/// Result of one polling cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub games_considered: usize,
    pub games_updated: usize,
    pub snapshots_written: usize,
    pub movements_detected: usize,
    pub failures: Vec<EntityFailure>,
    /// Nothing in the cycle succeeded
    #[serde(skip)]
    pub failed: bool,
}

/// Consecutive upstream authentication failures, shared with per-game tasks.
#[derive(Debug)]
struct AuthTracker {
    consecutive: AtomicU32,
    limit: u32,
}

impl AuthTracker {
    fn new(limit: u32) -> Self {
        Self {
            consecutive: AtomicU32::new(0),
            limit: limit.max(1),
        }
    }

    fn record(&self, err: &ClientError) {
        if err.is_auth() {
            let n = self.consecutive.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(consecutive = n, limit = self.limit, "Upstream rejected credentials");
        }
    }

    fn reset(&self) {
        self.consecutive.store(0, Ordering::SeqCst);
    }

    fn exceeded(&self) -> bool {
        self.consecutive.load(Ordering::SeqCst) >= self.limit
    }

    fn count(&self) -> u32 {
        self.consecutive.load(Ordering::SeqCst)
    }
}

/// Next wall-clock occurrence of `at` (UTC) strictly after `now`.
pub fn next_nightly_run(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

/// Everything a per-game task needs, cloned into each spawned task.
#[derive(Clone)]
struct GameContext {
    source: Arc<dyn SportsDataSource>,
    ingestor: Arc<Ingestor>,
    groups: Arc<[String]>,
    detect: bool,
    auth: Arc<AuthTracker>,
}

#[derive(Default)]
struct GameResult {
    updated: bool,
    odds: OddsSummary,
    failures: Vec<EntityFailure>,
}

impl GameContext {
    /// Box score first, then odds per group, so scores land before lines.
    async fn sync_game(self, game: Game) -> GameResult {
        let entity = format!("game {}", game.upstream_id);
        let mut result = GameResult::default();

        match self.source.box_score(game.upstream_id).await {
            Ok(Some(box_score)) => {
                self.auth.reset();
                match self.ingestor.ingest_box_score(box_score).await {
                    Ok(outcome) => result.updated = outcome.changed(),
                    Err(e) => {
                        warn!(game = game.upstream_id, error = %e, "Box score write failed");
                        result
                            .failures
                            .push(EntityFailure::new(&entity, "box_score", &e));
                    }
                }
            }
            Ok(None) => self.auth.reset(),
            Err(ClientError::Cancelled) => return result,
            Err(e) => {
                self.auth.record(&e);
                warn!(game = game.upstream_id, error = %e, "Box score fetch failed");
                result
                    .failures
                    .push(EntityFailure::new(&entity, "box_score", &e.into()));
            }
        }

        for group in self.groups.iter() {
            if self.auth.exceeded() {
                break;
            }
            let inputs = match self.source.game_odds(game.upstream_id, group).await {
                Ok(inputs) => {
                    self.auth.reset();
                    inputs
                }
                Err(ClientError::Cancelled) => return result,
                Err(e) => {
                    self.auth.record(&e);
                    warn!(game = game.upstream_id, group = %group, error = %e, "Odds fetch failed");
                    result
                        .failures
                        .push(EntityFailure::new(&entity, "odds", &e.into()));
                    continue;
                }
            };

            match self.ingestor.ingest_odds(&game, inputs, self.detect).await {
                Ok(summary) => result.odds.merge(summary),
                Err(e) => {
                    warn!(game = game.upstream_id, group = %group, error = %e, "Odds write failed");
                    result
                        .failures
                        .push(EntityFailure::new(&entity, "odds", &e));
                }
            }
        }

        result
    }
}

pub struct SyncScheduler {
    source: Arc<dyn SportsDataSource>,
    ingestor: Arc<Ingestor>,
    config: SchedulerConfig,
    health: HealthState,
    metrics: Arc<Metrics>,
    shutdown: Shutdown,
    auth: Arc<AuthTracker>,
    initial_sync_requested: AtomicBool,
}

impl SyncScheduler {
    pub fn new(
        source: Arc<dyn SportsDataSource>,
        ingestor: Arc<Ingestor>,
        config: SchedulerConfig,
        health: HealthState,
        metrics: Arc<Metrics>,
        shutdown: Shutdown,
    ) -> Self {
        let auth = Arc::new(AuthTracker::new(config.auth_failure_limit));
        Self {
            source,
            ingestor,
            config,
            health,
            metrics,
            shutdown,
            auth,
            initial_sync_requested: AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> SchedulerState {
        self.health.scheduler_state().await
    }

    /// Run the initial sync again before the next polling cycle.
    pub fn request_initial_sync(&self) {
        self.initial_sync_requested.store(true, Ordering::SeqCst);
    }

    /// Drive the scheduler until shutdown.
    ///
    /// Returns `Error::Halted` once consecutive authentication failures reach
    /// the configured limit; every other failure is logged and retried.
    pub async fn run(&self) -> Result<()> {
        self.health.set_scheduler_state(SchedulerState::Idle).await;
        // Advanced only after a refresh; a deadline passed mid-cycle fires next.
        let mut next_nightly = next_nightly_run(Utc::now(), self.config.nightly_refresh_at);

        if self.should_initial_sync().await {
            self.initial_sync().await?;
        }

        if self.config.run_once {
            info!("Running one polling cycle (RUN_ONCE=true)");
            let report = self.poll_cycle().await?;
            info!(
                games = report.games_considered,
                updated = report.games_updated,
                snapshots = report.snapshots_written,
                failures = report.failures.len(),
                "One-shot sync completed"
            );
            self.health
                .set_scheduler_state(SchedulerState::ShuttingDown)
                .await;
            return Ok(());
        }

        self.health.set_scheduler_state(SchedulerState::Steady).await;
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            nightly_refresh_at = %self.config.nightly_refresh_at,
            "Scheduler started"
        );

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown.clone();

        loop {
            let nightly_in = (next_nightly - Utc::now()).to_std().unwrap_or_default();

            tokio::select! {
                _ = shutdown.wait() => break,
                _ = poll.tick() => {
                    if self.initial_sync_requested.swap(false, Ordering::SeqCst) {
                        self.initial_sync().await?;
                        self.health.set_scheduler_state(SchedulerState::Steady).await;
                    }
                    self.poll_cycle().await?;
                }
                _ = tokio::time::sleep(nightly_in) => {
                    self.nightly_refresh().await?;
                    next_nightly = next_nightly_run(Utc::now(), self.config.nightly_refresh_at);
                }
            }
        }

        self.health
            .set_scheduler_state(SchedulerState::ShuttingDown)
            .await;
        info!("Scheduler stopped");
        Ok(())
    }

    async fn should_initial_sync(&self) -> bool {
        match self.config.initial_sync {
            InitialSyncMode::Always => true,
            InitialSyncMode::Never => false,
            InitialSyncMode::Auto => match self.ingestor.repository().team_count().await {
                Ok(0) => {
                    info!("Store has no teams, running initial sync");
                    true
                }
                Ok(_) => false,
                Err(e) => {
                    warn!(error = %e, "Could not count teams, skipping initial sync");
                    false
                }
            },
        }
    }

    /// Log a failed upstream step and halt once the auth limit is reached.
    fn client_failure(&self, step: &str, err: ClientError) -> Result<()> {
        if matches!(err, ClientError::Cancelled) {
            debug!(step, "Upstream call cancelled by shutdown");
            return Ok(());
        }
        self.auth.record(&err);
        warn!(step, error = %err, "Upstream step failed");
        self.check_halt()
    }

    fn check_halt(&self) -> Result<()> {
        if self.auth.exceeded() {
            self.health.halt();
            let reason = format!(
                "{} consecutive authentication failures",
                self.auth.count()
            );
            error!(reason = %reason, "Halting scheduler");
            return Err(Error::Halted(reason));
        }
        Ok(())
    }

    /// Current season, teams, stadiums, schedule and team stats, then backfill.
    pub async fn initial_sync(&self) -> Result<()> {
        self.health
            .set_scheduler_state(SchedulerState::InitialSync)
            .await;
        let started = Instant::now();
        info!("Initial sync started");

        let season = match self.source.current_season().await {
            Ok(season) => {
                self.auth.reset();
                Some(season)
            }
            Err(e) => {
                self.client_failure("current_season", e)?;
                None
            }
        };

        self.refresh_reference_data().await?;

        if let Some(season) = season {
            match self.source.games(season).await {
                Ok(games) => {
                    self.auth.reset();
                    self.ingestor.ingest_games(games).await;
                }
                Err(e) => self.client_failure("schedule", e)?,
            }
            self.sync_team_stats(season).await?;
        }

        if let Some(backfill) = &self.config.backfill {
            self.backfill(backfill).await?;
        }

        info!(
            season = ?season,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Initial sync finished"
        );
        Ok(())
    }

    async fn refresh_reference_data(&self) -> Result<()> {
        match self.source.teams().await {
            Ok(teams) => {
                self.auth.reset();
                self.ingestor.ingest_teams(teams).await;
            }
            Err(e) => self.client_failure("teams", e)?,
        }

        match self.source.stadiums().await {
            Ok(stadiums) => {
                self.auth.reset();
                self.ingestor.ingest_stadiums(stadiums).await;
            }
            Err(e) => self.client_failure("stadiums", e)?,
        }
        Ok(())
    }

    async fn sync_team_stats(&self, season: i32) -> Result<()> {
        match self.source.team_season_stats(season).await {
            Ok(stats) => {
                self.auth.reset();
                self.ingestor.ingest_team_season_stats(stats).await;
            }
            Err(e) => self.client_failure("team_season_stats", e)?,
        }
        Ok(())
    }

    /// Best-effort import of a historical season/week range.
    async fn backfill(&self, backfill: &Backfill) -> Result<()> {
        info!(season = backfill.season, weeks = ?backfill.weeks, "Backfill started");

        match self.source.games(backfill.season).await {
            Ok(games) => {
                self.auth.reset();
                self.ingestor.ingest_games(games).await;
            }
            Err(e) => self.client_failure("backfill_schedule", e)?,
        }

        for &week in &backfill.weeks {
            if self.shutdown.is_triggered() {
                info!(week, "Backfill interrupted by shutdown");
                return Ok(());
            }

            match self.source.box_scores_by_week(backfill.season, week).await {
                Ok(box_scores) => {
                    self.auth.reset();
                    let summary = self.ingestor.ingest_box_scores(box_scores).await;
                    info!(week, changed = summary.changed(), "Backfilled box scores");
                }
                Err(e) => self.client_failure("backfill_box_scores", e)?,
            }

            for group in &self.config.odds_groups {
                let games = match self
                    .source
                    .game_odds_by_week(backfill.season, week, group)
                    .await
                {
                    Ok(games) => {
                        self.auth.reset();
                        games
                    }
                    Err(e) => {
                        self.client_failure("backfill_odds", e)?;
                        continue;
                    }
                };

                let mut total = OddsSummary::default();
                for game_odds in games {
                    match self
                        .ingestor
                        .ingest_game_odds(game_odds, self.config.line_movement_tracking)
                        .await
                    {
                        Ok(summary) => total.merge(summary),
                        Err(e) => warn!(week, group = %group, error = %e, "Backfill odds write failed"),
                    }
                }
                info!(
                    week,
                    group = %group,
                    snapshots = total.snapshots_written,
                    "Backfilled odds"
                );
            }
        }

        Ok(())
    }

    /// One polling pass over every active game.
    pub async fn poll_cycle(&self) -> Result<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport::default();

        let games = match self.ingestor.repository().active_games(Utc::now()).await {
            Ok(games) => games,
            Err(e) => {
                error!(error = %e, "Could not load active games, retrying next tick");
                report.failures.push(EntityFailure::new(
                    "active_games",
                    "query",
                    &e.into(),
                ));
                report.failed = true;
                self.finish_cycle(started, &report).await;
                return Ok(report);
            }
        };
        report.games_considered = games.len();

        let ctx = GameContext {
            source: self.source.clone(),
            ingestor: self.ingestor.clone(),
            groups: self.config.odds_groups.clone().into(),
            detect: self.config.line_movement_tracking,
            auth: self.auth.clone(),
        };

        let mut tasks = JoinSet::new();
        for game in games {
            tasks.spawn(ctx.clone().sync_game(game));
        }

        let mut failed_games = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    if result.updated {
                        report.games_updated += 1;
                    }
                    if !result.failures.is_empty() {
                        failed_games += 1;
                    }
                    report.snapshots_written += result.odds.snapshots_written;
                    report.movements_detected += result.odds.movements_detected;
                    report.failures.extend(result.failures);
                }
                Err(e) => {
                    failed_games += 1;
                    error!(error = %e, "Game task panicked");
                    report.failures.push(EntityFailure {
                        entity: "game task".to_string(),
                        stage: "join",
                        error: e.to_string(),
                    });
                }
            }
        }

        report.failed = report.games_considered > 0 && failed_games == report.games_considered;
        self.finish_cycle(started, &report).await;
        self.check_halt()?;
        Ok(report)
    }

    async fn finish_cycle(&self, started: Instant, report: &CycleReport) {
        let duration_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_cycle(duration_ms, report.failed);

        if report.failed {
            self.health.record_error().await;
            warn!(
                duration_ms,
                failures = report.failures.len(),
                "Polling cycle failed"
            );
        } else {
            self.health.record_success(report.games_considered).await;
            info!(
                duration_ms,
                games = report.games_considered,
                updated = report.games_updated,
                snapshots = report.snapshots_written,
                movements = report.movements_detected,
                failures = report.failures.len(),
                "Polling cycle complete"
            );
        }
    }

    /// Re-fetch reference data regardless of game activity, then drop cached
    /// team resolutions.
    pub async fn nightly_refresh(&self) -> Result<()> {
        info!("Nightly refresh started");
        self.refresh_reference_data().await?;

        match self.source.current_season().await {
            Ok(season) => {
                self.auth.reset();
                self.sync_team_stats(season).await?;
            }
            Err(e) => self.client_failure("current_season", e)?,
        }

        self.ingestor.clear_team_cache().await;
        info!("Nightly refresh finished");
        Ok(())
    }
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn nightly_run_later_today() {
        let now = Utc.with_ymd_and_hms(2024, 10, 5, 1, 30, 0).unwrap();
        let at = NaiveTime::from_hms_opt(2, 0, 0).unwrap();
        assert_eq!(
            next_nightly_run(now, at),
            Utc.with_ymd_and_hms(2024, 10, 5, 2, 0, 0).unwrap()
        );
    }

    #[test]
    fn nightly_run_rolls_to_tomorrow() {
        let at = NaiveTime::from_hms_opt(2, 0, 0).unwrap();
        for now in [
            Utc.with_ymd_and_hms(2024, 10, 5, 2, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 10, 5, 23, 59, 59).unwrap(),
        ] {
            assert_eq!(
                next_nightly_run(now, at),
                Utc.with_ymd_and_hms(2024, 10, 6, 2, 0, 0).unwrap()
            );
        }
    }

    #[test]
    fn auth_tracker_counts_only_auth_errors() {
        let tracker = AuthTracker::new(2);
        tracker.record(&ClientError::Provider {
            status: 500,
            body: String::new(),
        });
        assert_eq!(tracker.count(), 0);

        let auth = ClientError::Auth {
            status: 401,
            body: String::new(),
        };
        tracker.record(&auth);
        assert!(!tracker.exceeded());
        tracker.reset();
        tracker.record(&auth);
        tracker.record(&auth);
        assert!(tracker.exceeded());
    }
}
