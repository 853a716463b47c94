#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ncaaf_ingestion::client::SportsDataSource;
use ncaaf_ingestion::config::{InitialSyncMode, SchedulerConfig};
use ncaaf_ingestion::ingest::Ingestor;
use ncaaf_ingestion::metrics::Metrics;
use ncaaf_ingestion::models::{
    BoxScoreInput, GameInput, GameOddsInput, OddsInput, StadiumInput, TeamInput,
    TeamSeasonStatsInput,
};
use ncaaf_ingestion::repository::{MemoryRepository, Repository};
use ncaaf_ingestion::scheduler::SyncScheduler;
use ncaaf_ingestion::server::HealthState;
use ncaaf_ingestion::shutdown::Shutdown;
use ncaaf_ingestion::ClientError;

pub const SEASON: i32 = 2024;

pub fn team(upstream_id: i64, code: &str) -> TeamInput {
    serde_json::from_value(json!({
        "TeamID": upstream_id,
        "Key": code,
        "School": format!("{code} University"),
        "Name": "Tigers",
        "Conference": "SEC",
        "Division": "West",
    }))
    .unwrap()
}

pub fn stadium(upstream_id: i64, name: &str) -> StadiumInput {
    serde_json::from_value(json!({
        "StadiumID": upstream_id,
        "Name": name,
        "City": "Tuscaloosa",
        "State": "AL",
        "Country": "USA",
        "Capacity": 100077,
        "PlayingSurface": "Grass",
    }))
    .unwrap()
}

pub fn stats(team_upstream_id: i64) -> TeamSeasonStatsInput {
    serde_json::from_value(json!({
        "TeamID": team_upstream_id,
        "Season": SEASON,
        "Games": 6,
        "Wins": 5,
        "Losses": 1,
        "PointsPerGame": 34.5,
        "PointsAllowedPerGame": 17.2,
        "YardsPerPlay": 6.8,
    }))
    .unwrap()
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn game(upstream_id: i64, home: &str, away: &str, at: DateTime<Utc>, status: &str) -> GameInput {
    serde_json::from_value(json!({
        "GameID": upstream_id,
        "Season": SEASON,
        "Week": 6,
        "HomeTeam": home,
        "AwayTeam": away,
        "DateTimeUTC": timestamp(at),
        "StadiumID": 1,
        "Status": status,
    }))
    .unwrap()
}

/// An in-progress game that kicked off an hour ago.
pub fn live_game(upstream_id: i64, home: &str, away: &str) -> GameInput {
    game(upstream_id, home, away, Utc::now() - Duration::hours(1), "InProgress")
}

pub fn final_box_score(upstream_id: i64, home: &str, away: &str, home_score: i32, away_score: i32) -> BoxScoreInput {
    serde_json::from_value(json!({
        "Game": {
            "GameID": upstream_id,
            "Season": SEASON,
            "Week": 6,
            "HomeTeam": home,
            "AwayTeam": away,
            "DateTimeUTC": timestamp(Utc::now() - Duration::hours(4)),
            "Status": "Final",
            "HomeScore": home_score,
            "AwayScore": away_score,
        },
        "Periods": [
            { "Number": 1, "Name": "1", "HomeScore": 7, "AwayScore": 3 },
            { "Number": 2, "Name": "2", "HomeScore": home_score - 7, "AwayScore": away_score - 3 },
            { "Number": 3, "Name": "3", "HomeScore": 0, "AwayScore": 0 },
            { "Number": 4, "Name": "4", "HomeScore": 0, "AwayScore": 0 },
        ],
    }))
    .unwrap()
}

/// Full-game spread and total from one sportsbook.
pub fn line(sportsbook_id: i64, home_spread: f64, total: f64) -> OddsInput {
    serde_json::from_value(json!({
        "GameOddId": sportsbook_id * 1000,
        "SportsbookId": sportsbook_id,
        "Sportsbook": format!("Book {sportsbook_id}"),
        "OddType": "Game",
        "Updated": timestamp(Utc::now()),
        "HomePointSpread": home_spread,
        "AwayPointSpread": -home_spread,
        "HomePointSpreadPayout": -110,
        "AwayPointSpreadPayout": -110,
        "OverUnder": total,
        "OverPayout": -110,
        "UnderPayout": -110,
    }))
    .unwrap()
}

pub fn live_line(sportsbook_id: i64, home_spread: f64, total: f64) -> OddsInput {
    OddsInput {
        odd_type: Some("Live".into()),
        ..line(sportsbook_id, home_spread, total)
    }
}

pub fn game_odds(upstream_id: i64, lines: Vec<OddsInput>) -> GameOddsInput {
    GameOddsInput {
        game_id: Some(upstream_id),
        season: Some(SEASON),
        week: Some(6),
        pregame_odds: lines,
        live_odds: Vec::new(),
    }
}

fn auth_error() -> ClientError {
    ClientError::Auth {
        status: 401,
        body: "Access denied due to invalid subscription key".into(),
    }
}

/// Scripted provider. Mutable fields can be changed between cycles.
#[derive(Default)]
pub struct FakeSource {
    pub season: i32,
    pub teams: Mutex<Vec<TeamInput>>,
    pub stadiums: Vec<StadiumInput>,
    pub games: Vec<GameInput>,
    pub stats: Vec<TeamSeasonStatsInput>,
    pub box_scores: Mutex<HashMap<i64, BoxScoreInput>>,
    pub odds: Mutex<HashMap<i64, Vec<OddsInput>>>,
    /// Games whose odds requests fail with a provider error
    pub failing_odds: HashSet<i64>,
    /// Every call is rejected with 401
    pub reject_credentials: bool,
    /// Added latency on every box score request
    pub box_score_delay: Option<std::time::Duration>,
    pub calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            season: SEASON,
            ..Default::default()
        }
    }

    pub fn set_odds(&self, game_id: i64, lines: Vec<OddsInput>) {
        self.odds.lock().unwrap().insert(game_id, lines);
    }

    pub fn set_box_score(&self, game_id: i64, box_score: BoxScoreInput) {
        self.box_scores.lock().unwrap().insert(game_id, box_score);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn call(&self) -> Result<(), ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_credentials {
            return Err(auth_error());
        }
        Ok(())
    }
}

#[async_trait]
impl SportsDataSource for FakeSource {
    async fn current_season(&self) -> Result<i32, ClientError> {
        self.call()?;
        Ok(self.season)
    }

    async fn current_week(&self) -> Result<Option<i32>, ClientError> {
        self.call()?;
        Ok(Some(6))
    }

    async fn teams(&self) -> Result<Vec<TeamInput>, ClientError> {
        self.call()?;
        Ok(self.teams.lock().unwrap().clone())
    }

    async fn stadiums(&self) -> Result<Vec<StadiumInput>, ClientError> {
        self.call()?;
        Ok(self.stadiums.clone())
    }

    async fn games(&self, season: i32) -> Result<Vec<GameInput>, ClientError> {
        self.call()?;
        Ok(self
            .games
            .iter()
            .filter(|g| g.season == Some(season))
            .cloned()
            .collect())
    }

    async fn team_season_stats(&self, _season: i32) -> Result<Vec<TeamSeasonStatsInput>, ClientError> {
        self.call()?;
        Ok(self.stats.clone())
    }

    async fn game_odds_by_week(
        &self,
        _season: i32,
        _week: i32,
        _group: &str,
    ) -> Result<Vec<GameOddsInput>, ClientError> {
        self.call()?;
        Ok(self
            .odds
            .lock()
            .unwrap()
            .iter()
            .map(|(id, lines)| game_odds(*id, lines.clone()))
            .collect())
    }

    async fn game_odds(&self, game_id: i64, _group: &str) -> Result<Vec<OddsInput>, ClientError> {
        self.call()?;
        if self.failing_odds.contains(&game_id) {
            return Err(ClientError::Provider {
                status: 404,
                body: format!("no odds for game {game_id}"),
            });
        }
        Ok(self
            .odds
            .lock()
            .unwrap()
            .get(&game_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn box_scores_by_week(&self, _season: i32, _week: i32) -> Result<Vec<BoxScoreInput>, ClientError> {
        self.call()?;
        Ok(self.box_scores.lock().unwrap().values().cloned().collect())
    }

    async fn box_score(&self, game_id: i64) -> Result<Option<BoxScoreInput>, ClientError> {
        self.call()?;
        if let Some(delay) = self.box_score_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.box_scores.lock().unwrap().get(&game_id).cloned())
    }
}

/// In-memory store, ingestor and health state wired together.
pub struct Harness {
    pub repo: Arc<MemoryRepository>,
    pub ingestor: Arc<Ingestor>,
    pub metrics: Arc<Metrics>,
    pub health: HealthState,
}

impl Harness {
    pub fn new() -> Self {
        let repo = Arc::new(MemoryRepository::new());
        let metrics = Arc::new(Metrics::new());
        let store: Arc<dyn Repository> = repo.clone();
        let ingestor = Arc::new(Ingestor::new(store, metrics.clone()));
        Self {
            repo,
            ingestor,
            metrics,
            health: HealthState::new(),
        }
    }

    pub fn store(&self) -> Arc<dyn Repository> {
        self.repo.clone()
    }

    /// Teams 1..=n with codes T1..Tn.
    pub async fn seed_teams(&self, n: i64) {
        let teams = (1..=n).map(|i| team(i, &format!("T{i}"))).collect();
        self.ingestor.ingest_teams(teams).await;
    }

    pub fn scheduler(&self, source: Arc<FakeSource>, config: SchedulerConfig) -> SyncScheduler {
        SyncScheduler::new(
            source,
            self.ingestor.clone(),
            config,
            self.health.clone(),
            self.metrics.clone(),
            Shutdown::never(),
        )
    }
}

/// Scheduler settings for tests: one odds group, no automatic initial sync.
pub fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        initial_sync: InitialSyncMode::Never,
        odds_groups: vec!["G1002".to_string()],
        ..SchedulerConfig::default()
    }
}
