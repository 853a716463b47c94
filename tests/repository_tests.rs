//! Write semantics of the in-memory repository.

mod support;

use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

use ncaaf_ingestion::models::{
    Game, GameStatus, Market, OddsKey, OddsPeriod, OddsSnapshot, PeriodScore, Team,
    TeamSeasonStats, UpsertOutcome,
};
use ncaaf_ingestion::repository::{MemoryRepository, Repository};

fn team(upstream_id: i64, code: &str) -> Team {
    Team::try_from(support::team(upstream_id, code)).unwrap()
}

async fn seeded() -> (MemoryRepository, Team, Team) {
    let repo = MemoryRepository::new();
    let home = team(1, "ALA");
    let away = team(2, "UGA");
    repo.upsert_team(&home).await.unwrap();
    repo.upsert_team(&away).await.unwrap();
    (repo, home, away)
}

fn game(home: &Team, away: &Team, status: GameStatus) -> Game {
    Game {
        id: Uuid::new_v4(),
        upstream_id: 14000,
        season: 2024,
        week: 6,
        home_team_id: home.id,
        away_team_id: away.id,
        home_team_code: home.code.clone(),
        away_team_code: away.code.clone(),
        scheduled_at: Utc.with_ymd_and_hms(2024, 10, 5, 19, 30, 0).unwrap(),
        stadium_upstream_id: Some(1),
        status,
        period: None,
        time_remaining: None,
        home_score: None,
        away_score: None,
        period_scores: Vec::new(),
    }
}

fn spread(game_id: Uuid, home_line: f64, minutes: i64) -> OddsSnapshot {
    OddsSnapshot {
        id: Uuid::new_v4(),
        game_id,
        sportsbook_id: 7,
        sportsbook_name: Some("Pinnacle".into()),
        market: Market::Spread,
        period: OddsPeriod::FullGame,
        home_line: Some(home_line),
        away_line: Some(-home_line),
        total_line: None,
        home_price: Some(-110),
        away_price: Some(-110),
        over_price: None,
        under_price: None,
        fetched_at: Utc.with_ymd_and_hms(2024, 10, 5, 12, 0, 0).unwrap() + Duration::minutes(minutes),
    }
}

#[tokio::test]
async fn team_upsert_is_idempotent() {
    let repo = MemoryRepository::new();
    let alabama = team(1, "ALA");

    assert_eq!(repo.upsert_team(&alabama).await.unwrap(), UpsertOutcome::Inserted);
    assert_eq!(repo.upsert_team(&alabama).await.unwrap(), UpsertOutcome::Unchanged);

    // A fresh conversion carries a new surrogate id but the same attributes
    let again = team(1, "ALA");
    assert_eq!(repo.upsert_team(&again).await.unwrap(), UpsertOutcome::Unchanged);
    assert_eq!(repo.team_count().await.unwrap(), 1);
    assert_eq!(repo.find_team_by_code("ala").await.unwrap().id, alabama.id);
}

#[tokio::test]
async fn team_code_is_unique() {
    let (repo, _, _) = seeded().await;

    let impostor = team(3, "ALA");
    let err = repo.upsert_team(&impostor).await.unwrap_err();
    assert!(err.is_constraint(), "{err:?}");
    assert_eq!(repo.team_count().await.unwrap(), 2);
    assert_eq!(repo.find_team_by_code("ALA").await.unwrap().upstream_id, 1);
}

#[tokio::test]
async fn game_with_unknown_team_violates_constraint() {
    let (repo, home, _) = seeded().await;
    let stranger = team(99, "XYZ");

    let err = repo
        .upsert_game(&game(&home, &stranger, GameStatus::Scheduled))
        .await
        .unwrap_err();
    assert!(err.is_constraint(), "{err:?}");
    assert_eq!(repo.game_count().await, 0);
}

#[tokio::test]
async fn game_upsert_is_idempotent() {
    let (repo, home, away) = seeded().await;
    let mut scheduled = game(&home, &away, GameStatus::Scheduled);
    scheduled.period_scores = vec![PeriodScore {
        period: 1,
        home_points: Some(0),
        away_points: Some(0),
    }];

    assert_eq!(repo.upsert_game(&scheduled).await.unwrap(), UpsertOutcome::Inserted);
    assert_eq!(repo.upsert_game(&scheduled).await.unwrap(), UpsertOutcome::Unchanged);

    let mut live = scheduled.clone();
    live.status = GameStatus::InProgress;
    live.home_score = Some(7);
    live.away_score = Some(0);
    assert_eq!(repo.upsert_game(&live).await.unwrap(), UpsertOutcome::Updated);
    assert_eq!(repo.upsert_game(&live).await.unwrap(), UpsertOutcome::Unchanged);
    assert_eq!(repo.game_count().await, 1);
}

#[tokio::test]
async fn period_score_correction_updates_game() {
    let (repo, home, away) = seeded().await;
    let mut g = game(&home, &away, GameStatus::InProgress);
    g.period_scores = vec![PeriodScore {
        period: 1,
        home_points: Some(7),
        away_points: Some(0),
    }];
    repo.upsert_game(&g).await.unwrap();

    g.period_scores[0].away_points = Some(3);
    assert_eq!(repo.upsert_game(&g).await.unwrap(), UpsertOutcome::Updated);

    let stored = repo.find_game_by_upstream_id(14000).await.unwrap();
    assert_eq!(stored.period_scores[0].away_points, Some(3));
}

#[tokio::test]
async fn terminal_game_only_accepts_score_changes() {
    let (repo, home, away) = seeded().await;
    let mut finished = game(&home, &away, GameStatus::Final);
    finished.home_score = Some(34);
    finished.away_score = Some(27);
    repo.upsert_game(&finished).await.unwrap();

    // A stale feed tries to move the game back to in-progress
    let mut stale = finished.clone();
    stale.status = GameStatus::InProgress;
    stale.week = 7;
    assert_eq!(repo.upsert_game(&stale).await.unwrap(), UpsertOutcome::Unchanged);

    let stored = repo.find_game_by_upstream_id(14000).await.unwrap();
    assert_eq!(stored.status, GameStatus::Final);
    assert_eq!(stored.week, 6);

    // Stat corrections still land
    let mut corrected = finished.clone();
    corrected.away_score = Some(24);
    assert_eq!(repo.upsert_game(&corrected).await.unwrap(), UpsertOutcome::Updated);
    let stored = repo.find_game_by_upstream_id(14000).await.unwrap();
    assert_eq!(stored.away_score, Some(24));
    assert_eq!(stored.status, GameStatus::Final);
}

#[tokio::test]
async fn team_stats_require_known_team() {
    let (repo, _, _) = seeded().await;
    let stats = TeamSeasonStats::try_from(support::stats(99)).unwrap();
    let err = repo.upsert_team_season_stats(&stats).await.unwrap_err();
    assert!(err.is_not_found());

    let stats = TeamSeasonStats::try_from(support::stats(1)).unwrap();
    assert_eq!(
        repo.upsert_team_season_stats(&stats).await.unwrap(),
        UpsertOutcome::Inserted
    );
    assert_eq!(
        repo.upsert_team_season_stats(&stats).await.unwrap(),
        UpsertOutcome::Unchanged
    );
}

#[tokio::test]
async fn odds_are_append_only() {
    let (repo, home, away) = seeded().await;
    let g = game(&home, &away, GameStatus::Scheduled);
    repo.upsert_game(&g).await.unwrap();
    let game_id = repo.find_game_by_upstream_id(14000).await.unwrap().id;

    let first = spread(game_id, -7.0, 0);
    let second = spread(game_id, -6.5, 5);
    // Re-inserting an identical line still records a new observation
    let third = spread(game_id, -6.5, 10);
    for snapshot in [&first, &second, &third] {
        repo.insert_odds_snapshot(snapshot).await.unwrap();
    }

    let key = first.key();
    let history = repo.odds_history(&key).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].home_line, Some(-7.0));

    let latest = repo.latest_odds(&key).await.unwrap().unwrap();
    assert_eq!(latest.id, third.id);
}

#[tokio::test]
async fn latest_odds_breaks_ties_by_insertion() {
    let (repo, home, away) = seeded().await;
    repo.upsert_game(&game(&home, &away, GameStatus::Scheduled))
        .await
        .unwrap();
    let game_id = repo.find_game_by_upstream_id(14000).await.unwrap().id;

    let a = spread(game_id, -7.0, 0);
    let b = spread(game_id, -7.5, 0);
    repo.insert_odds_snapshot(&a).await.unwrap();
    repo.insert_odds_snapshot(&b).await.unwrap();

    let latest = repo.latest_odds(&a.key()).await.unwrap().unwrap();
    assert_eq!(latest.id, b.id);
}

#[tokio::test]
async fn latest_odds_is_per_key() {
    let (repo, home, away) = seeded().await;
    repo.upsert_game(&game(&home, &away, GameStatus::Scheduled))
        .await
        .unwrap();
    let game_id = repo.find_game_by_upstream_id(14000).await.unwrap().id;
    repo.insert_odds_snapshot(&spread(game_id, -7.0, 0))
        .await
        .unwrap();

    let other_book = OddsKey {
        game_id,
        sportsbook_id: 8,
        market: Market::Spread,
        period: OddsPeriod::FullGame,
    };
    assert!(repo.latest_odds(&other_book).await.unwrap().is_none());

    let first_half = OddsKey {
        period: OddsPeriod::FirstHalf,
        ..other_book
    };
    assert!(repo.latest_odds(&first_half).await.unwrap().is_none());
}

#[tokio::test]
async fn consensus_averages_latest_line_per_book() {
    let (repo, home, away) = seeded().await;
    repo.upsert_game(&game(&home, &away, GameStatus::Scheduled))
        .await
        .unwrap();
    let game_id = repo.find_game_by_upstream_id(14000).await.unwrap().id;

    let book = |sportsbook_id, home_line, minutes| OddsSnapshot {
        sportsbook_id,
        ..spread(game_id, home_line, minutes)
    };
    for snapshot in [
        book(7, -7.0, 0),
        book(7, -6.5, 5),
        book(8, -7.5, 0),
        // Not among the requested books
        book(9, -3.0, 5),
    ] {
        repo.insert_odds_snapshot(&snapshot).await.unwrap();
    }

    assert_eq!(repo.consensus_spread(game_id, &[7, 8]).await.unwrap(), Some(-7.0));
    assert_eq!(repo.consensus_total(game_id, &[7, 8]).await.unwrap(), None);

    let total = OddsSnapshot {
        market: Market::Total,
        home_line: None,
        away_line: None,
        total_line: Some(50.5),
        ..book(8, 0.0, 10)
    };
    repo.insert_odds_snapshot(&total).await.unwrap();
    assert_eq!(repo.consensus_total(game_id, &[7, 8]).await.unwrap(), Some(50.5));
    assert_eq!(repo.consensus_spread(game_id, &[10]).await.unwrap(), None);
}

#[tokio::test]
async fn odds_for_unknown_game_are_rejected() {
    let repo = MemoryRepository::new();
    let err = repo
        .insert_odds_snapshot(&spread(Uuid::new_v4(), -3.0, 0))
        .await
        .unwrap_err();
    assert!(err.is_constraint(), "{err:?}");
    assert_eq!(repo.odds_count().await, 0);
}

#[tokio::test]
async fn active_game_predicate() {
    let now = Utc.with_ymd_and_hms(2024, 10, 5, 20, 0, 0).unwrap();
    let before = now - Duration::minutes(30);
    let after = now + Duration::minutes(30);

    let cases = [
        (GameStatus::Scheduled, before, true),
        (GameStatus::InProgress, before, true),
        (GameStatus::Final, before, false),
        (GameStatus::Postponed, before, false),
        (GameStatus::Canceled, before, false),
        (GameStatus::Scheduled, after, false),
        (GameStatus::InProgress, after, false),
        (GameStatus::Final, after, false),
        (GameStatus::Postponed, after, false),
        (GameStatus::Canceled, after, false),
        (GameStatus::Scheduled, now, false),
    ];

    for (status, scheduled_at, expected) in cases {
        let (repo, home, away) = seeded().await;
        let mut g = game(&home, &away, status);
        g.scheduled_at = scheduled_at;
        repo.upsert_game(&g).await.unwrap();

        let active = repo.active_games(now).await.unwrap();
        assert_eq!(
            active.len() == 1,
            expected,
            "status {status} scheduled at {scheduled_at}"
        );
        assert_eq!(g.is_active(now), expected);
    }
}
