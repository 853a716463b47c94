//! Health, metrics and webhook routes through the full router.

mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use ncaaf_ingestion::metrics::Metrics;
use ncaaf_ingestion::models::GameStatus;
use ncaaf_ingestion::repository::Repository;
use ncaaf_ingestion::scheduler::SchedulerState;
use ncaaf_ingestion::server::{self, AppState};
use ncaaf_ingestion::webhook::{self, WebhookState, SIGNATURE_HEADER, WEBHOOK_PATH};
use support::Harness;

const SECRET: &str = "whsec_test";

fn app(h: &Harness, webhooks: bool) -> Router {
    let state = AppState {
        health: h.health.clone(),
        metrics: h.metrics.clone(),
        repo: h.store(),
    };
    let webhook = webhooks
        .then(|| WebhookState::new(SECRET, h.ingestor.clone(), h.metrics.clone(), true));
    server::router(state, webhook)
}

async fn get(app: Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

async fn post_webhook(app: Router, body: &str, signature: Option<String>) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        request = request.header(SIGNATURE_HEADER, signature);
    }
    let response = app
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn signed(body: &str) -> Option<String> {
    Some(format!("sha256={}", webhook::sign(SECRET, body.as_bytes())))
}

#[tokio::test]
async fn health_reports_scheduler_and_store() {
    let h = Harness::new();
    h.health.set_scheduler_state(SchedulerState::Steady).await;
    h.health.record_success(4).await;

    let (status, body) = get(app(&h, false), "/health").await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["service"], "ncaaf-ingestion");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["scheduler_state"], "steady");
    assert_eq!(body["last_cycle_games"], 4);
    assert_eq!(body["consecutive_errors"], 0);
    assert_eq!(body["database"], "ok");
    assert!(body["last_cycle"].is_string());
}

#[tokio::test]
async fn health_degrades_with_consecutive_failures() {
    let h = Harness::new();
    for _ in 0..6 {
        h.health.record_error().await;
    }
    let (status, body) = get(app(&h, false), "/health").await;
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");

    for _ in 0..5 {
        h.health.record_error().await;
    }
    let (status, _) = get(app(&h, false), "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    h.health.record_success(0).await;
    let (status, _) = get(app(&h, false), "/health").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn halted_scheduler_is_unavailable() {
    let h = Harness::new();
    h.health.halt();
    let (status, body) = get(app(&h, false), "/health").await;
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "halted");
}

#[tokio::test]
async fn metrics_are_prometheus_text() {
    let h = Harness::new();
    Metrics::add(&h.metrics.odds_snapshots, 12);
    let (status, body) = get(app(&h, false), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("# TYPE ncaaf_odds_snapshots_total counter"));
    assert!(body.contains("ncaaf_odds_snapshots_total 12"));
    assert!(body.contains("ncaaf_sync_cycle_duration_ms 0"));
}

#[tokio::test]
async fn webhook_route_absent_when_disabled() {
    let h = Harness::new();
    let (status, _) = post_webhook(app(&h, false), "{}", signed("{}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_rejects_bad_signatures() {
    let h = Harness::new();
    let body = r#"{"EventType":"GameUpdated","Game":{}}"#;

    let (status, _) = post_webhook(app(&h, true), body, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = Some(webhook::sign("someone-else", body.as_bytes()));
    let (status, _) = post_webhook(app(&h, true), body, forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(Metrics::get(&h.metrics.webhook_rejections), 2);
    assert_eq!(h.repo.game_count().await, 0);
}

#[tokio::test]
async fn webhook_rejects_malformed_payloads() {
    let h = Harness::new();
    let body = "{not json";
    let (status, _) = post_webhook(app(&h, true), body, signed(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = r#"{"EventType":"GameUpdated","Game":{"GameID":1}}"#;
    let (status, _) = post_webhook(app(&h, true), body, signed(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_game_update_is_applied() {
    let h = Harness::new();
    h.seed_teams(2).await;
    let body = json!({
        "EventType": "GameUpdated",
        "Game": {
            "GameID": 500,
            "Season": 2024,
            "Week": 6,
            "HomeTeam": "T1",
            "AwayTeam": "T2",
            "DateTimeUTC": "2024-10-05T19:30:00",
            "Status": "InProgress",
            "HomeScore": 14,
            "AwayScore": 10,
        },
    })
    .to_string();

    let (status, reply) = post_webhook(app(&h, true), &body, signed(&body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(reply["outcome"], "inserted");

    let game = h.repo.find_game_by_upstream_id(500).await.unwrap();
    assert_eq!(game.status, GameStatus::InProgress);
    assert_eq!(game.home_score, Some(14));

    // Redelivery of the same event changes nothing
    let (status, reply) = post_webhook(app(&h, true), &body, signed(&body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(reply["outcome"], "unchanged");
    assert_eq!(Metrics::get(&h.metrics.webhook_events), 2);
}

#[tokio::test]
async fn webhook_odds_update_detects_movement() {
    let h = Harness::new();
    h.seed_teams(2).await;
    h.ingestor
        .ingest_games(vec![support::live_game(600, "T1", "T2")])
        .await;

    for spread in [-3.0, -4.5] {
        let body = json!({
            "EventType": "OddsUpdated",
            "GameOdds": {
                "GameId": 600,
                "PregameOdds": [{
                    "SportsbookId": 7,
                    "OddType": "Game",
                    "HomePointSpread": spread,
                    "AwayPointSpread": -spread,
                }],
            },
        })
        .to_string();
        let (status, reply) = post_webhook(app(&h, true), &body, signed(&body)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(reply["summary"]["snapshots_written"], 1);
    }

    let game = h.repo.find_game_by_upstream_id(600).await.unwrap();
    let movements = h.repo.line_movements(game.id).await.unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].magnitude, 1.5);
}
