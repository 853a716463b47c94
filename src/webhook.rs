//! Push updates from the provider.
//!
//! Deliveries are signed with HMAC-SHA256 over the raw body; the hex digest
//! arrives in `X-SportsData-Signature`, optionally prefixed with `sha256=`.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Error, RepoError};
use crate::ingest::Ingestor;
use crate::metrics::Metrics;
use crate::models::{GameInput, GameOddsInput, GameUpdate};

type HmacSha256 = Hmac<Sha256>;

pub const WEBHOOK_PATH: &str = "/webhooks/sportsdata";
pub const SIGNATURE_HEADER: &str = "x-sportsdata-signature";

#[derive(Debug, Deserialize)]
#[serde(tag = "EventType")]
pub enum WebhookEvent {
    GameUpdated {
        #[serde(rename = "Game")]
        game: GameInput,
    },
    OddsUpdated {
        #[serde(rename = "GameOdds")]
        odds: GameOddsInput,
    },
}

#[derive(Clone)]
pub struct WebhookState {
    secret: Arc<str>,
    ingestor: Arc<Ingestor>,
    metrics: Arc<Metrics>,
    line_movement: bool,
}

impl WebhookState {
    pub fn new(
        secret: &str,
        ingestor: Arc<Ingestor>,
        metrics: Arc<Metrics>,
        line_movement: bool,
    ) -> Self {
        Self {
            secret: Arc::from(secret),
            ingestor,
            metrics,
            line_movement,
        }
    }
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(receive))
        .with_state(state)
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a signature header against the body.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let digest = header.trim();
    let digest = digest.strip_prefix("sha256=").unwrap_or(digest);
    let Ok(expected) = hex::decode(digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

type Reply = (StatusCode, Json<serde_json::Value>);

fn reject(metrics: &Metrics, status: StatusCode, reason: &str) -> Reply {
    Metrics::inc(&metrics.webhook_rejections);
    warn!(status = status.as_u16(), reason, "Rejected webhook delivery");
    (status, Json(json!({ "error": reason })))
}

async fn receive(State(state): State<WebhookState>, headers: HeaderMap, body: Bytes) -> Reply {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    match signature {
        Some(sig) if verify_signature(&state.secret, &body, sig) => {}
        _ => return reject(&state.metrics, StatusCode::UNAUTHORIZED, "invalid signature"),
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            return reject(
                &state.metrics,
                StatusCode::BAD_REQUEST,
                &format!("invalid payload: {e}"),
            )
        }
    };

    match event {
        WebhookEvent::GameUpdated { game } => {
            let update = match GameUpdate::try_from(game) {
                Ok(update) => update,
                Err(e) => {
                    return reject(&state.metrics, StatusCode::BAD_REQUEST, &e.to_string())
                }
            };
            let game_id = update.upstream_id;
            Metrics::inc(&state.metrics.webhook_events);
            match state.ingestor.ingest_game(update).await {
                Ok(outcome) => {
                    info!(game = game_id, ?outcome, "Webhook game update applied");
                    accepted(json!({
                        "event": "game_updated",
                        "game_id": game_id,
                        "outcome": outcome,
                    }))
                }
                Err(Error::Repo(RepoError::NotFound { entity, key })) => accepted(json!({
                    "event": "game_updated",
                    "game_id": game_id,
                    "outcome": "skipped",
                    "reason": format!("{entity} {key} not found"),
                })),
                Err(e) => write_failed(&e),
            }
        }
        WebhookEvent::OddsUpdated { odds } => {
            let game_id = odds.game_id;
            Metrics::inc(&state.metrics.webhook_events);
            match state
                .ingestor
                .ingest_game_odds(odds, state.line_movement)
                .await
            {
                Ok(summary) => {
                    info!(
                        game = ?game_id,
                        snapshots = summary.snapshots_written,
                        movements = summary.movements_detected,
                        "Webhook odds update applied"
                    );
                    accepted(json!({
                        "event": "odds_updated",
                        "game_id": game_id,
                        "summary": summary,
                    }))
                }
                Err(e) => write_failed(&e),
            }
        }
    }
}

fn accepted(body: serde_json::Value) -> Reply {
    (StatusCode::ACCEPTED, Json(body))
}

fn write_failed(error: &Error) -> Reply {
    warn!(error = %error, "Webhook write failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "store write failed" })),
    )
}
