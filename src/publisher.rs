//! Redis stream publisher for detected line movements.

use redis::AsyncCommands;
use std::time::Duration;
use tracing::{info, warn};

use crate::models::LineMovement;

pub const LINE_MOVEMENT_STREAM: &str = "ncaaf.line_movement";

/// Approximate cap on stream length so the stream cannot grow without bound.
const STREAM_MAX_LEN: usize = 100_000;

#[derive(Clone)]
pub struct RedisPublisher {
    conn: redis::aio::ConnectionManager,
}

impl RedisPublisher {
    /// Connect, retrying with exponential backoff (2s, 4s, 8s, ...).
    pub async fn connect_with_retry(url: &str, max_retries: u32) -> redis::RedisResult<Self> {
        let mut attempt = 0;
        loop {
            let result = match redis::Client::open(url) {
                Ok(client) => redis::aio::ConnectionManager::new(client).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(conn) => {
                    info!("Connected to Redis");
                    return Ok(Self { conn });
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_retries {
                        return Err(e);
                    }
                    warn!(attempt, error = %e, "Redis connection failed, retrying");
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
    }

    /// Append each movement to the stream. Returns how many were published.
    pub async fn publish(&self, movements: &[LineMovement]) -> redis::RedisResult<usize> {
        if movements.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.clone();
        for movement in movements {
            let payload = serde_json::to_string(movement).map_err(|e| {
                redis::RedisError::from((
                    redis::ErrorKind::TypeError,
                    "failed to serialize line movement",
                    e.to_string(),
                ))
            })?;

            let _: String = conn
                .xadd_maxlen(
                    LINE_MOVEMENT_STREAM,
                    redis::streams::StreamMaxlen::Approx(STREAM_MAX_LEN),
                    "*",
                    &[
                        ("game_id", movement.game_id.to_string()),
                        ("sportsbook", movement.sportsbook_id.to_string()),
                        ("market", movement.market.as_str().to_string()),
                        ("data", payload),
                    ],
                )
                .await?;
        }

        info!(count = movements.len(), "Published line movements to Redis");
        Ok(movements.len())
    }
}
