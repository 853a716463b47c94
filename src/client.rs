//! SportsDataIO client.
//!
//! [`RateLimitedClient`] owns the transport policy: a concurrency cap, a
//! per-minute request quota and bounded exponential retry for transient
//! failures. [`SportsDataClient`] layers the typed endpoints on top and is the
//! production [`SportsDataSource`].

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::metrics::Metrics;
use crate::models::odds::latest_per_book;
use crate::models::{
    BoxScoreInput, GameInput, GameOddsInput, OddsInput, StadiumInput, TeamInput,
    TeamSeasonStatsInput,
};
use crate::shutdown::Shutdown;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const AUTH_HEADER: &str = "ocp-apim-subscription-key";
const QUOTA_HEADER: &str = "x-requests-remaining";
const MAX_ERROR_BODY: usize = 512;

/// Delay before retry `retry` (1-based): `min(base * 2^(retry-1), max)`.
pub fn backoff_delay(base: Duration, max: Duration, retry: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry.saturating_sub(1));
    base.checked_mul(factor).unwrap_or(max).min(max)
}

/// HTTP statuses worth retrying.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

enum AttemptError {
    Transient {
        status: Option<u16>,
        message: String,
    },
    Fatal(ClientError),
}

pub struct RateLimitedClient {
    http: reqwest::Client,
    config: ClientConfig,
    permits: Arc<Semaphore>,
    limiter: DirectLimiter,
    metrics: Arc<Metrics>,
}

impl RateLimitedClient {
    pub fn new(config: ClientConfig, metrics: Arc<Metrics>) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|e| ClientError::Build(format!("invalid API key header: {e}")))?;
        headers.insert(AUTH_HEADER, key);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(format!("{}/{}", crate::SERVICE_NAME, crate::VERSION))
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(config.max_concurrency)
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;

        let per_minute = NonZeroU32::new(config.rate_limit_per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.max_concurrency as u32).unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_minute(per_minute).allow_burst(burst));

        Ok(Self {
            http,
            permits: Arc::new(Semaphore::new(config.max_concurrency)),
            limiter,
            metrics,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Permits not currently held by an in-flight attempt.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// GET `path` relative to the base URL and return the body of a 2xx response.
    pub async fn fetch(
        &self,
        path: &str,
        query: &[(&str, &str)],
        shutdown: &Shutdown,
    ) -> Result<String, ClientError> {
        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut shutdown = shutdown.clone();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let result = {
                let _permit = tokio::select! {
                    permit = self.permits.acquire() => {
                        permit.map_err(|_| ClientError::Cancelled)?
                    }
                    _ = shutdown.wait() => return Err(ClientError::Cancelled),
                };
                tokio::select! {
                    _ = self.limiter.until_ready() => {}
                    _ = shutdown.wait() => return Err(ClientError::Cancelled),
                }
                self.attempt(&url, path, query, attempt).await
            };

            match result {
                Ok(body) => return Ok(body),
                Err(AttemptError::Fatal(e)) => {
                    Metrics::inc(&self.metrics.api_failures);
                    return Err(e);
                }
                Err(AttemptError::Transient { status, message }) => {
                    if attempt > self.config.max_retries {
                        Metrics::inc(&self.metrics.api_failures);
                        return Err(ClientError::Transient {
                            path: path.to_string(),
                            status,
                            attempts: attempt,
                            message,
                        });
                    }

                    let delay =
                        backoff_delay(self.config.retry_base, self.config.retry_max, attempt);
                    Metrics::inc(&self.metrics.api_retries);
                    warn!(
                        path,
                        attempt,
                        status = ?status,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Transient upstream failure, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.wait() => return Err(ClientError::Cancelled),
                    }
                }
            }
        }
    }

    /// [`fetch`](Self::fetch) and decode the body as JSON.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        shutdown: &Shutdown,
    ) -> Result<T, ClientError> {
        let body = self.fetch(path, query, shutdown).await?;
        serde_json::from_str(&body).map_err(|source| {
            Metrics::inc(&self.metrics.api_failures);
            warn!(
                path,
                body_len = body.len(),
                error = %source,
                "Failed to decode upstream response"
            );
            ClientError::Decode {
                path: path.to_string(),
                source,
            }
        })
    }

    async fn attempt(
        &self,
        url: &str,
        path: &str,
        query: &[(&str, &str)],
        attempt: u32,
    ) -> Result<String, AttemptError> {
        Metrics::inc(&self.metrics.api_calls);
        let started = Instant::now();

        let response = match self.http.get(url).query(query).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    path,
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "Upstream request failed"
                );
                return Err(AttemptError::Transient {
                    status: None,
                    message: e.to_string(),
                });
            }
        };

        if let Some(remaining) = response.headers().get(QUOTA_HEADER) {
            debug!(
                remaining = remaining.to_str().unwrap_or("?"),
                "API requests remaining"
            );
        }

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    path,
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    status = status.as_u16(),
                    error = %e,
                    "Failed to read upstream response body"
                );
                return Err(AttemptError::Transient {
                    status: Some(status.as_u16()),
                    message: format!("failed to read response body: {e}"),
                });
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(path, attempt, elapsed_ms, status = status.as_u16(), "Upstream call");

        if status.is_success() {
            return Ok(body);
        }

        let code = status.as_u16();
        let body = truncate(body);
        match code {
            401 | 403 => Err(AttemptError::Fatal(ClientError::Auth { status: code, body })),
            c if is_transient_status(c) => Err(AttemptError::Transient {
                status: Some(code),
                message: format!("status {code}: {body}"),
            }),
            _ => Err(AttemptError::Fatal(ClientError::Provider { status: code, body })),
        }
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

/// Everything the sync pipeline reads from the provider.
#[async_trait]
pub trait SportsDataSource: Send + Sync {
    async fn current_season(&self) -> Result<i32, ClientError>;

    /// `None` outside the season.
    async fn current_week(&self) -> Result<Option<i32>, ClientError>;

    async fn teams(&self) -> Result<Vec<TeamInput>, ClientError>;

    async fn stadiums(&self) -> Result<Vec<StadiumInput>, ClientError>;

    async fn games(&self, season: i32) -> Result<Vec<GameInput>, ClientError>;

    async fn team_season_stats(&self, season: i32)
        -> Result<Vec<TeamSeasonStatsInput>, ClientError>;

    async fn game_odds_by_week(
        &self,
        season: i32,
        week: i32,
        group: &str,
    ) -> Result<Vec<GameOddsInput>, ClientError>;

    /// Current line per sportsbook and odd type for one game.
    async fn game_odds(&self, game_id: i64, group: &str) -> Result<Vec<OddsInput>, ClientError>;

    async fn box_scores_by_week(
        &self,
        season: i32,
        week: i32,
    ) -> Result<Vec<BoxScoreInput>, ClientError>;

    /// `None` until the provider has a box score for the game.
    async fn box_score(&self, game_id: i64) -> Result<Option<BoxScoreInput>, ClientError>;
}

/// Typed SportsDataIO CFB v3 endpoints.
pub struct SportsDataClient {
    inner: RateLimitedClient,
    shutdown: Shutdown,
}

impl SportsDataClient {
    pub fn new(inner: RateLimitedClient, shutdown: Shutdown) -> Self {
        Self { inner, shutdown }
    }

    pub fn transport(&self) -> &RateLimitedClient {
        &self.inner
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ClientError> {
        self.inner.fetch_json(path, query, &self.shutdown).await
    }
}

#[async_trait]
impl SportsDataSource for SportsDataClient {
    async fn current_season(&self) -> Result<i32, ClientError> {
        self.get("scores/json/CurrentSeason", &[]).await
    }

    async fn current_week(&self) -> Result<Option<i32>, ClientError> {
        self.get("scores/json/CurrentWeek", &[]).await
    }

    async fn teams(&self) -> Result<Vec<TeamInput>, ClientError> {
        let teams: Vec<TeamInput> = self.get("scores/json/Teams", &[]).await?;
        info!(count = teams.len(), "Fetched teams");
        Ok(teams)
    }

    async fn stadiums(&self) -> Result<Vec<StadiumInput>, ClientError> {
        self.get("scores/json/Stadiums", &[]).await
    }

    async fn games(&self, season: i32) -> Result<Vec<GameInput>, ClientError> {
        let games: Vec<GameInput> = self
            .get(&format!("scores/json/Games/{season}"), &[])
            .await?;
        info!(season, count = games.len(), "Fetched schedule");
        Ok(games)
    }

    async fn team_season_stats(
        &self,
        season: i32,
    ) -> Result<Vec<TeamSeasonStatsInput>, ClientError> {
        self.get(&format!("scores/json/TeamSeasonStats/{season}"), &[])
            .await
    }

    async fn game_odds_by_week(
        &self,
        season: i32,
        week: i32,
        group: &str,
    ) -> Result<Vec<GameOddsInput>, ClientError> {
        self.get(
            &format!("odds/json/GameOddsByWeek/{season}/{week}"),
            &[("groups", group)],
        )
        .await
    }

    async fn game_odds(&self, game_id: i64, group: &str) -> Result<Vec<OddsInput>, ClientError> {
        let history: Vec<GameOddsInput> = self
            .get(
                &format!("odds/json/GameOddsLineMovement/{game_id}"),
                &[("groups", group)],
            )
            .await?;
        let entries: Vec<OddsInput> = history
            .into_iter()
            .flat_map(GameOddsInput::into_odds)
            .collect();
        Ok(latest_per_book(entries))
    }

    async fn box_scores_by_week(
        &self,
        season: i32,
        week: i32,
    ) -> Result<Vec<BoxScoreInput>, ClientError> {
        self.get(&format!("stats/json/BoxScoresByWeek/{season}/{week}"), &[])
            .await
    }

    async fn box_score(&self, game_id: i64) -> Result<Option<BoxScoreInput>, ClientError> {
        self.get(&format!("stats/json/BoxScore/{game_id}"), &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        let delays: Vec<u64> = (1..=7)
            .map(|n| backoff_delay(base, max, n).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn backoff_survives_huge_retry_counts() {
        let max = Duration::from_secs(30);
        assert_eq!(backoff_delay(Duration::from_secs(1), max, 200), max);
    }

    #[test]
    fn backoff_is_non_decreasing() {
        let base = Duration::from_millis(250);
        let max = Duration::from_secs(5);
        let mut previous = Duration::ZERO;
        for retry in 1..20 {
            let delay = backoff_delay(base, max, retry);
            assert!(delay >= previous);
            assert!(delay <= max);
            previous = delay;
        }
    }

    #[test]
    fn transient_statuses() {
        for status in [429, 502, 503, 504] {
            assert!(is_transient_status(status));
        }
        for status in [400, 401, 403, 404, 500] {
            assert!(!is_transient_status(status));
        }
    }

    #[test]
    fn error_bodies_truncated_on_char_boundary() {
        let body = "é".repeat(400);
        let cut = truncate(body);
        assert!(cut.len() <= MAX_ERROR_BODY);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
