//! Process configuration.
//!
//! Secrets come from env vars first and fall back to `/run/secrets/*` files
//! (Docker Compose mounts them there; Azure Container Apps injects env vars).

use chrono::NaiveTime;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::odds::{MAJOR_US_GROUP, SHARP_GROUP};

const SECRETS_DIR: &str = "/run/secrets";

pub const DEFAULT_BASE_URL: &str = "https://api.sportsdata.io/v3/cfb";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialSyncMode {
    /// Only when the store has no teams yet
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Historical season/week range imported after the initial sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backfill {
    pub season: i32,
    pub weeks: Vec<i32>,
}

/// Upstream client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub rate_limit_per_minute: u32,
}

impl ClientConfig {
    /// Settings for tests and local tooling pointed at an arbitrary base URL.
    pub fn for_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            max_concurrency: 20,
            max_retries: 3,
            retry_base: Duration::from_millis(1000),
            retry_max: Duration::from_millis(30_000),
            rate_limit_per_minute: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub initial_sync: InitialSyncMode,
    pub backfill: Option<Backfill>,
    pub poll_interval: Duration,
    pub nightly_refresh_at: NaiveTime,
    pub odds_groups: Vec<String>,
    pub line_movement_tracking: bool,
    pub auth_failure_limit: u32,
    pub run_once: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_sync: InitialSyncMode::Auto,
            backfill: None,
            poll_interval: Duration::from_secs(60),
            nightly_refresh_at: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or_default(),
            odds_groups: vec![SHARP_GROUP.to_string(), MAJOR_US_GROUP.to_string()],
            line_movement_tracking: true,
            auth_failure_limit: 3,
            run_once: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub secret: String,
    /// Run line-movement detection for odds pushed through the webhook
    pub line_movement: bool,
}

impl WebhookConfig {
    /// Secret left at `change_me` or another sample value.
    pub fn has_placeholder_secret(&self) -> bool {
        is_placeholder(&self.secret)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub client: ClientConfig,
    pub store: StoreKind,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub run_migrations: bool,
    pub redis_url: Option<String>,
    pub scheduler: SchedulerConfig,
    pub webhook: WebhookConfig,
    pub shutdown_grace: Duration,
    pub health_port: u16,
    pub app_env: String,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| -> Result<Option<String>> {
            match lookup(name) {
                Some(v) if v.trim().is_empty() => {
                    Err(Error::Config(format!("{name} is set but empty")))
                }
                Some(v) => Ok(Some(v.trim().to_string())),
                None => Ok(None),
            }
        };

        let app_env = var("APP_ENV")?.unwrap_or_else(|| "development".to_string());

        let api_key = match var("SPORTSDATA_API_KEY")? {
            Some(v) => v,
            None => read_secret_file(
                &Path::new(SECRETS_DIR).join("sportsdata_api_key"),
                "sportsdata_api_key",
            )?,
        };
        if is_placeholder(&api_key) {
            return Err(Error::Config(
                "SPORTSDATA_API_KEY appears to be a placeholder value; replace with your real key"
                    .to_string(),
            ));
        }

        let client = ClientConfig {
            api_key,
            base_url: var("SPORTSDATA_BASE_URL")?
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout: Duration::from_secs(parse_or(&var, "SPORTSDATA_TIMEOUT_SECS", 30u64)?),
            max_concurrency: parse_or(&var, "API_MAX_CONCURRENCY", 20usize)?.max(1),
            max_retries: parse_or(&var, "API_MAX_RETRIES", 3u32)?,
            retry_base: Duration::from_millis(parse_or(&var, "API_RETRY_BASE_MS", 1000u64)?),
            retry_max: Duration::from_millis(parse_or(&var, "API_RETRY_MAX_MS", 30_000u64)?),
            rate_limit_per_minute: parse_or(&var, "API_RATE_LIMIT", 100u32)?.max(1),
        };

        let store = match var("STORE")?.as_deref().map(str::to_lowercase).as_deref() {
            None | Some("postgres") => StoreKind::Postgres,
            Some("memory") => StoreKind::Memory,
            Some(other) => {
                return Err(Error::Config(format!(
                    "STORE must be postgres or memory, got '{other}'"
                )))
            }
        };

        let database_url = match (store, var("DATABASE_URL")?) {
            (_, Some(url)) => Some(url),
            (StoreKind::Memory, None) => None,
            (StoreKind::Postgres, None) => {
                let user = var("DATABASE_USER")?.unwrap_or_else(|| "ncaaf".to_string());
                let name = var("DATABASE_NAME")?.unwrap_or_else(|| "ncaaf".to_string());
                let host = var("DATABASE_HOST")?.unwrap_or_else(|| "postgres".to_string());
                let port = var("DATABASE_PORT")?.unwrap_or_else(|| "5432".to_string());
                let password = match var("DATABASE_PASSWORD")? {
                    Some(p) => p,
                    None => read_secret_file(
                        &Path::new(SECRETS_DIR).join("db_password"),
                        "db_password",
                    )?,
                };
                Some(format!("postgresql://{user}:{password}@{host}:{port}/{name}"))
            }
        };

        let initial_sync = match var("INITIAL_SYNC")?.as_deref().map(str::to_lowercase).as_deref()
        {
            None | Some("auto") => InitialSyncMode::Auto,
            Some("always") | Some("true") => InitialSyncMode::Always,
            Some("never") | Some("false") => InitialSyncMode::Never,
            Some(other) => {
                return Err(Error::Config(format!(
                    "INITIAL_SYNC must be auto, always or never, got '{other}'"
                )))
            }
        };

        let backfill = match (var("BACKFILL_SEASON")?, var("BACKFILL_WEEKS")?) {
            (Some(season), weeks) => {
                let season = season
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid BACKFILL_SEASON '{season}'")))?;
                let weeks = match weeks {
                    Some(w) => parse_weeks(&w)?,
                    None => Vec::new(),
                };
                Some(Backfill { season, weeks })
            }
            (None, Some(_)) => {
                return Err(Error::Config(
                    "BACKFILL_WEEKS requires BACKFILL_SEASON".to_string(),
                ))
            }
            (None, None) => None,
        };

        let nightly_refresh_at = match var("NIGHTLY_REFRESH_AT")? {
            Some(v) => NaiveTime::parse_from_str(&v, "%H:%M").map_err(|_| {
                Error::Config(format!("NIGHTLY_REFRESH_AT must be HH:MM (UTC), got '{v}'"))
            })?,
            None => SchedulerConfig::default().nightly_refresh_at,
        };

        let odds_groups = match var("ODDS_GROUPS")? {
            Some(v) => {
                let groups: Vec<String> = v
                    .split(',')
                    .map(|g| g.trim().to_uppercase())
                    .filter(|g| !g.is_empty())
                    .collect();
                if groups.is_empty() {
                    return Err(Error::Config("ODDS_GROUPS lists no groups".to_string()));
                }
                groups
            }
            None => SchedulerConfig::default().odds_groups,
        };

        let scheduler = SchedulerConfig {
            enabled: parse_bool(&var, "ENABLE_SCHEDULER", true)?,
            initial_sync,
            backfill,
            poll_interval: Duration::from_secs(
                parse_or(&var, "ACTIVE_GAME_POLL_INTERVAL", 60u64)?.max(1),
            ),
            nightly_refresh_at,
            odds_groups,
            line_movement_tracking: parse_bool(&var, "ENABLE_LINE_MOVEMENT_TRACKING", true)?,
            auth_failure_limit: parse_or(&var, "AUTH_FAILURE_LIMIT", 3u32)?.max(1),
            run_once: parse_bool(&var, "RUN_ONCE", false)?,
        };

        let webhook = WebhookConfig {
            enabled: parse_bool(&var, "WEBHOOK_ENABLED", false)?,
            secret: var("WEBHOOK_SECRET")?.unwrap_or_else(|| "change_me".to_string()),
            line_movement: parse_bool(&var, "WEBHOOK_LINE_MOVEMENT", false)?,
        };
        if webhook.enabled && app_env == "production" && webhook.has_placeholder_secret() {
            return Err(Error::Config(
                "WEBHOOK_SECRET must be set to a real secret in production".to_string(),
            ));
        }

        let log_format = match var("LOG_FORMAT")?.as_deref().map(str::to_lowercase).as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(Error::Config(format!(
                    "LOG_FORMAT must be text or json, got '{other}'"
                )))
            }
        };

        Ok(Self {
            client,
            store,
            database_url,
            database_max_connections: parse_or(&var, "DATABASE_MAX_CONNECTIONS", 10u32)?.max(1),
            run_migrations: parse_bool(&var, "RUN_MIGRATIONS", false)?,
            redis_url: var("REDIS_URL")?,
            scheduler,
            webhook,
            shutdown_grace: Duration::from_secs(parse_or(&var, "SHUTDOWN_GRACE_SECS", 30u64)?),
            health_port: parse_or(&var, "HEALTH_PORT", 9090u16)?,
            app_env,
            log_format,
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}

/// Read a secret from a Docker secret file.
fn read_secret_file(path: &Path, secret_name: &str) -> Result<String> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            Error::Config(format!(
                "secret {secret_name} not set and not readable at {}: {e}",
                path.display()
            ))
        })
}

fn is_placeholder(value: &str) -> bool {
    let lower = value.trim().to_lowercase();
    lower.contains("change_me") || lower.contains("your_") || lower.starts_with("sample")
}

fn parse_or<T, V>(var: &V, name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    V: Fn(&str) -> Result<Option<String>>,
{
    match var(name)? {
        Some(v) => v
            .parse()
            .map_err(|_| Error::Config(format!("invalid value for {name}: '{v}'"))),
        None => Ok(default),
    }
}

fn parse_bool<V>(var: &V, name: &str, default: bool) -> Result<bool>
where
    V: Fn(&str) -> Result<Option<String>>,
{
    match var(name)?.map(|v| v.to_lowercase()).as_deref() {
        None => Ok(default),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some("false") | Some("0") | Some("no") => Ok(false),
        Some(other) => Err(Error::Config(format!(
            "{name} must be true or false, got '{other}'"
        ))),
    }
}

/// Parse `10-15`, `10,11` or a mix such as `1-3,7`.
pub fn parse_weeks(raw: &str) -> Result<Vec<i32>> {
    let invalid = || Error::Config(format!("invalid BACKFILL_WEEKS '{raw}'"));
    let mut weeks = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: i32 = start.trim().parse().map_err(|_| invalid())?;
                let end: i32 = end.trim().parse().map_err(|_| invalid())?;
                if start > end {
                    return Err(invalid());
                }
                weeks.extend(start..=end);
            }
            None => weeks.push(part.parse().map_err(|_| invalid())?),
        }
    }
    weeks.sort_unstable();
    weeks.dedup();
    Ok(weeks)
}
