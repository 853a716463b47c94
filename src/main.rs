//! NCAAF Data Ingestion Service
//!
//! Keeps a Postgres store of college football teams, schedules, scores, team
//! stats and sportsbook odds in sync with SportsDataIO, and detects line
//! movement as odds snapshots arrive.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ncaaf_ingestion::client::{RateLimitedClient, SportsDataClient, SportsDataSource};
use ncaaf_ingestion::config::{Config, LogFormat, StoreKind};
use ncaaf_ingestion::ingest::Ingestor;
use ncaaf_ingestion::metrics::Metrics;
use ncaaf_ingestion::publisher::RedisPublisher;
use ncaaf_ingestion::repository::{MemoryRepository, PgRepository, Repository};
use ncaaf_ingestion::scheduler::SyncScheduler;
use ncaaf_ingestion::server::{self, AppState, HealthState};
use ncaaf_ingestion::shutdown::ShutdownHandle;
use ncaaf_ingestion::webhook::WebhookState;
use ncaaf_ingestion::{SERVICE_NAME, VERSION};

const CONNECT_RETRIES: u32 = 5;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ncaaf_ingestion=info"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn Repository>> {
    match config.store {
        StoreKind::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required when STORE=postgres")?;
            let repo = PgRepository::connect_with_retry(
                url,
                config.database_max_connections,
                CONNECT_RETRIES,
            )
            .await
            .context("failed to connect to PostgreSQL")?;

            if config.run_migrations {
                repo.migrate().await.context("failed to run migrations")?;
                info!("Migrations applied");
            }
            Ok(Arc::new(repo))
        }
        StoreKind::Memory => {
            warn!("STORE=memory: nothing will be persisted");
            Ok(Arc::new(MemoryRepository::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is a development convenience; production reads env vars and /run/secrets
    if std::env::var("APP_ENV").map_or(true, |env| env != "production") {
        let _ = dotenvy::dotenv();
    }

    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(config.log_format);

    info!(
        service = SERVICE_NAME,
        version = VERSION,
        env = %config.app_env,
        "NCAAF ingestion service starting"
    );

    let metrics = Arc::new(Metrics::new());
    let (shutdown_handle, shutdown) = ShutdownHandle::new();

    let repo = open_store(&config).await?;

    let mut ingestor = Ingestor::new(repo.clone(), metrics.clone());
    if let Some(url) = &config.redis_url {
        match RedisPublisher::connect_with_retry(url, CONNECT_RETRIES).await {
            Ok(publisher) => ingestor = ingestor.with_publisher(publisher),
            Err(e) => warn!(error = %e, "Redis unavailable, line movements will not be published"),
        }
    }
    let ingestor = Arc::new(ingestor);

    let transport = RateLimitedClient::new(config.client.clone(), metrics.clone())
        .context("failed to build SportsDataIO client")?;
    let source: Arc<dyn SportsDataSource> =
        Arc::new(SportsDataClient::new(transport, shutdown.clone()));

    let health = HealthState::new();
    if config.webhook.enabled && config.webhook.has_placeholder_secret() {
        warn!("WEBHOOK_SECRET is a placeholder; anyone can forge webhook signatures");
    }
    let webhook = config.webhook.enabled.then(|| {
        WebhookState::new(
            &config.webhook.secret,
            ingestor.clone(),
            metrics.clone(),
            config.webhook.line_movement,
        )
    });
    let app = server::router(
        AppState {
            health: health.clone(),
            metrics: metrics.clone(),
            repo: repo.clone(),
        },
        webhook,
    );

    let addr = format!("0.0.0.0:{}", config.health_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let server_task = tokio::spawn(server::serve(listener, app, shutdown.clone()));

    let scheduler = Arc::new(SyncScheduler::new(
        source,
        ingestor,
        config.scheduler.clone(),
        health,
        metrics,
        shutdown.clone(),
    ));

    if config.scheduler.run_once {
        let result = scheduler.run().await;
        shutdown_handle.trigger();
        let _ = server_task.await;
        return result.context("one-shot sync failed");
    }

    let mut scheduler_task = if config.scheduler.enabled {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    } else {
        info!("Scheduler disabled (ENABLE_SCHEDULER=false), serving HTTP only");
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.wait().await;
            Ok::<(), ncaaf_ingestion::Error>(())
        })
    };

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
        result = &mut scheduler_task => {
            shutdown_handle.trigger();
            let _ = server_task.await;
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!(error = %e, "Scheduler stopped");
                    Err(e).context("scheduler stopped")
                }
                Err(e) => Err(e).context("scheduler task panicked"),
            };
        }
    }

    shutdown_handle.trigger();
    let drain = async {
        if let Ok(Err(e)) = scheduler_task.await {
            warn!(error = %e, "Scheduler finished with error during shutdown");
        }
        let _ = server_task.await;
    };
    if tokio::time::timeout(config.shutdown_grace, drain).await.is_err() {
        warn!(
            grace_secs = config.shutdown_grace.as_secs(),
            "Shutdown grace period elapsed, abandoning in-flight work"
        );
    }

    info!("Shutdown complete");
    Ok(())
}
