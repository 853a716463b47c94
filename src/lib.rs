//! NCAA football data ingestion.
//!
//! Pulls teams, stadiums, schedules, season stats, box scores and odds from
//! SportsDataIO, keeps a PostgreSQL store eventually consistent with it and
//! records betting-line movement between successive odds snapshots.

pub mod client;
pub mod config;
pub mod error;
pub mod ingest;
pub mod line_movement;
pub mod metrics;
pub mod models;
pub mod publisher;
pub mod repository;
pub mod scheduler;
pub mod server;
pub mod shutdown;
pub mod webhook;

pub use error::{ClientError, Error, RepoError, Result, ValidationError};

pub const SERVICE_NAME: &str = "ncaaf-ingestion";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
