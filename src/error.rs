use thiserror::Error;

/// Errors surfaced by the upstream API client after its own retry policy has run.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network failure or 429/502/503/504 that outlived every retry.
    #[error("transient upstream failure on {path} after {attempts} attempts: {message}")]
    Transient {
        path: String,
        status: Option<u16>,
        attempts: u32,
        message: String,
    },

    #[error("upstream authentication failed (status {status}): {body}")]
    Auth { status: u16, body: String },

    #[error("upstream returned status {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("failed to decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Build(String),

    #[error("request cancelled by shutdown")]
    Cancelled,
}

impl ClientError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Auth { .. })
    }
}

/// Store errors.
#[derive(Error, Debug)]
pub enum RepoError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Unique or foreign-key violation.
    #[error("{entity} violates a constraint: {detail}")]
    Constraint { entity: &'static str, detail: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl RepoError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        RepoError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::NotFound { .. })
    }

    pub fn constraint(entity: &'static str, detail: impl Into<String>) -> Self {
        RepoError::Constraint {
            entity,
            detail: detail.into(),
        }
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self, RepoError::Constraint { .. })
    }
}

/// A provider record that cannot be mapped onto a domain entity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{record} record missing required field {field}")]
    MissingField {
        record: &'static str,
        field: &'static str,
    },

    #[error("unknown game status '{0}'")]
    UnknownStatus(String),

    #[error("unknown odds type '{0}'")]
    UnknownOddType(String),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
}

impl ValidationError {
    pub(crate) fn missing(record: &'static str, field: &'static str) -> Self {
        ValidationError::MissingField { record, field }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("scheduler halted: {0}")]
    Halted(String),
}

impl Error {
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Client(e) if e.is_auth())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
