use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    #[error("No sync steps configured. Add [[steps]] entries to {0}")]
    NoSteps(PathBuf),

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Step `{0}` has no failure list configured")]
    NotRetryable(String),

    #[error("Infrastructure error: {0}")]
    Infra(String),

    #[error("Timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },

    #[error("Invalid table name {0:?}: only letters, digits and underscores are allowed")]
    InvalidTableName(String),

    #[error("Table `{0}` does not exist")]
    TableMissing(String),

    #[error("Table `{0}` is empty")]
    EmptyTable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SyncError {
    /// Process exit code reported to the scheduler for this error class.
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Config(_)
            | SyncError::MissingEnv(_)
            | SyncError::NoSteps(_)
            | SyncError::StepNotFound(_)
            | SyncError::NotRetryable(_)
            | SyncError::Toml(_) => 2,
            SyncError::Infra(_) | SyncError::Timeout { .. } => 3,
            _ => 1,
        }
    }
}
