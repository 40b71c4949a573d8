//! Error types for the ingestion pipeline

use thiserror::Error;

/// Result type for ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;

/// Errors that can occur while admitting, storing or reading events
#[derive(Error, Debug)]
pub enum IngestError {
    /// Database operation failed (connection, query execution, etc.)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed while opening the store
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Event failed validation (empty field, bad timestamp, too long)
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Intake queue has no free slot; the caller should back off
    #[error("Intake queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Intake queue was closed; no further events are accepted
    #[error("Intake queue closed")]
    QueueClosed,

    /// JSON serialization/deserialization error for payloads
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    /// Check if error is backpressure from the intake queue
    pub fn is_backpressure(&self) -> bool {
        matches!(self, IngestError::QueueFull { .. })
    }

    /// Check if error is transient (a later attempt may succeed)
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Database(sqlx_err) => {
                if matches!(
                    sqlx_err,
                    sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
                ) {
                    return true;
                }
                // SQLITE_BUSY (5) / SQLITE_LOCKED (6)
                sqlx_err
                    .as_database_error()
                    .and_then(|db_err| db_err.code())
                    .map(|code| code == "5" || code == "6")
                    .unwrap_or(false)
            }
            IngestError::QueueFull { .. } => true,
            _ => false,
        }
    }
}

impl From<validator::ValidationErrors> for IngestError {
    fn from(errors: validator::ValidationErrors) -> Self {
        IngestError::InvalidEvent(errors.to_string())
    }
}
