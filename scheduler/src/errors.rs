// Error handling framework

use thiserror::Error;

/// Task store errors
///
/// Every failure of the durable store surfaces as one of these variants.
/// Store failures abort the current invocation; the queue state stays on
/// disk and the next invocation picks up where this one stopped.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Schema setup failed: {0}")]
    SetupFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Payload serialization failed: {0}")]
    Serialization(String),
}

// Implement From for common external errors
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => StoreError::QueryFailed(db_err.message().to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::ConnectionFailed(err.to_string())
            }
            sqlx::Error::Io(io_err) => StoreError::ConnectionFailed(io_err.to_string()),
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
