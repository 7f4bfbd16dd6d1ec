use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Diff consistency violation: {0}")]
    Diff(#[from] DiffConsistencyViolation),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Failure to obtain a realm's listing dump. Never fatal: the realm is skipped
/// for the round and its schedule clock stays where it was.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("worker timed out after {0}s")]
    Timeout(u64),

    #[error("worker for {0} exited without reporting")]
    WorkerLost(String),
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Malformed(e.to_string())
    }
}

/// Failure to durably write a round's result. The result stays pending in
/// memory and is retried on the next persistence attempt.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("checkpoint write failed: {0}")]
    Checkpoint(String),

    #[error("catalog write failed: {0}")]
    Catalog(sqlx::Error),

    #[error("current-state write failed: {0}")]
    CurrentState(sqlx::Error),

    #[error("history write failed: {0}")]
    History(sqlx::Error),
}

#[derive(Debug, Error)]
#[error("realm {realm}: listing {listing_id} claimed by chunks {first:?} and {second:?} in one round")]
pub struct DiffConsistencyViolation {
    pub realm: String,
    pub listing_id: u64,
    pub first: crate::types::ChunkKey,
    pub second: crate::types::ChunkKey,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
