use thea_model::{MediaId, TargetId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("catalogue request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("scrape failed for {path}: {message}")]
    Scrape { path: String, message: String },

    #[error("transcoder failure: {0}")]
    Transcoder(String),

    #[error("a transcode already exists for media {media_id} and target {target_id}")]
    DuplicateTranscode {
        media_id: MediaId,
        target_id: TargetId,
    },

    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
