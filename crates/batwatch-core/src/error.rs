//! Error types shared by the store, dispatcher and prediction client.

use thiserror::Error;

/// Result alias for Batwatch operations.
pub type BatwatchResult<T> = Result<T, BatwatchError>;

#[derive(Error, Debug)]
pub enum BatwatchError {
    #[error("store: {0}")]
    Store(#[from] sled::Error),

    #[error("document encoding: {0}")]
    Json(#[from] serde_json::Error),

    #[error("prediction api request: {0}")]
    Http(#[from] reqwest::Error),

    #[error("prediction api {0}: {1}")]
    Api(u16, String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("unit {0} is busy")]
    Busy(String),

    #[error("illegal record transition {from} -> {to}")]
    Transition { from: String, to: String },
}
