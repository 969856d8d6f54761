//! Error taxonomy for the aggregation pipeline

use thiserror::Error;

/// Inbound message could not be turned into a [`Record`](super::types::Record)
///
/// Recovered locally: the message is failed back to the broker and no counter
/// is touched.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("payload is not a valid record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("required field `{0}` is empty")]
    EmptyField(&'static str),

    #[error("field `{0}` must be a string or a number")]
    InvalidField(&'static str),

    #[error("unexpected message shape: {0}")]
    UnexpectedShape(String),
}

/// Export write failure reported by a [`CacheWriter`](super::cache::CacheWriter)
#[derive(Debug, Error)]
pub enum CacheWriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
