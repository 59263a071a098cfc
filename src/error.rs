//! Error types for the session report pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed record body in {key}: {reason}")]
    RecordParse { key: String, reason: String },

    #[error("Record {key} is missing required field: {path}")]
    RecordSchema { key: String, path: String },

    #[error("Transient storage error: {0}")]
    StorageTransient(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("No sessions matched the requested window and bot id")]
    EmptyResult,

    #[error("Notification dispatch failed: {0}")]
    Delivery(String),

    #[error("Rendering failed: {0}")]
    Render(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("CSV export error: {0}")]
    CsvError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error is worth retrying (network-level storage failures).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StorageTransient(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::CsvError(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Error::StorageTransient(err.to_string())
        } else {
            Error::Storage(err.to_string())
        }
    }
}
