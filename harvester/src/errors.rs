use std::io;

use thiserror::Error;

/// A raw payload could not be turned into a record. Never fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("required field '{0}' is missing or blank")]
    MissingField(&'static str),
    #[error("payload is malformed: {0}")]
    Malformed(String),
}

/// The identity ledger cannot be opened, read or written. Always fatal for
/// the whole run.
#[derive(Debug, Error)]
pub enum IdentityStoreError {
    #[error("identity ledger unavailable at '{location}': {reason}")]
    Unavailable { location: String, reason: String },
}

impl IdentityStoreError {
    pub fn unavailable(location: impl Into<String>, reason: impl ToString) -> Self {
        IdentityStoreError::Unavailable {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}

/// One export destination failed. Captured in that sink's outcome only.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("json encode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("network error: {0}")]
    Network(String),
    #[error("remote API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("sink misconfigured: {0}")]
    Config(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Network(err.to_string())
    }
}

/// Failures at the external collector boundary.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("collector unreachable: {0}")]
    Unreachable(String),
    #[error("collector API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("collector returned an undecodable response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for CollectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CollectorError::Decode(err.to_string())
        } else {
            CollectorError::Unreachable(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Why a single keyword run did not complete.
#[derive(Debug, Error)]
pub enum KeywordError {
    #[error(transparent)]
    IdentityStore(#[from] IdentityStoreError),
    #[error(transparent)]
    Collector(#[from] CollectorError),
}

impl KeywordError {
    /// Ledger failures poison every remaining keyword.
    pub fn is_ledger_failure(&self) -> bool {
        matches!(self, KeywordError::IdentityStore(_))
    }
}
