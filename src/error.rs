// File: src/error.rs
// Failure taxonomy shared by both gateways and the synchronizer

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single gateway fetch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network or storage failure; retried on the next poll tick
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// No record for the requested key
    #[error("not found: {0}")]
    NotFound(String),

    /// Payload parsed but violates the expected schema
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Missing or empty key supplied to a gateway call
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Serializable failure kind, surfaced to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    UpstreamUnavailable,
    NotFound,
    MalformedResponse,
    InvalidInput,
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            FetchError::NotFound(_) => ErrorKind::NotFound,
            FetchError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            FetchError::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    /// Map a reqwest transport failure
    pub fn transport(url: &str, err: reqwest::Error) -> Self {
        FetchError::UpstreamUnavailable(format!("{url}: {err}"))
    }

    /// Map a JSON decoding failure.
    /// Syntax errors and truncated bodies count as transport trouble,
    /// well-formed JSON with the wrong shape is a schema violation.
    pub fn decode(url: &str, err: serde_json::Error) -> Self {
        match err.classify() {
            serde_json::error::Category::Data => {
                FetchError::MalformedResponse(format!("{url}: {err}"))
            }
            _ => FetchError::UpstreamUnavailable(format!("{url}: invalid JSON: {err}")),
        }
    }
}

impl ErrorKind {
    /// Whether the next poll tick should try again for the same key
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::UpstreamUnavailable | ErrorKind::MalformedResponse)
    }

    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::UpstreamUnavailable => "upstream unavailable",
            ErrorKind::NotFound => "not found",
            ErrorKind::MalformedResponse => "malformed response",
            ErrorKind::InvalidInput => "invalid input",
        }
    }
}

/// Rejected presentation intent
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("synchronizer has shut down")]
    Closed,
}
