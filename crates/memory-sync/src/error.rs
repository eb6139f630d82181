//! Error taxonomy for the sync engine
//!
//! Only the failures the orchestrator branches on get a typed error. Store
//! and configuration failures travel as `anyhow::Error`.

use thiserror::Error;

/// Failure of a single remote call.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No credentials installed yet. Expected while the app is still signing in.
    #[error("not authenticated yet")]
    NotAuthenticated,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Plain-text response without the success marker.
    #[error("server rejected {operation}: {message}")]
    Rejected { operation: String, message: String },

    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// True for the silent "not signed in yet" state.
    pub fn is_not_authenticated(&self) -> bool {
        matches!(self, TransportError::NotAuthenticated)
    }
}

/// Failure to open a sealed field.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecryptionError {
    #[error("field is not valid base64")]
    Encoding,

    #[error("sealed field is truncated ({0} bytes)")]
    Truncated(usize),

    #[error("unknown field format")]
    UnknownFormat,

    #[error("authentication tag mismatch")]
    Authentication,

    #[error("decrypted field is not valid UTF-8")]
    Utf8,
}

pub type TransportResult<T> = Result<T, TransportError>;
