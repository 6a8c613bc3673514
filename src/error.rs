#![forbid(unsafe_code)]

//! Error taxonomy shared by the downloader, reconciler, and scraper.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The external downloader cannot be invoked. Never retried.
    #[error("{program} is not installed or not in PATH: {reason}")]
    MissingDependency { program: String, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Non-zero exit, timeout, or spawn failure while downloading.
    #[error("transient failure after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    /// Downloaded files did not match the expected media type and none remained.
    #[error("no {expected} files left in {dir}")]
    ContentMismatch { expected: String, dir: String },

    #[error("listing failed: {0}")]
    Listing(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScrapeError {
    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScrapeError::Transient { .. })
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(err: serde_json::Error) -> Self {
        ScrapeError::Parse(err.to_string())
    }
}
