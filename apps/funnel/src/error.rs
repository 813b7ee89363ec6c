//! # Application Errors
//!
//! Error types of the binary: CRM fetch failures, refresh failures and the
//! top-level `AppError` that CLI commands return.
//!
//! `FetchError` is `Clone` because the outcome of one in-flight refresh is
//! handed to every caller that waited on it.

use funnel_core::FunnelError;
use thiserror::Error;

// =============================================================================
// FETCH ERRORS
// =============================================================================

/// A failed fetch from the deal source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Cannot connect to CRM at {0}")]
    ConnectionFailed(String),

    #[error("CRM request timed out: {0}")]
    Timeout(String),

    #[error("Unauthorized: invalid or missing CRM API token")]
    Unauthorized,

    #[error("Rate limited by CRM")]
    RateLimited,

    #[error("CRM returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed CRM response: {0}")]
    MalformedResponse(String),

    /// A file-backed source could not be read.
    #[error("Cannot read deal records: {0}")]
    Source(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        // Query strings carry the API token; never echo the URL.
        let e = e.without_url();
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if e.is_connect() {
            FetchError::ConnectionFailed(e.to_string())
        } else if e.is_decode() {
            FetchError::MalformedResponse(e.to_string())
        } else {
            FetchError::ConnectionFailed(e.to_string())
        }
    }
}

// =============================================================================
// REFRESH ERRORS
// =============================================================================

/// A refresh that did not produce a new table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// The fetch failed; the previous table is still served.
    #[error("Refresh failed: {0}")]
    Fetch(#[from] FetchError),

    /// Another refresh is in flight (only from `try_refresh`).
    #[error("A refresh is already in progress")]
    Busy,
}

// =============================================================================
// APPLICATION ERRORS
// =============================================================================

/// Errors surfaced by CLI commands and server startup.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error(transparent)]
    Core(#[from] FunnelError),
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_error_wraps_fetch_message() {
        let err = RefreshError::from(FetchError::RateLimited);
        assert_eq!(err.to_string(), "Refresh failed: Rate limited by CRM");
    }

    #[test]
    fn app_error_is_transparent_over_core() {
        let err = AppError::from(FunnelError::Csv("bad row".into()));
        assert_eq!(err.to_string(), "CSV error: bad row");
    }
}
