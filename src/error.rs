//! Error types for usenet-engine
//!
//! Two layers of error handling live here:
//! - [`Error`] is the crate-wide error returned by public APIs.
//! - [`ArticleError`] is the per-attempt outcome taxonomy the scheduler uses
//!   to drive retries and server-level failover.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for usenet-engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for usenet-engine
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "dest_dir")
        key: Option<String>,
    },

    /// NNTP protocol or connection error
    #[error("NNTP error: {0}")]
    Nntp(String),

    /// Article download error
    #[error("article error: {0}")]
    Article(#[from] ArticleError),

    /// Invalid NZB document
    #[error("invalid NZB: {0}")]
    InvalidNzb(String),

    /// Invalid feed document
    #[error("invalid feed: {0}")]
    InvalidFeed(String),

    /// Invalid feed filter expression
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Queue item not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation rejected because the queue item is in the wrong state
    #[error("cannot {operation}: {reason}")]
    InvalidState {
        /// The operation that was attempted (e.g., "merge", "rename")
        operation: String,
        /// Why the current state prevents it
        reason: String,
    },

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// Network error (URL jobs, feed transport)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// URL fetch error with the taxonomy the retry loop understands
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary RPC protocol violation (bad signature, truncated struct, auth)
    #[error("RPC protocol error: {0}")]
    RpcProtocol(String),

    /// Assembly failed while joining article parts into the output file
    #[error("assembly failed for {path}: {reason}")]
    Assembly {
        /// The output path being assembled
        path: PathBuf,
        /// The reason assembly failed
        reason: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Per-attempt outcome of one article fetch.
///
/// The scheduler owns all retry policy; downloader tasks only classify what
/// happened and bubble the kind up.
///
/// | Kind | Recovery |
/// |---|---|
/// | `ConnectError` | does not burn a level; decrements connect-retries; sleep and retry |
/// | `NotFound` | advance level; exhausted at every level means failed-missed |
/// | `CrcError` | optional retry (`retry_on_crc_error`); else failed |
/// | `Incomplete` | EOF before the terminating dot line; retriable |
/// | `Fatal` | abort, mark failed, no retry |
/// | `Failed` | unknown non-2xx; counts as one retry |
/// | `Cancelled` | cooperative stop; no retry, no reporting |
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArticleError {
    /// Network-level failure: connect, auth, timeout, 400/499 responses
    #[error("connection error: {0}")]
    ConnectError(String),

    /// Server reported the article or group as permanently unavailable (41x/42x)
    #[error("not found: {0}")]
    NotFound(String),

    /// Decoded data did not match the announced pcrc32
    #[error("CRC mismatch: expected {expected:08x}, calculated {calculated:08x}")]
    CrcError {
        /// pcrc32 announced in the yEnc trailer
        expected: u32,
        /// CRC-32 calculated over the decoded bytes
        calculated: u32,
    },

    /// Stream ended before the terminating `.` line
    #[error("article incomplete: {0}")]
    Incomplete(String),

    /// Programmer error, unsupported scheme, or disk write failure
    #[error("fatal: {0}")]
    Fatal(String),

    /// Unknown non-2xx response
    #[error("failed: {0}")]
    Failed(String),

    /// Cooperative stop
    #[error("cancelled")]
    Cancelled,
}

impl ArticleError {
    /// Whether this outcome advances the failover level (permanent for the
    /// current server, worth trying a backup).
    pub fn burns_level(&self) -> bool {
        matches!(self, ArticleError::NotFound(_))
    }

    /// Whether this outcome is terminal for the article regardless of
    /// remaining retries.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ArticleError::Fatal(_) | ArticleError::Cancelled)
    }
}

/// URL fetch outcome taxonomy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Network-level failure or connect-class HTTP status
    #[error("connection error: {0}")]
    ConnectError(String),

    /// Resource does not exist (HTTP 404)
    #[error("not found: {0}")]
    NotFound(String),

    /// Unsupported protocol or invalid URL; never retried
    #[error("fatal: {0}")]
    Fatal(String),

    /// Caller-initiated stop under pause; the job stays queued
    #[error("retry later")]
    Retry,

    /// Any other failure
    #[error("failed: {0}")]
    Failed(String),
}

impl FetchError {
    /// Whether the fetch retry loop should try again (within its budgets).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::ConnectError(_) | FetchError::Failed(_) | FetchError::Retry
        )
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_burns_a_level_but_connect_error_does_not() {
        assert!(
            ArticleError::NotFound("430".into()).burns_level(),
            "a permanent per-server miss must advance failover to the next level"
        );
        assert!(
            !ArticleError::ConnectError("timeout".into()).burns_level(),
            "transient network trouble must retry at the same level"
        );
    }

    #[test]
    fn fatal_and_cancelled_are_terminal() {
        assert!(ArticleError::Fatal("disk full".into()).is_terminal());
        assert!(ArticleError::Cancelled.is_terminal());
        assert!(
            !ArticleError::Failed("502".into()).is_terminal(),
            "Failed burns a retry but is not terminal by itself"
        );
    }

    #[test]
    fn fetch_error_retryability_matches_taxonomy() {
        assert!(FetchError::ConnectError("refused".into()).is_retryable());
        assert!(FetchError::Failed("500".into()).is_retryable());
        assert!(FetchError::Retry.is_retryable());
        assert!(!FetchError::NotFound("404".into()).is_retryable());
        assert!(!FetchError::Fatal("ftp://".into()).is_retryable());
    }

    #[test]
    fn crc_error_display_is_hex() {
        let e = ArticleError::CrcError {
            expected: 0xDEADBEEF,
            calculated: 0x12345678,
        };
        let msg = e.to_string();
        assert!(msg.contains("deadbeef"), "expected hex in: {msg}");
        assert!(msg.contains("12345678"), "calculated hex in: {msg}");
    }
}
