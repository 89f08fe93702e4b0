//! Error types for reel-pipeline
//!
//! This module provides the error taxonomy for the library:
//! - A crate-wide [`Error`] with contextual variants
//! - Domain-specific errors for the ledger and the media tools
//! - [`FailureKind`] classification used by the retry combinator and the
//!   pipeline coordinator to decide between retry, skip and abort

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for reel-pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for reel-pipeline
///
/// Each variant carries enough context to produce a human-readable summary at the
/// coordinator boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "assembly.batch_size")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Session is missing, expired or rejected by the remote service
    #[error("authentication required: {0}; please log in again to refresh the session")]
    Auth(String),

    /// Remote service signalled throttling
    #[error("rate limited by remote service: {0}")]
    RateLimited(String),

    /// Remote service returned an error that may go away on retry
    #[error("remote error: {0}")]
    Remote(String),

    /// Remote service answered with an unsuccessful HTTP status
    #[error("HTTP {status}: {message}")]
    Http {
        /// Response status code
        status: u16,
        /// Short description (URL or body excerpt)
        message: String,
    },

    /// HTTP transport error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Ledger read/write failure
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Normalization, concatenation or probing failure
    #[error("media error: {0}")]
    Media(#[from] MediaError),

    /// External tool could not be executed at all
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The run was cancelled before the operation completed
    #[error("operation cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Ledger persistence errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Reading the ledger file failed for a reason other than it being absent
    #[error("failed to read ledger {path}: {source}")]
    Read {
        /// Ledger file path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Appending to the ledger file failed
    #[error("failed to append to ledger {path}: {source}")]
    Write {
        /// Ledger file path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

/// Errors raised by the normalization and assembly stages
#[derive(Debug, Error)]
pub enum MediaError {
    /// A single input could not be normalized; aborts the batch
    #[error("failed to normalize {file}: {reason}")]
    NormalizeFailed {
        /// The offending input file
        file: PathBuf,
        /// Short reason
        reason: String,
        /// Tool diagnostic output retained for inspection
        stderr: String,
    },

    /// Concatenation failed after all fallbacks
    #[error("failed to concatenate {inputs} file(s) into {output}: {reason}")]
    ConcatFailed {
        /// Output that could not be produced
        output: PathBuf,
        /// Number of inputs in the failed group
        inputs: usize,
        /// Short reason
        reason: String,
        /// Tool diagnostic output retained for inspection
        stderr: String,
    },

    /// The external tool exited with a non-zero status
    #[error("{tool} exited with status {status}")]
    ToolFailed {
        /// Tool name (ffmpeg, ffprobe)
        tool: String,
        /// Exit code, -1 when terminated by a signal
        status: i32,
        /// Tail of the tool's stderr
        stderr: String,
    },

    /// The tool reported success but the output is missing or empty
    #[error("output {path} is missing or empty")]
    EmptyOutput {
        /// Expected output path
        path: PathBuf,
    },

    /// Probing a file failed
    #[error("failed to probe {path}: {reason}")]
    ProbeFailed {
        /// The probed file
        path: PathBuf,
        /// The reason probing failed
        reason: String,
    },

    /// Not enough free space to assemble the output
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Bytes required for the merge
        required: u64,
        /// Bytes currently available
        available: u64,
    },

    /// Merge was requested with no inputs
    #[error("no input files to merge")]
    NoInputs,
}

impl MediaError {
    /// Tool diagnostic output attached to this error, if any
    pub fn stderr(&self) -> Option<&str> {
        match self {
            MediaError::NormalizeFailed { stderr, .. }
            | MediaError::ConcatFailed { stderr, .. }
            | MediaError::ToolFailed { stderr, .. } => Some(stderr.as_str()),
            _ => None,
        }
    }
}

/// How a failure should be handled by retry loops and the coordinator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Abort the whole run, never retry (session invalid)
    Fatal,
    /// Remote throttling: exponential backoff
    RateLimited,
    /// Generic network/remote hiccup: short fixed backoff
    Transient,
    /// Retrying cannot help (bad data, missing tool, 404)
    Permanent,
}

impl FailureKind {
    /// Whether a retry loop should try again after this failure
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::RateLimited | FailureKind::Transient)
    }
}

impl Error {
    /// Create a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_message_asks_for_relogin() {
        let err = Error::Auth("session expired".into());
        let msg = err.to_string();
        assert!(msg.contains("session expired"));
        assert!(msg.contains("log in again"));
        assert!(err.is_fatal());
    }

    #[test]
    fn only_auth_is_fatal() {
        assert!(!Error::RateLimited("429".into()).is_fatal());
        assert!(!Error::Remote("503".into()).is_fatal());
        assert!(!Error::Cancelled.is_fatal());
    }

    #[test]
    fn config_helper_sets_key() {
        let err = Error::config("assembly.batch_size", "must be at least 2");
        match err {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("assembly.batch_size"));
                assert_eq!(message, "must be at least 2");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn media_error_exposes_stderr() {
        let err = MediaError::NormalizeFailed {
            file: PathBuf::from("a.mp4"),
            reason: "ffmpeg exited with status 1".into(),
            stderr: "Invalid data found when processing input".into(),
        };
        assert_eq!(err.stderr(), Some("Invalid data found when processing input"));
        assert_eq!(MediaError::NoInputs.stderr(), None);
    }

    #[test]
    fn normalize_failure_names_the_file() {
        let err: Error = MediaError::NormalizeFailed {
            file: PathBuf::from("/downloads/ABC123.mp4"),
            reason: "bad input".into(),
            stderr: String::new(),
        }
        .into();
        assert!(err.to_string().contains("/downloads/ABC123.mp4"));
    }

    #[test]
    fn retryable_kinds() {
        assert!(FailureKind::RateLimited.is_retryable());
        assert!(FailureKind::Transient.is_retryable());
        assert!(!FailureKind::Fatal.is_retryable());
        assert!(!FailureKind::Permanent.is_retryable());
    }
}
