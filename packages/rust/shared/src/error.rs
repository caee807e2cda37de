//! Error types for docmodern.
//!
//! Library crates use [`DocModernError`] via `thiserror` for configuration,
//! I/O, and output problems. Pipeline stages never return it: a stage fails
//! with exactly one [`StageFailure`], whose [`ErrorKind`] is what the
//! orchestrator records in the run's error trail.
//! The CLI wraps everything with `color-eyre` for rich diagnostics.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::adapters::{FetchError, FetchErrorKind, ServiceError, ServiceErrorKind};

/// Top-level error type for docmodern operations outside the stage contract.
#[derive(Debug, thiserror::Error)]
pub enum DocModernError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (serialization, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// HTML-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Failure to construct an adapter (HTTP client, credentials).
    #[error("adapter error: {0}")]
    Adapter(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocModernError>;

impl DocModernError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage error taxonomy
// ---------------------------------------------------------------------------

/// The kind of a stage failure. The orchestrator looks at nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Network,
    HttpStatus,
    UnsupportedContent,
    EmptyResult,
    ServiceError,
    Refusal,
    ParseError,
    Cancelled,
}

impl ErrorKind {
    /// Wire/display name, e.g. `HTTP_STATUS`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "NETWORK",
            Self::HttpStatus => "HTTP_STATUS",
            Self::UnsupportedContent => "UNSUPPORTED_CONTENT",
            Self::EmptyResult => "EMPTY_RESULT",
            Self::ServiceError => "SERVICE_ERROR",
            Self::Refusal => "REFUSAL",
            Self::ParseError => "PARSE_ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Only transient transport/service failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::ServiceError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error a stage returns: a kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StageFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, msg)
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, msg)
    }

    pub fn empty(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::EmptyResult, msg)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "run cancelled by caller")
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<FetchError> for StageFailure {
    fn from(err: FetchError) -> Self {
        let kind = match err.kind {
            FetchErrorKind::Network => ErrorKind::Network,
            FetchErrorKind::HttpStatus(_) => ErrorKind::HttpStatus,
            FetchErrorKind::UnsupportedContent => ErrorKind::UnsupportedContent,
            FetchErrorKind::EmptyResult => ErrorKind::EmptyResult,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<ServiceError> for StageFailure {
    fn from(err: ServiceError) -> Self {
        let kind = match err.kind {
            ServiceErrorKind::Refusal => ErrorKind::Refusal,
            ServiceErrorKind::RateLimit
            | ServiceErrorKind::Timeout
            | ServiceErrorKind::Unavailable => ErrorKind::ServiceError,
        };
        Self::new(kind, err.to_string())
    }
}
