//! Contracts for the two I/O adapters the pipeline consumes.
//!
//! The network fetcher and the completion service are black boxes to the
//! pipeline: text in, text out, or a typed error. Concrete implementations
//! live in `docmodern-fetcher` and `docmodern-llm`; tests use scripted stubs.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Fetch adapter
// ---------------------------------------------------------------------------

/// Failure modes of a document fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// DNS failure, refused connection, TLS error, timeout, body read error.
    Network,
    /// The server answered with a non-2xx status.
    HttpStatus(u16),
    /// The response is not HTML or text.
    UnsupportedContent,
    /// Conversion produced nothing but whitespace.
    EmptyResult,
}

/// Error returned by [`Fetcher::fetch`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Network, message)
    }

    pub fn http_status(code: u16, url: &str) -> Self {
        Self::new(
            FetchErrorKind::HttpStatus(code),
            format!("{url}: HTTP {code}"),
        )
    }
}

/// Retrieves a URL and returns its content as markdown.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, giving up after `timeout`.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError>;
}

// ---------------------------------------------------------------------------
// Completion adapter
// ---------------------------------------------------------------------------

/// Failure modes of a completion-service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceErrorKind {
    RateLimit,
    Timeout,
    Refusal,
    Unavailable,
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RateLimit => "RATE_LIMIT",
            Self::Timeout => "TIMEOUT",
            Self::Refusal => "REFUSAL",
            Self::Unavailable => "UNAVAILABLE",
        };
        f.write_str(s)
    }
}

/// Error returned by [`CompletionClient::complete`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A single prompt for the completion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// Role/persona instruction sent as the system message.
    pub system: String,
    /// The user prompt.
    pub prompt: String,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
        }
    }
}

/// Text returned by the completion service, with usage accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub model: String,
}

impl Completion {
    /// A completion carrying only text (no usage information).
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Prompt in, text out.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> Result<Completion, ServiceError>;
}
