//! Scripted adapter stubs and fixtures shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use docmodern_shared::{
    Completion, CompletionClient, CompletionRequest, FetchError, FetchErrorKind, Fetcher,
    Finding, PipelineConfig, Recommendation, ServiceError, ServiceErrorKind, Severity,
};

/// Fast config: two retries with millisecond backoff.
pub(crate) fn test_config() -> PipelineConfig {
    PipelineConfig {
        fetch_timeout: Duration::from_secs(2),
        stage_timeout: Duration::from_secs(2),
        max_retries: 2,
        retry_backoff: Duration::from_millis(1),
        retry_backoff_max: Duration::from_millis(2),
        ..PipelineConfig::default()
    }
}

pub(crate) fn finding(id: &str, category: &str, severity: Severity) -> Finding {
    Finding {
        id: id.into(),
        category: category.into(),
        description: format!("{category} issue"),
        severity,
        section: None,
        excerpt: None,
    }
}

pub(crate) fn recommendation(finding_id: &str, category: &str, practice: &str) -> Recommendation {
    Recommendation {
        finding_id: finding_id.into(),
        category: category.into(),
        practice: practice.into(),
        rationale: None,
        researched_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// StubFetcher
// ---------------------------------------------------------------------------

/// Replays scripted results in order, then falls back to a fixed result.
pub(crate) struct StubFetcher {
    script: Mutex<VecDeque<Result<String, FetchError>>>,
    fallback: Option<Result<String, FetchError>>,
    calls: AtomicUsize,
}

impl StubFetcher {
    pub(crate) fn scripted(script: Vec<Result<String, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn ok(markdown: &str) -> Self {
        Self {
            fallback: Some(Ok(markdown.to_string())),
            ..Self::scripted(Vec::new())
        }
    }

    pub(crate) fn always(err: FetchError) -> Self {
        Self {
            fallback: Some(Err(err)),
            ..Self::scripted(Vec::new())
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, _url: &str, _timeout: Duration) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        self.fallback.clone().unwrap_or_else(|| {
            Err(FetchError::new(
                FetchErrorKind::EmptyResult,
                "stub fetcher has no scripted response",
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// StubCompletion
// ---------------------------------------------------------------------------

/// Replays scripted completions in order and records every request.
pub(crate) struct StubCompletion {
    script: Mutex<VecDeque<Result<Completion, ServiceError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl StubCompletion {
    pub(crate) fn scripted(script: Vec<Result<Completion, ServiceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Successful replies with the given texts, 10 tokens in and 5 out each.
    pub(crate) fn replies<I>(texts: I) -> Self
    where
        I: IntoIterator<Item = &'static str>,
    {
        Self::scripted(
            texts
                .into_iter()
                .map(|text| {
                    Ok(Completion {
                        text: text.to_string(),
                        tokens_in: 10,
                        tokens_out: 5,
                        model: "stub".into(),
                    })
                })
                .collect(),
        )
    }

    /// Sleep before every reply.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for StubCompletion {
    async fn complete(
        &self,
        request: &CompletionRequest,
        _timeout: Duration,
    ) -> Result<Completion, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Err(ServiceError::new(
                ServiceErrorKind::Refusal,
                "stub completion has no scripted response",
            ))
        })
    }
}
