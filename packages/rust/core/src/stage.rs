//! The stage contract and the per-invocation context stages call out through.

use async_trait::async_trait;
use tracing::debug;

use docmodern_shared::{
    Completion, CompletionClient, CompletionRequest, ErrorKind, Fetcher,
    PipelineConfig, StageFailure, StageName, Usage,
};

use crate::retry::{RetryPolicy, with_retry, with_timeout};

/// One step of the pipeline: a transformation from a projection of
/// [`PipelineState`](docmodern_shared::PipelineState) to a single output.
///
/// A stage never touches the state itself. The orchestrator builds
/// `Input` from the fields the stage declares and writes `Output` back.
#[async_trait]
pub trait Stage: Send + Sync {
    type Input: Send + Sync;
    type Output: Send;

    fn name(&self) -> StageName;

    async fn execute(
        &self,
        input: &Self::Input,
        ctx: &mut StageContext<'_>,
    ) -> Result<Self::Output, StageFailure>;
}

/// Read-only configuration plus the accounting for a single stage run.
///
/// Adapter calls go through [`StageContext::fetch`] and
/// [`StageContext::complete`], which apply the timeout and retry policy and
/// record attempts and usage.
pub struct StageContext<'a> {
    config: &'a PipelineConfig,
    policy: RetryPolicy,
    attempts: u32,
    usage: Usage,
}

impl<'a> StageContext<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self {
            config,
            policy: RetryPolicy::from(config),
            attempts: 0,
            usage: Usage::default(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        self.config
    }

    /// Adapter calls made so far, retries included.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Fetch `url` through `fetcher`, bounded by `fetch_timeout`.
    pub async fn fetch(&mut self, fetcher: &dyn Fetcher, url: &str) -> Result<String, StageFailure> {
        let limit = self.config.fetch_timeout;
        let outcome = with_retry(&self.policy, "fetch", move || {
            with_timeout(limit, fetcher.fetch(url, limit), move || {
                StageFailure::network(format!(
                    "{url}: no response within {}s",
                    limit.as_secs_f32()
                ))
            })
        })
        .await;

        self.attempts += outcome.attempts;
        outcome.result
    }

    /// Send `request` to the completion service, bounded by `stage_timeout`.
    pub async fn complete(
        &mut self,
        client: &dyn CompletionClient,
        request: &CompletionRequest,
    ) -> Result<Completion, StageFailure> {
        let limit = self.config.stage_timeout;
        let outcome = with_retry(&self.policy, "completion", move || {
            with_timeout(limit, client.complete(request, limit), move || {
                StageFailure::new(
                    ErrorKind::ServiceError,
                    format!("TIMEOUT: no completion within {}s", limit.as_secs_f32()),
                )
            })
        })
        .await;

        self.attempts += outcome.attempts;
        self.usage.completion_calls += outcome.attempts;
        self.usage.retries += outcome.attempts.saturating_sub(1);

        let completion = outcome.result?;
        self.usage.tokens_in += completion.tokens_in;
        self.usage.tokens_out += completion.tokens_out;
        debug!(
            chars = completion.text.len(),
            tokens_out = completion.tokens_out,
            "completion accepted"
        );
        Ok(completion)
    }
}
