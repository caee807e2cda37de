//! Drives the five stages over a single [`PipelineState`].
//!
//! The run is strictly linear: Fetch → Analyze → Research → Generate →
//! QualityCheck. The first failure (or a cancellation observed at a stage
//! boundary) ends the run as `FAILED`; every output produced before that
//! point stays on the returned state.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, instrument, warn};

use docmodern_shared::{
    CompletionClient, ErrorKind, Fetcher, PipelineConfig, PipelineState, PipelineStatus,
    StageError, StageFailure,
};

use crate::cancel::CancellationSignal;
use crate::progress::{ProgressReporter, SilentProgress};
use crate::stage::{Stage, StageContext};
use crate::stages::{
    AnalysisInput, AnalysisStage, FetchInput, FetchStage, GenerationInput, GenerationStage,
    QualityInput, QualityStage, ResearchInput, ResearchStage,
};

/// Owns the stages and the read-only configuration. Holds no per-run state,
/// so one orchestrator can serve concurrent runs.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    fetch: FetchStage,
    analysis: AnalysisStage,
    research: ResearchStage,
    generation: GenerationStage,
    quality: QualityStage,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        fetcher: Arc<dyn Fetcher>,
        completion: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            config,
            fetch: FetchStage::new(fetcher),
            analysis: AnalysisStage::new(completion.clone()),
            research: ResearchStage::new(completion.clone()),
            generation: GenerationStage::new(completion.clone()),
            quality: QualityStage::new(completion),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline for `source_url` without cancellation or progress.
    pub async fn run(&self, source_url: &str) -> PipelineState {
        self.run_with(source_url, &CancellationSignal::new(), &SilentProgress)
            .await
    }

    /// Run the pipeline for `source_url`.
    ///
    /// Never fails: errors are recorded in `stage_errors` and the returned
    /// state is always terminal (`COMPLETED` or `FAILED`).
    #[instrument(skip_all, fields(url = %source_url))]
    pub async fn run_with(
        &self,
        source_url: &str,
        cancel: &CancellationSignal,
        progress: &dyn ProgressReporter,
    ) -> PipelineState {
        let mut state = PipelineState::new(source_url);
        info!(run_id = %state.run_id(), "starting pipeline run");

        self.drive(&mut state, cancel, progress).await;

        if !state.status().is_terminal() {
            state.advance(PipelineStatus::Completed);
        }

        let usage = state.usage();
        match state.failed_stage() {
            None => info!(
                run_id = %state.run_id(),
                completion_calls = usage.completion_calls,
                retries = usage.retries,
                tokens_in = usage.tokens_in,
                tokens_out = usage.tokens_out,
                "pipeline completed"
            ),
            Some(stage) => error!(
                run_id = %state.run_id(),
                %stage,
                completion_calls = usage.completion_calls,
                "pipeline failed"
            ),
        }

        progress.done(&state);
        state
    }

    /// Run each stage in order, writing its output before moving on.
    /// Returns early, leaving the state `FAILED`, at the first failure.
    async fn drive(
        &self,
        state: &mut PipelineState,
        cancel: &CancellationSignal,
        progress: &dyn ProgressReporter,
    ) {
        let input = FetchInput {
            source_url: state.source_url().to_string(),
        };
        let Some(raw_markdown) = self.run_stage(&self.fetch, input, state, cancel, progress).await
        else {
            return;
        };
        state.set_raw_markdown(raw_markdown);

        let input = AnalysisInput {
            raw_markdown: state.raw_markdown().unwrap_or_default().to_string(),
        };
        let Some(findings) = self.run_stage(&self.analysis, input, state, cancel, progress).await
        else {
            return;
        };
        state.set_findings(findings);

        let input = ResearchInput {
            findings: state.findings().unwrap_or_default().to_vec(),
        };
        let Some(recommendations) = self.run_stage(&self.research, input, state, cancel, progress).await
        else {
            return;
        };
        state.set_recommendations(recommendations);

        let input = GenerationInput {
            raw_markdown: state.raw_markdown().unwrap_or_default().to_string(),
            findings: state.findings().unwrap_or_default().to_vec(),
            recommendations: state.recommendations().unwrap_or_default().to_vec(),
        };
        let Some(modernized) = self.run_stage(&self.generation, input, state, cancel, progress).await
        else {
            return;
        };
        state.set_modernized_markdown(modernized);

        let input = QualityInput {
            raw_markdown: state.raw_markdown().unwrap_or_default().to_string(),
            modernized_markdown: state.modernized_markdown().unwrap_or_default().to_string(),
        };
        let Some(report) = self.run_stage(&self.quality, input, state, cancel, progress).await
        else {
            return;
        };
        state.set_quality_report(report);
    }

    /// Execute one stage. On failure or cancellation the error is appended
    /// to the trail, the run is marked `FAILED`, and `None` is returned.
    async fn run_stage<S: Stage>(
        &self,
        stage: &S,
        input: S::Input,
        state: &mut PipelineState,
        cancel: &CancellationSignal,
        progress: &dyn ProgressReporter,
    ) -> Option<S::Output> {
        let name = stage.name();

        if cancel.is_cancelled() {
            warn!(stage = %name, "run cancelled before stage");
            let entry = StageError::new(name, &StageFailure::cancelled(), 0);
            progress.stage_failed(name, &entry);
            state.fail(entry);
            return None;
        }

        state.advance(name.in_progress_status());
        progress.stage_started(name);
        info!(stage = %name, "stage started");

        let started = Instant::now();
        let mut ctx = StageContext::new(&self.config);
        let result = stage.execute(&input, &mut ctx).await;
        state.record_usage(ctx.usage());

        match result {
            Ok(output) => {
                let elapsed = started.elapsed();
                info!(
                    stage = %name,
                    attempts = ctx.attempts(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "stage succeeded"
                );
                progress.stage_finished(name, elapsed);
                Some(output)
            }
            Err(failure) => {
                let entry = StageError::new(name, &failure, ctx.attempts());
                match failure.kind {
                    ErrorKind::Cancelled => warn!(stage = %name, "stage cancelled"),
                    kind => error!(
                        stage = %name,
                        %kind,
                        attempts = entry.attempts,
                        error = %failure.message,
                        "stage failed"
                    ),
                }
                progress.stage_failed(name, &entry);
                state.fail(entry);
                None
            }
        }
    }
}
