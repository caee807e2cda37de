use std::time::Duration;

use docmodern_shared::{PipelineState, StageError, StageName};

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called right before a stage executes.
    fn stage_started(&self, stage: StageName);
    /// Called when a stage produced its output.
    fn stage_finished(&self, stage: StageName, elapsed: Duration);
    /// Called when a stage failed or the run was cancelled before it.
    fn stage_failed(&self, stage: StageName, error: &StageError);
    /// Called once with the terminal state.
    fn done(&self, state: &PipelineState);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage_started(&self, _stage: StageName) {}
    fn stage_finished(&self, _stage: StageName, _elapsed: Duration) {}
    fn stage_failed(&self, _stage: StageName, _error: &StageError) {}
    fn done(&self, _state: &PipelineState) {}
}
