//! Pipeline orchestration for docmodern.
//!
//! A run turns one documentation URL into a modernized markdown document and
//! a quality report by driving five stages in fixed order:
//!
//! 1. [`FetchStage`]: download and convert to markdown
//! 2. [`AnalysisStage`]: list outdated findings
//! 3. [`ResearchStage`]: current best practices per finding category
//! 4. [`GenerationStage`]: rewrite the document
//! 5. [`QualityStage`]: score the rewrite
//!
//! [`PipelineOrchestrator`] owns the run; stages implement [`Stage`] and call
//! adapters through [`StageContext`], which applies timeouts and retries.

pub mod cancel;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod stage;
pub mod stages;

#[cfg(test)]
mod testing;

pub use cancel::CancellationSignal;
pub use orchestrator::PipelineOrchestrator;
pub use progress::{ProgressReporter, SilentProgress};
pub use retry::{RetryPolicy, calculate_backoff};
pub use stage::{Stage, StageContext};
pub use stages::{
    AnalysisInput, AnalysisStage, FetchInput, FetchStage, GenerationInput, GenerationStage,
    QualityInput, QualityStage, ResearchInput, ResearchStage,
};
