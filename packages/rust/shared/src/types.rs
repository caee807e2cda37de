//! Core domain types: the pipeline state and what the stages produce.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, StageFailure};

/// Quality dimensions every [`QualityReport`] must score.
pub const QUALITY_DIMENSIONS: [&str; 4] = ["accuracy", "completeness", "clarity", "modernization"];

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Status and stage names
// ---------------------------------------------------------------------------

/// Lifecycle of a run. Declaration order is the only forward order;
/// `Failed` is reachable from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Pending,
    Fetching,
    Analyzing,
    Researching,
    Generating,
    Checking,
    Completed,
    Failed,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Fetching => "FETCHING",
            Self::Analyzing => "ANALYZING",
            Self::Researching => "RESEARCHING",
            Self::Generating => "GENERATING",
            Self::Checking => "CHECKING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// The five stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageName {
    Fetch,
    Analyze,
    Research,
    Generate,
    QualityCheck,
}

impl StageName {
    pub const ALL: [StageName; 5] = [
        Self::Fetch,
        Self::Analyze,
        Self::Research,
        Self::Generate,
        Self::QualityCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "Fetch",
            Self::Analyze => "Analyze",
            Self::Research => "Research",
            Self::Generate => "Generate",
            Self::QualityCheck => "QualityCheck",
        }
    }

    /// The status a run is in while this stage executes.
    pub fn in_progress_status(&self) -> PipelineStatus {
        match self {
            Self::Fetch => PipelineStatus::Fetching,
            Self::Analyze => PipelineStatus::Analyzing,
            Self::Research => PipelineStatus::Researching,
            Self::Generate => PipelineStatus::Generating,
            Self::QualityCheck => PipelineStatus::Checking,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stage outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    #[serde(alias = "low", alias = "Low")]
    Low,
    #[serde(alias = "medium", alias = "Medium")]
    Medium,
    #[serde(alias = "high", alias = "High")]
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        };
        f.write_str(s)
    }
}

/// A single outdated element identified in the source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable within a run: `F1`, `F2`, ... in analysis order.
    pub id: String,
    /// Free-form tag, e.g. `deprecated-api`.
    pub category: String,
    pub description: String,
    pub severity: Severity,
    /// Section heading the finding belongs to, when the analysis reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Snippet of the raw markdown the finding refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// A current best practice addressing one finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Id of the [`Finding`] this addresses.
    pub finding_id: String,
    /// Category of the originating finding.
    pub category: String,
    pub practice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub researched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    NeedsRevision,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pass => "pass",
            Self::NeedsRevision => "needs revision",
            Self::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Comparative assessment of the original and modernized documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// One score in `[0, 1]` per entry of [`QUALITY_DIMENSIONS`].
    pub scores: BTreeMap<String, f64>,
    pub verdict: Verdict,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    /// Mean of `scores`, rounded to two decimals.
    pub average_score: f64,
}

// ---------------------------------------------------------------------------
// Error trail and usage
// ---------------------------------------------------------------------------

/// One entry of the append-only error trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: StageName,
    pub kind: ErrorKind,
    pub message: String,
    /// Adapter attempts made before giving up (0 when the stage never called out).
    pub attempts: u32,
    pub occurred_at: DateTime<Utc>,
}

impl StageError {
    pub fn new(stage: StageName, failure: &StageFailure, attempts: u32) -> Self {
        Self {
            stage,
            kind: failure.kind,
            message: failure.message.clone(),
            attempts,
            occurred_at: Utc::now(),
        }
    }
}

/// Completion-service usage accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub completion_calls: u32,
    pub retries: u32,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

impl Usage {
    pub fn absorb(&mut self, other: Usage) {
        self.completion_calls += other.completion_calls;
        self.retries += other.retries;
        self.tokens_in += other.tokens_in;
        self.tokens_out += other.tokens_out;
    }
}

// ---------------------------------------------------------------------------
// PipelineState
// ---------------------------------------------------------------------------

/// The single unit of work threaded through the pipeline.
///
/// Output fields are write-once: each is set by exactly one stage and never
/// replaced. `stage_errors` only grows. Fields stay populated when a later
/// stage fails so callers can inspect partial state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    run_id: RunId,
    source_url: String,
    raw_markdown: Option<String>,
    findings: Option<Vec<Finding>>,
    recommendations: Option<Vec<Recommendation>>,
    modernized_markdown: Option<String>,
    quality_report: Option<QualityReport>,
    stage_errors: Vec<StageError>,
    status: PipelineStatus,
    usage: Usage,
    started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
}

impl PipelineState {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            run_id: RunId::new(),
            source_url: source_url.into(),
            raw_markdown: None,
            findings: None,
            recommendations: None,
            modernized_markdown: None,
            quality_report: None,
            stage_errors: Vec::new(),
            status: PipelineStatus::Pending,
            usage: Usage::default(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn raw_markdown(&self) -> Option<&str> {
        self.raw_markdown.as_deref()
    }

    /// `None` means analysis never ran; `Some(&[])` means nothing outdated was found.
    pub fn findings(&self) -> Option<&[Finding]> {
        self.findings.as_deref()
    }

    pub fn recommendations(&self) -> Option<&[Recommendation]> {
        self.recommendations.as_deref()
    }

    pub fn modernized_markdown(&self) -> Option<&str> {
        self.modernized_markdown.as_deref()
    }

    pub fn quality_report(&self) -> Option<&QualityReport> {
        self.quality_report.as_ref()
    }

    pub fn stage_errors(&self) -> &[StageError] {
        &self.stage_errors
    }

    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// The stage that ended the run, if it failed.
    pub fn failed_stage(&self) -> Option<StageName> {
        if self.status != PipelineStatus::Failed {
            return None;
        }
        self.stage_errors.last().map(|e| e.stage)
    }

    // --- writers (used by the orchestrator only) ---

    pub fn set_raw_markdown(&mut self, markdown: String) {
        debug_assert!(self.raw_markdown.is_none(), "raw_markdown is write-once");
        self.raw_markdown.get_or_insert(markdown);
    }

    pub fn set_findings(&mut self, findings: Vec<Finding>) {
        debug_assert!(self.findings.is_none(), "findings is write-once");
        self.findings.get_or_insert(findings);
    }

    pub fn set_recommendations(&mut self, recommendations: Vec<Recommendation>) {
        debug_assert!(self.recommendations.is_none(), "recommendations is write-once");
        self.recommendations.get_or_insert(recommendations);
    }

    pub fn set_modernized_markdown(&mut self, markdown: String) {
        debug_assert!(self.modernized_markdown.is_none(), "modernized_markdown is write-once");
        self.modernized_markdown.get_or_insert(markdown);
    }

    pub fn set_quality_report(&mut self, report: QualityReport) {
        debug_assert!(self.quality_report.is_none(), "quality_report is write-once");
        self.quality_report.get_or_insert(report);
    }

    pub fn record_usage(&mut self, usage: Usage) {
        self.usage.absorb(usage);
    }

    /// Move forward to `next`. Backward moves and moves out of a terminal
    /// status are ignored.
    pub fn advance(&mut self, next: PipelineStatus) {
        if self.status.is_terminal() || next <= self.status || next == PipelineStatus::Failed {
            debug_assert!(false, "illegal transition {} -> {next}", self.status);
            return;
        }
        self.status = next;
        if next == PipelineStatus::Completed {
            self.finished_at = Some(Utc::now());
        }
    }

    /// Append to the error trail and end the run as `Failed`.
    pub fn fail(&mut self, error: StageError) {
        self.stage_errors.push(error);
        if !self.status.is_terminal() {
            self.status = PipelineStatus::Failed;
            self.finished_at = Some(Utc::now());
        }
    }
}
