//! Output bundle for a finished run.
//!
//! [`write_bundle`] lays out everything a reader needs to review a run:
//!
//! ```text
//! <out>/<run_id>/
//! ├── modernized.md   (when generation succeeded)
//! ├── original.md     (when the fetch succeeded)
//! ├── report.md       findings, recommendations, quality, error trail
//! ├── state.json      the full PipelineState
//! └── manifest.json   sha256 and size of every file above
//! ```
//!
//! Every file is written atomically (temp file, then rename).

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use docmodern_shared::{DocModernError, PipelineState, PipelineStatus, Result};

const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Checksum entry for one bundle file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleFile {
    pub filename: String,
    pub sha256: String,
    pub size_bytes: usize,
}

/// Contents of `manifest.json`.
#[derive(Debug, Clone, Serialize)]
pub struct BundleManifest {
    pub run_id: String,
    pub source_url: String,
    pub status: PipelineStatus,
    pub tool_version: String,
    pub created_at: DateTime<Utc>,
    pub files: Vec<BundleFile>,
}

/// Output from a successful bundle write.
#[derive(Debug, Clone)]
pub struct BundleResult {
    /// Directory the bundle was written to.
    pub dir: PathBuf,
    pub manifest: BundleManifest,
}

impl BundleResult {
    /// Path of the modernized document, if the run produced one.
    pub fn modernized_path(&self) -> Option<PathBuf> {
        self.manifest
            .files
            .iter()
            .any(|f| f.filename == "modernized.md")
            .then(|| self.dir.join("modernized.md"))
    }
}

/// Write the bundle for `state` under `out_root/<run_id>/`.
///
/// Fields the run never produced are skipped, so a failed run still gets a
/// bundle of whatever exists.
#[instrument(skip_all, fields(run_id = %state.run_id(), out = %out_root.display()))]
pub fn write_bundle(out_root: &Path, state: &PipelineState) -> Result<BundleResult> {
    let dir = out_root.join(state.run_id().to_string());
    std::fs::create_dir_all(&dir).map_err(|e| DocModernError::io(&dir, e))?;

    let state_json = serde_json::to_string_pretty(state)
        .map_err(|e| DocModernError::validation(format!("state serialization failed: {e}")))?;
    let report = render_report(state);

    let mut files: Vec<(&str, &str)> = Vec::with_capacity(4);
    if let Some(modernized) = state.modernized_markdown() {
        files.push(("modernized.md", modernized));
    }
    if let Some(original) = state.raw_markdown() {
        files.push(("original.md", original));
    }
    files.push(("report.md", report.as_str()));
    files.push(("state.json", state_json.as_str()));

    let mut entries = Vec::with_capacity(files.len());
    for (filename, content) in files {
        write_atomic(&dir, filename, content)?;
        entries.push(BundleFile {
            filename: filename.to_string(),
            sha256: sha256_hex(content),
            size_bytes: content.len(),
        });
    }

    let manifest = BundleManifest {
        run_id: state.run_id().to_string(),
        source_url: state.source_url().to_string(),
        status: state.status(),
        tool_version: TOOL_VERSION.to_string(),
        created_at: Utc::now(),
        files: entries,
    };
    let manifest_json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| DocModernError::validation(format!("JSON serialization failed: {e}")))?;
    write_atomic(&dir, "manifest.json", &manifest_json)?;

    info!(files = manifest.files.len(), "bundle written");
    Ok(BundleResult { dir, manifest })
}

/// Render the human-readable run report.
pub fn render_report(state: &PipelineState) -> String {
    let mut out = String::new();
    let usage = state.usage();

    let _ = writeln!(out, "# Modernization Report\n");
    let _ = writeln!(out, "- **Source:** {}", state.source_url());
    let _ = writeln!(out, "- **Run:** `{}`", state.run_id());
    let _ = writeln!(out, "- **Status:** {}", state.status());
    let _ = writeln!(out, "- **Started:** {}", state.started_at().to_rfc3339());
    if let Some(finished) = state.finished_at() {
        let _ = writeln!(out, "- **Finished:** {}", finished.to_rfc3339());
    }
    let _ = writeln!(
        out,
        "- **Completion calls:** {} ({} retries, {} tokens in, {} tokens out)",
        usage.completion_calls, usage.retries, usage.tokens_in, usage.tokens_out
    );

    let _ = writeln!(out, "\n## Findings\n");
    match state.findings() {
        None => out.push_str("_Analysis did not run._\n"),
        Some([]) => out.push_str("_No outdated content found._\n"),
        Some(findings) => {
            out.push_str("| ID | Severity | Category | Section | Description |\n");
            out.push_str("| --- | --- | --- | --- | --- |\n");
            for f in findings {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} | {} |",
                    f.id,
                    f.severity,
                    cell(&f.category),
                    cell(f.section.as_deref().unwrap_or("")),
                    cell(&f.description)
                );
            }
        }
    }

    let _ = writeln!(out, "\n## Recommendations\n");
    match state.recommendations() {
        None => out.push_str("_Research did not run._\n"),
        Some([]) => out.push_str("_No recommendations._\n"),
        Some(recs) => {
            for r in recs {
                let _ = writeln!(out, "- **{}** ({}): {}", r.finding_id, r.category, r.practice);
                if let Some(rationale) = &r.rationale {
                    let _ = writeln!(out, "  - {rationale}");
                }
            }
        }
    }

    let _ = writeln!(out, "\n## Quality\n");
    match state.quality_report() {
        None => out.push_str("_Quality check did not run._\n"),
        Some(report) => {
            out.push_str("| Dimension | Score |\n| --- | --- |\n");
            for (dimension, score) in &report.scores {
                let _ = writeln!(out, "| {dimension} | {score:.2} |");
            }
            let _ = writeln!(
                out,
                "\n**Verdict:** {} (average {:.2})\n",
                report.verdict, report.average_score
            );
            let _ = writeln!(out, "{}", report.summary);
            if !report.suggestions.is_empty() {
                out.push_str("\n### Suggestions\n\n");
                for s in &report.suggestions {
                    let _ = writeln!(out, "- {s}");
                }
            }
        }
    }

    if !state.stage_errors().is_empty() {
        let _ = writeln!(out, "\n## Errors\n");
        for e in state.stage_errors() {
            let _ = writeln!(
                out,
                "- **{}** `{}` after {} attempt(s): {}",
                e.stage, e.kind, e.attempts, e.message
            );
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write_atomic(dir: &Path, filename: &str, content: &str) -> Result<()> {
    let target = dir.join(filename);
    let temp = dir.join(format!(".{filename}.tmp"));

    std::fs::write(&temp, content).map_err(|e| DocModernError::io(&temp, e))?;
    std::fs::rename(&temp, &target).map_err(|e| DocModernError::io(&target, e))?;

    debug!(file = %filename, size = content.len(), "wrote bundle file");
    Ok(())
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Escape a value for a markdown table cell.
fn cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmodern_shared::{
        ErrorKind, Finding, QualityReport, Recommendation, Severity, StageError, StageFailure,
        StageName, Verdict,
    };

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "docmodern-bundle-test-{}",
            uuid::Uuid::now_v7()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn completed_state() -> PipelineState {
        let mut state = PipelineState::new("https://docs.example.com/guide");
        state.advance(PipelineStatus::Fetching);
        state.set_raw_markdown("# Old Guide\nUses deprecated API X.\n".into());
        state.advance(PipelineStatus::Analyzing);
        state.set_findings(vec![Finding {
            id: "F1".into(),
            category: "deprecated-api".into(),
            description: "API X | removed".into(),
            severity: Severity::High,
            section: Some("Usage".into()),
            excerpt: None,
        }]);
        state.advance(PipelineStatus::Researching);
        state.set_recommendations(vec![Recommendation {
            finding_id: "F1".into(),
            category: "deprecated-api".into(),
            practice: "Use API Y".into(),
            rationale: Some("X was removed in v3".into()),
            researched_at: Utc::now(),
        }]);
        state.advance(PipelineStatus::Generating);
        state.set_modernized_markdown("# Guide\n\nUses API Y.\n".into());
        state.advance(PipelineStatus::Checking);
        state.set_quality_report(QualityReport {
            scores: [("accuracy".to_string(), 0.9), ("clarity".to_string(), 0.8)]
                .into_iter()
                .collect(),
            verdict: Verdict::Pass,
            summary: "Migrated.".into(),
            suggestions: vec!["Add a changelog link".into()],
            average_score: 0.85,
        });
        state.advance(PipelineStatus::Completed);
        state
    }

    #[test]
    fn bundle_contains_all_files() {
        let tmp = temp_dir();
        let state = completed_state();

        let result = write_bundle(&tmp, &state).unwrap();

        assert_eq!(result.dir, tmp.join(state.run_id().to_string()));
        for name in ["modernized.md", "original.md", "report.md", "state.json", "manifest.json"] {
            assert!(result.dir.join(name).exists(), "missing {name}");
        }
        assert_eq!(
            std::fs::read_to_string(result.dir.join("modernized.md")).unwrap(),
            "# Guide\n\nUses API Y.\n"
        );
        assert_eq!(result.modernized_path(), Some(result.dir.join("modernized.md")));

        // no temp files left behind
        let leftovers = std::fs::read_dir(&result.dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn manifest_checksums_match_files() {
        let tmp = temp_dir();
        let result = write_bundle(&tmp, &completed_state()).unwrap();

        let manifest: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(result.dir.join("manifest.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest["status"], "COMPLETED");

        for file in &result.manifest.files {
            let content = std::fs::read_to_string(result.dir.join(&file.filename)).unwrap();
            assert_eq!(file.sha256, sha256_hex(&content), "{}", file.filename);
            assert_eq!(file.size_bytes, content.len());
        }

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn state_json_round_trips() {
        let tmp = temp_dir();
        let state = completed_state();
        let result = write_bundle(&tmp, &state).unwrap();

        let restored: PipelineState = serde_json::from_str(
            &std::fs::read_to_string(result.dir.join("state.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(restored.run_id(), state.run_id());
        assert_eq!(restored.findings(), state.findings());
        assert_eq!(restored.status(), PipelineStatus::Completed);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn failed_run_skips_missing_outputs() {
        let tmp = temp_dir();
        let mut state = PipelineState::new("https://docs.example.com/missing");
        state.advance(PipelineStatus::Fetching);
        state.fail(StageError::new(
            StageName::Fetch,
            &StageFailure::new(ErrorKind::HttpStatus, "https://docs.example.com/missing: HTTP 404"),
            1,
        ));

        let result = write_bundle(&tmp, &state).unwrap();

        let names: Vec<_> = result.manifest.files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, ["report.md", "state.json"]);
        assert!(!result.dir.join("modernized.md").exists());
        assert!(result.modernized_path().is_none());

        let report = std::fs::read_to_string(result.dir.join("report.md")).unwrap();
        assert!(report.contains("**Status:** FAILED"));
        assert!(report.contains("_Analysis did not run._"));
        assert!(report.contains("**Fetch** `HTTP_STATUS` after 1 attempt(s)"));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn report_renders_findings_and_quality() {
        let report = render_report(&completed_state());

        assert!(report.contains("| F1 | HIGH | deprecated-api | Usage | API X \\| removed |"));
        assert!(report.contains("- **F1** (deprecated-api): Use API Y"));
        assert!(report.contains("  - X was removed in v3"));
        assert!(report.contains("| accuracy | 0.90 |"));
        assert!(report.contains("**Verdict:** pass (average 0.85)"));
        assert!(report.contains("- Add a changelog link"));
        assert!(!report.contains("## Errors"));
    }
}
