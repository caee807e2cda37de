//! The five pipeline stages, in execution order.

mod analysis;
mod fetch;
mod generation;
mod quality;
mod research;

pub use analysis::{AnalysisInput, AnalysisStage};
pub use fetch::{FetchInput, FetchStage};
pub use generation::{GenerationInput, GenerationStage};
pub use quality::{QualityInput, QualityStage};
pub use research::{ResearchInput, ResearchStage};

use serde::de::DeserializeOwned;

use docmodern_shared::StageFailure;

/// Read a completion as the JSON document `T`. Anything short of an exact
/// match is a `PARSE_ERROR`.
fn parse_reply<T: DeserializeOwned>(stage: &str, text: &str) -> Result<T, StageFailure> {
    docmodern_llm::parse_json(text).map_err(|e| StageFailure::parse(format!("{stage}: {e}")))
}

/// Trim and reject blank required strings.
fn required(field: &str, value: String) -> Result<String, StageFailure> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StageFailure::parse(format!("`{field}` must not be empty")));
    }
    Ok(trimmed.to_string())
}

/// Trim optional strings, dropping blank ones.
fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
