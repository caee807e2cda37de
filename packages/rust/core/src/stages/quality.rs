use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument};

use docmodern_shared::{
    CompletionClient, CompletionRequest, QUALITY_DIMENSIONS, QualityReport, StageFailure,
    StageName, Verdict,
};

use super::{optional, parse_reply, required};
use crate::stage::{Stage, StageContext};

const SYSTEM_PROMPT: &str = "You are a meticulous technical documentation reviewer.";

#[derive(Debug, Clone)]
pub struct QualityInput {
    pub raw_markdown: String,
    pub modernized_markdown: String,
}

/// Scores the modernized document against the original.
pub struct QualityStage {
    client: Arc<dyn CompletionClient>,
}

impl QualityStage {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QualityReply {
    scores: BTreeMap<String, f64>,
    verdict: Verdict,
    summary: String,
    #[serde(default)]
    suggestions: Vec<String>,
}

#[async_trait]
impl Stage for QualityStage {
    type Input = QualityInput;
    type Output = QualityReport;

    fn name(&self) -> StageName {
        StageName::QualityCheck
    }

    #[instrument(skip_all)]
    async fn execute(
        &self,
        input: &QualityInput,
        ctx: &mut StageContext<'_>,
    ) -> Result<QualityReport, StageFailure> {
        let limit = ctx.config().quality_chars;
        let original = docmodern_markdown::truncate_chars(&input.raw_markdown, limit);
        let modernized = docmodern_markdown::truncate_chars(&input.modernized_markdown, limit);
        let request = CompletionRequest::new(SYSTEM_PROMPT, quality_prompt(&original, &modernized));

        let completion = ctx.complete(self.client.as_ref(), &request).await?;
        let report = parse_report(&completion.text)?;

        info!(
            average = report.average_score,
            verdict = %report.verdict,
            "quality check complete"
        );
        Ok(report)
    }
}

fn quality_prompt(original: &str, modernized: &str) -> String {
    let dimensions = QUALITY_DIMENSIONS.join(", ");
    format!(
        "Compare the original and modernized documentation.\n\
         Score each of these dimensions from 0.0 to 1.0: {dimensions}.\n\
         Give an overall verdict (pass, needs_revision, or fail), a one-paragraph \
         summary, and concrete suggestions for further improvement.\n\n\
         Respond with a single JSON object and nothing else, in exactly this shape:\n\
         {{\"scores\": {{\"accuracy\": 0.9, \"completeness\": 0.8, \"clarity\": 0.85, \
         \"modernization\": 0.9}}, \"verdict\": \"pass\", \"summary\": \"...\", \
         \"suggestions\": [\"...\"]}}\n\n\
         Original:\n{original}\n\nModernized:\n{modernized}"
    )
}

/// Validate a reply: exactly the known dimensions, each within [0, 1].
fn parse_report(text: &str) -> Result<QualityReport, StageFailure> {
    let reply: QualityReply = parse_reply("quality", text)?;

    if let Some(missing) = QUALITY_DIMENSIONS
        .iter()
        .find(|d| !reply.scores.contains_key(**d))
    {
        return Err(StageFailure::parse(format!(
            "quality: missing score for `{missing}`"
        )));
    }
    if let Some(unknown) = reply
        .scores
        .keys()
        .find(|k| !QUALITY_DIMENSIONS.contains(&k.as_str()))
    {
        return Err(StageFailure::parse(format!(
            "quality: unknown dimension `{unknown}`"
        )));
    }
    if let Some((name, score)) = reply
        .scores
        .iter()
        .find(|(_, s)| !(0.0..=1.0).contains(*s))
    {
        return Err(StageFailure::parse(format!(
            "quality: score for `{name}` is {score}, expected 0.0 to 1.0"
        )));
    }

    let average_score = average(&reply.scores);
    Ok(QualityReport {
        scores: reply.scores,
        verdict: reply.verdict,
        summary: required("summary", reply.summary)?,
        suggestions: reply
            .suggestions
            .into_iter()
            .filter_map(|s| optional(Some(s)))
            .collect(),
        average_score,
    })
}

/// Mean of the scores, rounded to two decimals.
fn average(scores: &BTreeMap<String, f64>) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let mean = scores.values().sum::<f64>() / scores.len() as f64;
    (mean * 100.0).round() / 100.0
}
