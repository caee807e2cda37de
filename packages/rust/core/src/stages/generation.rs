use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument};

use docmodern_shared::{
    CompletionClient, CompletionRequest, Finding, Recommendation, StageFailure, StageName,
};

use crate::stage::{Stage, StageContext};

const SYSTEM_PROMPT: &str =
    "You are an expert technical writer producing clean, modern markdown.";

#[derive(Debug, Clone)]
pub struct GenerationInput {
    pub raw_markdown: String,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<Recommendation>,
}

/// Rewrites the document so that every finding is addressed.
pub struct GenerationStage {
    client: Arc<dyn CompletionClient>,
}

impl GenerationStage {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Stage for GenerationStage {
    type Input = GenerationInput;
    type Output = String;

    fn name(&self) -> StageName {
        StageName::Generate
    }

    #[instrument(skip_all, fields(findings = input.findings.len(), recommendations = input.recommendations.len()))]
    async fn execute(
        &self,
        input: &GenerationInput,
        ctx: &mut StageContext<'_>,
    ) -> Result<String, StageFailure> {
        let document =
            docmodern_markdown::truncate_chars(&input.raw_markdown, ctx.config().generation_chars);
        let prompt = generation_prompt(&document, &input.findings, &input.recommendations);
        let request = CompletionRequest::new(SYSTEM_PROMPT, prompt);

        let completion = ctx.complete(self.client.as_ref(), &request).await?;
        let markdown = clean_reply(&completion.text)?;

        info!(chars = markdown.chars().count(), "document generated");
        Ok(markdown)
    }
}

fn generation_prompt(
    document: &str,
    findings: &[Finding],
    recommendations: &[Recommendation],
) -> String {
    let mut issues = String::new();
    if findings.is_empty() {
        issues.push_str("- No outdated content was identified; focus on structure and clarity.\n");
    }
    for finding in findings {
        let section = finding.section.as_deref().unwrap_or("General");
        issues.push_str(&format!(
            "- {} [{}] {}: {}\n",
            finding.id, finding.severity, section, finding.description
        ));
        for rec in recommendations.iter().filter(|r| r.finding_id == finding.id) {
            issues.push_str(&format!("  - Recommended: {}\n", rec.practice));
            if let Some(rationale) = &rec.rationale {
                issues.push_str(&format!("    Rationale: {rationale}\n"));
            }
        }
    }

    format!(
        "Rewrite the documentation using modern best practices.\n\
         Requirements:\n\
         - Use clear markdown with proper headings and lists.\n\
         - Keep the original heading structure and section order unless an issue \
         below requires restructuring.\n\
         - Address every issue listed below using its recommended practice.\n\
         - Update outdated info and include modern tools/frameworks.\n\
         - Include code examples where helpful.\n\
         - Add a 'Last Updated' section dated {today}.\n\
         - Include cross-references where relevant.\n\
         - Return only the markdown document, without commentary.\n\n\
         Original Documentation:\n{document}\n\n\
         Issues and Recommendations:\n{issues}",
        today = Utc::now().format("%Y-%m-%d"),
    )
}

/// Unwrap an outer ```` ```markdown ```` fence, normalize, and make sure
/// every code fence is closed.
fn clean_reply(text: &str) -> Result<String, StageFailure> {
    let unwrapped = docmodern_markdown::strip_outer_fence(text);
    if docmodern_markdown::is_blank(&unwrapped) {
        return Err(StageFailure::empty("generation returned a blank document"));
    }
    Ok(docmodern_markdown::normalize(&unwrapped))
}
