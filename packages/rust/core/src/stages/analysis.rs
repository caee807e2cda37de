use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument};

use docmodern_shared::{
    CompletionClient, CompletionRequest, Finding, Severity, StageFailure, StageName,
};

use super::{optional, parse_reply, required};
use crate::stage::{Stage, StageContext};

const SYSTEM_PROMPT: &str = "You are a senior technical writer and software architect. \
Identify modernization issues in technical documentation.";

#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub raw_markdown: String,
}

/// Asks the completion service which parts of the document are outdated.
pub struct AnalysisStage {
    client: Arc<dyn CompletionClient>,
}

impl AnalysisStage {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AnalysisReply {
    findings: Vec<FindingReply>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FindingReply {
    category: String,
    description: String,
    severity: Severity,
    #[serde(default)]
    section: Option<String>,
    #[serde(default)]
    excerpt: Option<String>,
}

#[async_trait]
impl Stage for AnalysisStage {
    type Input = AnalysisInput;
    type Output = Vec<Finding>;

    fn name(&self) -> StageName {
        StageName::Analyze
    }

    #[instrument(skip_all, fields(chars = input.raw_markdown.len()))]
    async fn execute(
        &self,
        input: &AnalysisInput,
        ctx: &mut StageContext<'_>,
    ) -> Result<Vec<Finding>, StageFailure> {
        let document =
            docmodern_markdown::truncate_chars(&input.raw_markdown, ctx.config().analysis_chars);
        let request = CompletionRequest::new(SYSTEM_PROMPT, analysis_prompt(&document));

        let completion = ctx.complete(self.client.as_ref(), &request).await?;
        let findings = parse_findings(&completion.text)?;

        info!(findings = findings.len(), "analysis complete");
        Ok(findings)
    }
}

fn analysis_prompt(document: &str) -> String {
    format!(
        "Analyze the following technical documentation for modernization issues.\n\
         Identify outdated information, deprecated APIs, missing best practices, \
         broken or stale links, unclear structure, and technical debt.\n\n\
         Respond with a single JSON object and nothing else, in exactly this shape:\n\
         {{\"findings\": [{{\"category\": \"deprecated-api\", \"description\": \"...\", \
         \"severity\": \"HIGH\", \"section\": \"Installation\", \"excerpt\": \"...\"}}]}}\n\n\
         Rules:\n\
         - `category` is a short kebab-case tag such as deprecated-api, broken-link, \
         outdated-version, missing-best-practice, unclear-structure.\n\
         - `severity` is one of LOW, MEDIUM, HIGH.\n\
         - `section` (the heading the issue is under) and `excerpt` (a short verbatim \
         quote from the document) are optional.\n\
         - If nothing is outdated, return {{\"findings\": []}}.\n\n\
         DOCUMENT:\n{document}"
    )
}

/// Validate a reply and number its findings `F1`, `F2`, ... in reply order.
fn parse_findings(text: &str) -> Result<Vec<Finding>, StageFailure> {
    let reply: AnalysisReply = parse_reply("analysis", text)?;

    reply
        .findings
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            Ok(Finding {
                id: format!("F{}", idx + 1),
                category: required("category", item.category)?.to_lowercase(),
                description: required("description", item.description)?,
                severity: item.severity,
                section: optional(item.section),
                excerpt: optional(item.excerpt),
            })
        })
        .collect()
}
