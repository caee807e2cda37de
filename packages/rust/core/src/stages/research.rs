use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use docmodern_shared::{
    CompletionClient, CompletionRequest, Finding, Recommendation, Severity, StageFailure,
    StageName,
};

use super::{optional, parse_reply, required};
use crate::stage::{Stage, StageContext};

const SYSTEM_PROMPT: &str = "You are a technical researcher. Provide current, accurate \
best practices for modern software documentation.";

#[derive(Debug, Clone)]
pub struct ResearchInput {
    pub findings: Vec<Finding>,
}

/// Looks up current best practices, one batch of finding categories per call.
pub struct ResearchStage {
    client: Arc<dyn CompletionClient>,
}

impl ResearchStage {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResearchReply {
    recommendations: Vec<RecommendationReply>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecommendationReply {
    category: String,
    practice: String,
    #[serde(default)]
    rationale: Option<String>,
}

#[async_trait]
impl Stage for ResearchStage {
    type Input = ResearchInput;
    type Output = Vec<Recommendation>;

    fn name(&self) -> StageName {
        StageName::Research
    }

    #[instrument(skip_all, fields(findings = input.findings.len()))]
    async fn execute(
        &self,
        input: &ResearchInput,
        ctx: &mut StageContext<'_>,
    ) -> Result<Vec<Recommendation>, StageFailure> {
        if input.findings.is_empty() {
            debug!("no findings, skipping research");
            return Ok(Vec::new());
        }

        let categories = ordered_categories(&input.findings);
        let batch_size = ctx.config().research_batch_size.max(1);
        let mut recommendations = Vec::new();

        for batch in categories.chunks(batch_size) {
            let request = CompletionRequest::new(
                SYSTEM_PROMPT,
                research_prompt(batch, &input.findings),
            );
            let completion = ctx.complete(self.client.as_ref(), &request).await?;
            let replies = parse_recommendations(&completion.text, batch)?;
            recommendations.extend(link_to_findings(replies, &input.findings));
        }

        info!(
            categories = categories.len(),
            recommendations = recommendations.len(),
            "research complete"
        );
        Ok(recommendations)
    }
}

/// Categories compare trimmed and case-insensitively.
fn category_key(category: &str) -> String {
    category.trim().to_lowercase()
}

/// Distinct category keys, most severe first, ties in order of first appearance.
fn ordered_categories(findings: &[Finding]) -> Vec<String> {
    let mut seen: HashMap<String, (Severity, usize)> = HashMap::new();
    for (idx, finding) in findings.iter().enumerate() {
        seen.entry(category_key(&finding.category))
            .and_modify(|(severity, _)| *severity = (*severity).max(finding.severity))
            .or_insert((finding.severity, idx));
    }

    let mut ordered: Vec<_> = seen.into_iter().collect();
    ordered.sort_by(|(_, (sev_a, first_a)), (_, (sev_b, first_b))| {
        sev_b.cmp(sev_a).then(first_a.cmp(first_b))
    });
    ordered.into_iter().map(|(c, _)| c).collect()
}

fn research_prompt(categories: &[String], findings: &[Finding]) -> String {
    let mut issues = String::new();
    for key in categories {
        let members: Vec<&Finding> = findings
            .iter()
            .filter(|f| category_key(&f.category) == *key)
            .collect();
        let label = members.first().map_or(key.as_str(), |f| f.category.trim());
        issues.push_str(&format!("\n## {label}\n"));
        for finding in members {
            let section = finding.section.as_deref().unwrap_or("General");
            issues.push_str(&format!(
                "- [{}] {}: {}\n",
                finding.severity, section, finding.description
            ));
        }
    }

    format!(
        "Research current best practices for the following documentation issues, \
         grouped by category.\n{issues}\n\
         Provide up-to-date recommendations, modern alternatives, and tools that \
         address each category.\n\n\
         Respond with a single JSON object and nothing else, in exactly this shape:\n\
         {{\"recommendations\": [{{\"category\": \"<one of the categories above>\", \
         \"practice\": \"...\", \"rationale\": \"...\"}}]}}\n\n\
         Rules:\n\
         - Give at least one recommendation for every category listed.\n\
         - `category` must be copied exactly from the list above.\n\
         - `rationale` is optional."
    )
}

/// Validate a reply against the categories that were asked about.
fn parse_recommendations(
    text: &str,
    requested: &[String],
) -> Result<Vec<RecommendationReply>, StageFailure> {
    let reply: ResearchReply = parse_reply("research", text)?;

    let mut covered = BTreeSet::new();
    let mut out = Vec::with_capacity(reply.recommendations.len());
    for item in reply.recommendations {
        let category = category_key(&required("category", item.category)?);
        if !requested.contains(&category) {
            return Err(StageFailure::parse(format!(
                "research: recommendation for unknown category `{category}`"
            )));
        }
        covered.insert(category.clone());
        out.push(RecommendationReply {
            category,
            practice: required("practice", item.practice)?,
            rationale: optional(item.rationale),
        });
    }

    if let Some(missing) = requested.iter().find(|c| !covered.contains(*c)) {
        return Err(StageFailure::parse(format!(
            "research: no recommendation for category `{missing}`"
        )));
    }

    Ok(out)
}

/// One recommendation per finding of the recommended category.
fn link_to_findings(replies: Vec<RecommendationReply>, findings: &[Finding]) -> Vec<Recommendation> {
    let researched_at = Utc::now();
    let mut out = Vec::new();
    for reply in replies {
        for finding in findings
            .iter()
            .filter(|f| category_key(&f.category) == reply.category)
        {
            out.push(Recommendation {
                finding_id: finding.id.clone(),
                category: finding.category.clone(),
                practice: reply.practice.clone(),
                rationale: reply.rationale.clone(),
                researched_at,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::testing::{StubCompletion, finding, test_config};
    use docmodern_shared::{ErrorKind, PipelineConfig};

    async fn research(
        client: Arc<StubCompletion>,
        findings: Vec<Finding>,
        config: &PipelineConfig,
    ) -> Result<Vec<Recommendation>, StageFailure> {
        let stage = ResearchStage::new(client);
        let mut ctx = StageContext::new(config);
        stage.execute(&ResearchInput { findings }, &mut ctx).await
    }

    #[tokio::test]
    async fn empty_findings_skip_the_service() {
        let client = Arc::new(StubCompletion::scripted(Vec::new()));
        let recs = research(client.clone(), Vec::new(), &test_config()).await.unwrap();

        assert!(recs.is_empty());
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn recommendations_reference_existing_findings() {
        let findings = vec![
            finding("F1", "deprecated-api", Severity::High),
            finding("F2", "broken-link", Severity::Low),
            finding("F3", "deprecated-api", Severity::Medium),
        ];
        let client = Arc::new(StubCompletion::replies([r#"{"recommendations": [
            {"category": "deprecated-api", "practice": "Use API Y", "rationale": "X was removed in v3"},
            {"category": "broken-link", "practice": "Link to the current reference"}
        ]}"#]));

        let recs = research(client.clone(), findings.clone(), &test_config())
            .await
            .unwrap();

        let ids: HashSet<_> = findings.iter().map(|f| f.id.as_str()).collect();
        assert!(recs.iter().all(|r| ids.contains(r.finding_id.as_str())));

        let linked: Vec<_> = recs.iter().map(|r| r.finding_id.as_str()).collect();
        assert_eq!(linked, ["F1", "F3", "F2"]);
        assert_eq!(recs[0].rationale.as_deref(), Some("X was removed in v3"));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn categories_are_batched() {
        let findings = vec![
            finding("F1", "a", Severity::Low),
            finding("F2", "b", Severity::High),
            finding("F3", "c", Severity::Medium),
        ];
        let config = PipelineConfig {
            research_batch_size: 2,
            ..test_config()
        };
        let client = Arc::new(StubCompletion::replies([
            r#"{"recommendations": [{"category": "b", "practice": "pb"}, {"category": "c", "practice": "pc"}]}"#,
            r#"{"recommendations": [{"category": "a", "practice": "pa"}]}"#,
        ]));

        let recs = research(client.clone(), findings, &config).await.unwrap();

        assert_eq!(client.calls(), 2);
        assert_eq!(recs.len(), 3);
        let requests = client.requests();
        assert!(requests[0].prompt.contains("## b") && requests[0].prompt.contains("## c"));
        assert!(requests[1].prompt.contains("## a") && !requests[1].prompt.contains("## b"));
    }

    #[tokio::test]
    async fn missing_category_is_parse_error() {
        let findings = vec![
            finding("F1", "deprecated-api", Severity::High),
            finding("F2", "broken-link", Severity::Low),
        ];
        let client = Arc::new(StubCompletion::replies([
            r#"{"recommendations": [{"category": "deprecated-api", "practice": "Use API Y"}]}"#,
        ]));

        let err = research(client.clone(), findings, &test_config()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseError);
        assert!(err.message.contains("broken-link"));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_category_is_parse_error() {
        let findings = vec![finding("F1", "deprecated-api", Severity::High)];
        let client = Arc::new(StubCompletion::replies([r#"{"recommendations": [
            {"category": "deprecated-api", "practice": "Use API Y"},
            {"category": "security", "practice": "Rotate keys"}
        ]}"#]));

        let err = research(client, findings, &test_config()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseError);
    }

    #[tokio::test]
    async fn categories_match_regardless_of_case() {
        let findings = vec![
            finding("F1", "Deprecated-API", Severity::High),
            finding("F2", "deprecated-api", Severity::Low),
        ];
        let client = Arc::new(StubCompletion::replies([r#"{"recommendations": [
            {"category": "Deprecated-API", "practice": "Use API Y"}
        ]}"#]));

        let recs = research(client.clone(), findings, &test_config()).await.unwrap();

        let linked: Vec<_> = recs
            .iter()
            .map(|r| (r.finding_id.as_str(), r.category.as_str()))
            .collect();
        assert_eq!(linked, [("F1", "Deprecated-API"), ("F2", "deprecated-api")]);
        assert!(client.requests()[0].prompt.contains("## Deprecated-API\n"));
    }

    #[test]
    fn categories_ordered_by_severity_then_appearance() {
        let findings = vec![
            finding("F1", "style", Severity::Low),
            finding("F2", "links", Severity::Medium),
            finding("F3", "api", Severity::Medium),
            finding("F4", "style", Severity::High),
        ];
        assert_eq!(ordered_categories(&findings), ["style", "links", "api"]);
    }
}
