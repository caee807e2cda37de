//! Pull a JSON payload out of free-form completion text.
//!
//! Models wrap JSON in ```` ```json ```` fences or surround it with prose.
//! Extraction is deliberately narrow: the first fenced block whose body looks
//! like JSON, else the outermost `{...}` or `[...]` span. Whatever comes out
//! must then deserialize into the caller's type exactly; there is no repair.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

/// Why a completion could not be read as the expected JSON document.
#[derive(Debug, thiserror::Error)]
pub enum JsonExtractError {
    #[error("response contains no JSON object or array")]
    NotFound,

    #[error("response JSON does not match the expected schema: {0}")]
    Schema(#[from] serde_json::Error),
}

/// Locate the JSON payload in `text`.
pub fn extract_json(text: &str) -> Option<&str> {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```[ \t]*(?:json|JSON)?[ \t]*\n(.*?)```").expect("valid regex")
    });

    for caps in FENCE_RE.captures_iter(text) {
        if let Some(body) = caps.get(1) {
            let body = body.as_str().trim();
            if body.starts_with('{') || body.starts_with('[') {
                return Some(body);
            }
        }
    }

    outermost_span(text)
}

/// Extract and deserialize in one step.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, JsonExtractError> {
    let payload = extract_json(text).ok_or(JsonExtractError::NotFound)?;
    Ok(serde_json::from_str(payload)?)
}

/// The outermost `{...}` or `[...]` span. The bracket that opens first is
/// tried first; a span that is not valid JSON falls back to the other kind,
/// so bracketed prose ahead of the payload is skipped.
fn outermost_span(text: &str) -> Option<&str> {
    let mut spans: Vec<(usize, &str)> = [span_between(text, '{', '}'), span_between(text, '[', ']')]
        .into_iter()
        .flatten()
        .collect();
    spans.sort_by_key(|(start, _)| *start);

    let (_, first) = *spans.first()?;
    spans
        .iter()
        .map(|(_, span)| *span)
        .find(|span| is_json(span))
        .or(Some(first))
}

fn span_between(text: &str, open: char, close: char) -> Option<(usize, &str)> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| (start, &text[start..=end]))
}

fn is_json(span: &str) -> bool {
    serde_json::from_str::<serde::de::IgnoredAny>(span).is_ok()
}
