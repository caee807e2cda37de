//! Completion-service client for OpenAI-compatible chat APIs (OpenRouter by
//! default).
//!
//! [`OpenRouterClient`] implements the [`CompletionClient`] contract. Every
//! failure is reported as a [`ServiceError`]; the pipeline decides whether to
//! retry from its kind:
//!
//! | Condition                                     | Kind          |
//! |-----------------------------------------------|---------------|
//! | HTTP 429                                      | `RateLimit`   |
//! | HTTP 408/504, request timed out               | `Timeout`     |
//! | other 4xx, `content_filter`, refusal message  | `Refusal`     |
//! | 5xx, connection failure, malformed body       | `Unavailable` |
//!
//! [`json`] extracts structured payloads from completion text.

pub mod json;

pub use json::{JsonExtractError, extract_json, parse_json};

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use docmodern_shared::{
    AppConfig, Completion, CompletionClient, CompletionRequest, DocModernError, LlmConfig, Result,
    ServiceError, ServiceErrorKind, resolve_api_key,
};

/// User-Agent string for completion requests.
const USER_AGENT: &str = concat!("docmodern/", env!("CARGO_PKG_VERSION"));

/// Error bodies are clipped to this many characters in messages.
const MAX_ERROR_BODY: usize = 300;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    /// OpenRouter reports some upstream failures inside a 200 body.
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Chat-completions client holding the model settings from `[llm]`.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenRouterClient {
    /// Build a client from the `[llm]` section and an explicit API key.
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DocModernError::Adapter(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Build a client, reading the API key from the configured env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = resolve_api_key(config)?;
        Self::new(&config.llm, api_key)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionClient for OpenRouterClient {
    #[instrument(skip_all, fields(model = %self.model, prompt_chars = request.prompt.len()))]
    async fn complete(
        &self,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> std::result::Result<Completion, ServiceError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: &request.system,
                },
                Message {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "completion request rejected");
            return Err(map_status(status, &text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            ServiceError::new(
                ServiceErrorKind::Unavailable,
                format!("malformed completion response: {e}"),
            )
        })?;

        let completion = into_completion(parsed, &self.model)?;
        debug!(
            tokens_in = completion.tokens_in,
            tokens_out = completion.tokens_out,
            "completion received"
        );
        Ok(completion)
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::new(ServiceErrorKind::Timeout, format!("request timed out: {err}"))
    } else {
        ServiceError::new(ServiceErrorKind::Unavailable, format!("request failed: {err}"))
    }
}

fn map_status(status: StatusCode, body: &str) -> ServiceError {
    let kind = match status.as_u16() {
        429 => ServiceErrorKind::RateLimit,
        408 | 504 => ServiceErrorKind::Timeout,
        400..=499 => ServiceErrorKind::Refusal,
        _ => ServiceErrorKind::Unavailable,
    };
    ServiceError::new(kind, format!("HTTP {}: {}", status.as_u16(), clip(body)))
}

/// Map an `error` object embedded in a response body. Codes follow HTTP.
fn map_api_error(err: ApiError) -> ServiceError {
    let code = err.code.as_ref().and_then(|c| match c {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    });

    match code.and_then(|c| u16::try_from(c).ok()).and_then(|c| StatusCode::from_u16(c).ok()) {
        Some(status) => map_status(status, &err.message),
        None => ServiceError::new(ServiceErrorKind::Unavailable, clip(&err.message)),
    }
}

fn into_completion(
    response: ChatResponse,
    requested_model: &str,
) -> std::result::Result<Completion, ServiceError> {
    if let Some(err) = response.error {
        return Err(map_api_error(err));
    }

    let Some(choice) = response.choices.into_iter().next() else {
        return Err(ServiceError::new(
            ServiceErrorKind::Unavailable,
            "completion response has no choices",
        ));
    };

    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(ServiceError::new(
            ServiceErrorKind::Refusal,
            "completion blocked by content filter",
        ));
    }

    if let Some(refusal) = choice.message.refusal.filter(|r| !r.trim().is_empty()) {
        return Err(ServiceError::new(ServiceErrorKind::Refusal, clip(&refusal)));
    }

    let usage = response.usage.unwrap_or(Usage {
        prompt_tokens: 0,
        completion_tokens: 0,
    });

    Ok(Completion {
        text: choice.message.content.unwrap_or_default(),
        tokens_in: usage.prompt_tokens,
        tokens_out: usage.completion_tokens,
        model: response.model.unwrap_or_else(|| requested_model.to_string()),
    })
}

fn clip(s: &str) -> String {
    let s = s.trim();
    match s.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn client_for(server: &MockServer) -> OpenRouterClient {
        let config = LlmConfig {
            base_url: format!("{}/api/v1/", server.uri()),
            model: "test/model".into(),
            ..LlmConfig::default()
        };
        OpenRouterClient::new(&config, "sk-test").unwrap()
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new("You are a reviewer.", "Review this.")
    }

    async fn respond_with(template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn complete_returns_text_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "test/model",
                "messages": [
                    {"role": "system", "content": "You are a reviewer."},
                    {"role": "user", "content": "Review this."}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "test/model-2025",
                "choices": [{"message": {"role": "assistant", "content": "Looks good."}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 42, "completion_tokens": 7}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let completion = client_for(&server).complete(&request(), TIMEOUT).await.unwrap();

        assert_eq!(completion.text, "Looks good.");
        assert_eq!(completion.tokens_in, 42);
        assert_eq!(completion.tokens_out, 7);
        assert_eq!(completion.model, "test/model-2025");
    }

    #[tokio::test]
    async fn missing_usage_counts_zero() {
        let server = respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "ok"}}]
        })))
        .await;

        let completion = client_for(&server).complete(&request(), TIMEOUT).await.unwrap();
        assert_eq!(completion.tokens_in, 0);
        assert_eq!(completion.model, "test/model");
    }

    #[tokio::test]
    async fn status_codes_map_to_kinds() {
        let cases = [
            (429, ServiceErrorKind::RateLimit),
            (504, ServiceErrorKind::Timeout),
            (401, ServiceErrorKind::Refusal),
            (400, ServiceErrorKind::Refusal),
            (500, ServiceErrorKind::Unavailable),
            (503, ServiceErrorKind::Unavailable),
        ];

        for (status, expected) in cases {
            let server =
                respond_with(ResponseTemplate::new(status).set_body_string("upstream says no")).await;
            let err = client_for(&server).complete(&request(), TIMEOUT).await.unwrap_err();
            assert_eq!(err.kind, expected, "status {status}");
            assert!(err.message.contains("upstream says no"));
        }
    }

    #[tokio::test]
    async fn content_filter_is_refusal() {
        let server = respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": null}, "finish_reason": "content_filter"}]
        })))
        .await;

        let err = client_for(&server).complete(&request(), TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind, ServiceErrorKind::Refusal);
    }

    #[tokio::test]
    async fn embedded_error_uses_its_code() {
        let server = respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "error": {"code": 502, "message": "provider returned error"}
        })))
        .await;

        let err = client_for(&server).complete(&request(), TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind, ServiceErrorKind::Unavailable);
        assert!(err.message.contains("provider returned error"));
    }

    #[tokio::test]
    async fn malformed_body_is_unavailable() {
        let server = respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>")).await;

        let err = client_for(&server).complete(&request(), TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind, ServiceErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"choices": [{"message": {"content": "late"}}]}))
                .set_delay(Duration::from_secs(2)),
        )
        .await;

        let err = client_for(&server)
            .complete(&request(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ServiceErrorKind::Timeout);
    }

    #[test]
    fn clip_long_bodies() {
        let long = "x".repeat(1_000);
        let clipped = clip(&long);
        assert_eq!(clipped.len(), MAX_ERROR_BODY + 3);
        assert_eq!(clip("  short  "), "short");
    }
}
