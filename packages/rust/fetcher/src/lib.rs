//! HTTP document fetcher.
//!
//! [`HttpFetcher`] implements the [`Fetcher`] contract: it downloads a single
//! documentation page, checks the status and content type, and converts the
//! body to Markdown. HTML goes through [`docmodern_markdown::convert`]; plain
//! text and Markdown bodies are only normalized.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use tracing::{debug, instrument, warn};
use url::Url;

use docmodern_shared::{DocModernError, FetchError, FetchErrorKind, Fetcher, Result};

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("docmodern/", env!("CARGO_PKG_VERSION"));

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 5;

/// How the body of a response is turned into Markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Html,
    Text,
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// Fetches documentation pages over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    /// Allow localhost/private IPs (for tests against a mock server).
    allow_localhost: bool,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::build(false)
    }

    /// A fetcher that may reach localhost and private address ranges.
    pub fn allowing_localhost() -> Result<Self> {
        Self::build(true)
    }

    fn build(allow_localhost: bool) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(redirect_policy(allow_localhost))
            .build()
            .map_err(|e| DocModernError::Adapter(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            allow_localhost,
        })
    }
}

/// Follow at most [`MAX_REDIRECTS`] hops, re-checking every hop target.
fn redirect_policy(allow_localhost: bool) -> Policy {
    Policy::custom(move |attempt| {
        match check_redirect(attempt.url(), attempt.previous().len(), allow_localhost) {
            Ok(()) => attempt.follow(),
            Err(reason) => attempt.error(reason),
        }
    })
}

fn check_redirect(
    next: &Url,
    previous: usize,
    allow_localhost: bool,
) -> std::result::Result<(), String> {
    if previous >= MAX_REDIRECTS {
        return Err(format!("too many redirects (limit {MAX_REDIRECTS})"));
    }
    if !matches!(next.scheme(), "http" | "https") {
        return Err(format!("redirect to unsupported scheme {}", next.scheme()));
    }
    if !allow_localhost && is_ssrf_target(next) {
        warn!(target_url = %next, "SSRF protection: redirect blocked");
        return Err(format!("redirect to private or loopback address {next} refused"));
    }
    Ok(())
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(&self, url: &str, timeout: Duration) -> std::result::Result<String, FetchError> {
        let parsed = parse_document_url(url)?;

        if !self.allow_localhost && is_ssrf_target(&parsed) {
            warn!("SSRF protection: blocked");
            return Err(FetchError::network(format!(
                "{url}: refusing to fetch a private or loopback address"
            )));
        }

        debug!(timeout_ms = timeout.as_millis() as u64, "fetching document");

        let response = self
            .client
            .get(parsed.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(status.as_u16(), url));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let kind = classify_content_type(content_type.as_deref()).ok_or_else(|| {
            FetchError::new(
                FetchErrorKind::UnsupportedContent,
                format!(
                    "{url}: unsupported content type {}",
                    content_type.as_deref().unwrap_or("")
                ),
            )
        })?;

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::network(format!("{url}: body read failed: {e}")))?;

        let markdown = match kind {
            BodyKind::Html => {
                docmodern_markdown::convert(&body, parsed.as_str()).map_err(|e| {
                    FetchError::new(FetchErrorKind::UnsupportedContent, format!("{url}: {e}"))
                })?
            }
            BodyKind::Text => docmodern_markdown::normalize(&body),
        };

        if docmodern_markdown::is_blank(&markdown) {
            return Err(FetchError::new(
                FetchErrorKind::EmptyResult,
                format!("{url}: document has no readable content"),
            ));
        }

        debug!(chars = markdown.chars().count(), "document converted");
        Ok(markdown)
    }
}

// ---------------------------------------------------------------------------
// URL and content checks
// ---------------------------------------------------------------------------

/// Parse a document URL, accepting only absolute http(s) URLs.
///
/// A malformed URL is reported as a network failure; it never reached the
/// network, so retrying it would not help.
pub fn parse_document_url(url: &str) -> std::result::Result<Url, FetchError> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| FetchError::network(format!("invalid URL {url:?}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(FetchError::network(format!(
                "invalid URL {url:?}: unsupported scheme {other}"
            )));
        }
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(FetchError::network(format!("invalid URL {url:?}: missing host")));
    }

    Ok(parsed)
}

fn classify_content_type(content_type: Option<&str>) -> Option<BodyKind> {
    // No header: let the HTML parser sniff it.
    let Some(raw) = content_type else {
        return Some(BodyKind::Html);
    };

    let mime = raw
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "text/html" | "application/xhtml+xml" => Some(BodyKind::Html),
        "text/plain" | "text/markdown" | "text/x-markdown" => Some(BodyKind::Text),
        _ => None,
    }
}

/// Check if a URL targets a loopback, private, or local-only host.
fn is_ssrf_target(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
