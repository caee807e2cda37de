use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};
use url::Url;

use docmodern_shared::{Fetcher, StageFailure, StageName};

use crate::stage::{Stage, StageContext};

#[derive(Debug, Clone)]
pub struct FetchInput {
    pub source_url: String,
}

/// Retrieves the source document and hands back its markdown.
pub struct FetchStage {
    fetcher: Arc<dyn Fetcher>,
}

impl FetchStage {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Stage for FetchStage {
    type Input = FetchInput;
    type Output = String;

    fn name(&self) -> StageName {
        StageName::Fetch
    }

    #[instrument(skip_all, fields(url = %input.source_url))]
    async fn execute(
        &self,
        input: &FetchInput,
        ctx: &mut StageContext<'_>,
    ) -> Result<String, StageFailure> {
        // A malformed URL never reaches the adapter, so it is never retried.
        validate_url(&input.source_url)?;

        let markdown = ctx.fetch(self.fetcher.as_ref(), &input.source_url).await?;

        if docmodern_markdown::is_blank(&markdown) {
            return Err(StageFailure::empty(format!(
                "{}: fetched document is empty",
                input.source_url
            )));
        }

        debug!(chars = markdown.chars().count(), "document fetched");
        Ok(markdown)
    }
}

fn validate_url(raw: &str) -> Result<Url, StageFailure> {
    let url = Url::parse(raw.trim())
        .map_err(|e| StageFailure::network(format!("invalid URL {raw:?}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(StageFailure::network(format!(
            "invalid URL {raw:?}: only http and https are supported"
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(StageFailure::network(format!("invalid URL {raw:?}: missing host")));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubFetcher, test_config};
    use docmodern_shared::{ErrorKind, FetchError, FetchErrorKind};

    fn input(url: &str) -> FetchInput {
        FetchInput {
            source_url: url.into(),
        }
    }

    #[tokio::test]
    async fn returns_adapter_markdown() {
        let fetcher = Arc::new(StubFetcher::ok("# Guide\n\nHello.\n"));
        let stage = FetchStage::new(fetcher.clone());
        let config = test_config();
        let mut ctx = StageContext::new(&config);

        let md = stage
            .execute(&input("https://docs.example.com/guide"), &mut ctx)
            .await
            .unwrap();

        assert_eq!(md, "# Guide\n\nHello.\n");
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(ctx.attempts(), 1);
    }

    #[tokio::test]
    async fn adapter_kinds_map_one_to_one() {
        let cases = [
            (FetchErrorKind::HttpStatus(404), ErrorKind::HttpStatus),
            (FetchErrorKind::UnsupportedContent, ErrorKind::UnsupportedContent),
            (FetchErrorKind::EmptyResult, ErrorKind::EmptyResult),
            (FetchErrorKind::Network, ErrorKind::Network),
        ];

        for (adapter_kind, expected) in cases {
            let fetcher = Arc::new(StubFetcher::always(FetchError::new(adapter_kind, "boom")));
            let stage = FetchStage::new(fetcher);
            let config = test_config();
            let mut ctx = StageContext::new(&config);

            let err = stage
                .execute(&input("https://docs.example.com/guide"), &mut ctx)
                .await
                .unwrap_err();
            assert_eq!(err.kind, expected);
        }
    }

    #[tokio::test]
    async fn network_errors_are_retried() {
        let fetcher = Arc::new(StubFetcher::scripted(vec![
            Err(FetchError::network("connection reset")),
            Ok("# Recovered\n".into()),
        ]));
        let stage = FetchStage::new(fetcher.clone());
        let config = test_config();
        let mut ctx = StageContext::new(&config);

        let md = stage
            .execute(&input("https://docs.example.com/guide"), &mut ctx)
            .await
            .unwrap();

        assert_eq!(md, "# Recovered\n");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn http_status_is_not_retried() {
        let fetcher = Arc::new(StubFetcher::always(FetchError::http_status(
            503,
            "https://docs.example.com/guide",
        )));
        let stage = FetchStage::new(fetcher.clone());
        let config = test_config();
        let mut ctx = StageContext::new(&config);

        let err = stage
            .execute(&input("https://docs.example.com/guide"), &mut ctx)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::HttpStatus);
        assert!(err.message.contains("503"));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_url_skips_adapter() {
        let fetcher = Arc::new(StubFetcher::ok("# unused\n"));
        let stage = FetchStage::new(fetcher.clone());
        let config = test_config();

        for url in ["not a url", "ftp://example.com/file", "file:///etc/passwd"] {
            let mut ctx = StageContext::new(&config);
            let err = stage.execute(&input(url), &mut ctx).await.unwrap_err();
            assert_eq!(err.kind, ErrorKind::Network, "{url}");
            assert_eq!(ctx.attempts(), 0);
        }
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn whitespace_only_document_is_empty_result() {
        let fetcher = Arc::new(StubFetcher::ok("  \n\t\n"));
        let stage = FetchStage::new(fetcher);
        let config = test_config();
        let mut ctx = StageContext::new(&config);

        let err = stage
            .execute(&input("https://docs.example.com/guide"), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::EmptyResult);
    }
}
