use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::time::Duration;
use thiserror::Error;

use crate::wire::CategorizationRequest;

#[derive(Debug, Error)]
pub enum CategorizationError {
    #[error("Categorizer unavailable: {0}")]
    Unavailable(String),
    #[error("Categorizer timed out after {0:?}")]
    Timeout(Duration),
    #[error("Categorizer HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Malformed categorizer reply: {0}")]
    Malformed(String),
}

/// Abstraction over the external categorization collaborator.
/// Implementations take one batch request and return the raw reply text.
#[async_trait]
pub trait Categorizer: Send + Sync {
    async fn categorize(&self, request: &CategorizationRequest) -> Result<String, CategorizationError>;
}

/// Returns a pre-set reply. Used in tests and for offline runs against a recorded answer.
pub struct StaticCategorizer {
    pub reply: String,
}

impl StaticCategorizer {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl Categorizer for StaticCategorizer {
    async fn categorize(&self, _request: &CategorizationRequest) -> Result<String, CategorizationError> {
        Ok(self.reply.clone())
    }
}

/// Stands in when no endpoint is configured; every batch falls back to `Uncategorized`.
pub struct UnavailableCategorizer;

#[async_trait]
impl Categorizer for UnavailableCategorizer {
    async fn categorize(&self, _request: &CategorizationRequest) -> Result<String, CategorizationError> {
        Err(CategorizationError::Unavailable(
            "no categorizer endpoint configured".to_string(),
        ))
    }
}

/// POSTs the request as JSON to an HTTP endpoint and returns the response body.
pub struct HttpCategorizer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCategorizer {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, CategorizationError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| CategorizationError::Unavailable(format!("invalid API key: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Categorizer for HttpCategorizer {
    async fn categorize(&self, request: &CategorizationRequest) -> Result<String, CategorizationError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_request() -> CategorizationRequest {
        CategorizationRequest {
            category_vocabulary: vec![],
            rules: vec![],
            batch: vec![],
        }
    }

    #[tokio::test]
    async fn static_returns_preset_reply() {
        let c = StaticCategorizer::new("[]");
        assert_eq!(c.categorize(&empty_request()).await.unwrap(), "[]");
    }

    #[tokio::test]
    async fn unavailable_always_errors() {
        let err = UnavailableCategorizer
            .categorize(&empty_request())
            .await
            .unwrap_err();
        assert!(matches!(err, CategorizationError::Unavailable(_)));
    }

    #[tokio::test]
    async fn http_connection_refused_is_an_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let c = HttpCategorizer::new("http://127.0.0.1:9/categorize", Some("k"), Duration::from_secs(2))
            .unwrap();
        assert_eq!(c.endpoint(), "http://127.0.0.1:9/categorize");
        assert!(c.categorize(&empty_request()).await.is_err());
    }
}
