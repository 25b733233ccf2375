//! Web search used by the chat pipeline's tool step.
//!
//! Search runs outside the cooldown gate; it is a different provider with
//! its own quota.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use marginalia_core::{defaults, Error, Result};

/// One web search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// A web search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return at most `limit` results for `query`.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

/// Brave Search configuration.
#[derive(Debug, Clone)]
pub struct BraveSearchConfig {
    pub api_key: String,
    pub endpoint: String,
    pub timeout_seconds: u64,
}

impl BraveSearchConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: defaults::BRAVE_SEARCH_URL.to_string(),
            timeout_seconds: defaults::SEARCH_TIMEOUT_SECS,
        }
    }

    /// `None` when `BRAVE_SEARCH_API_KEY` is unset; search is optional.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var(defaults::ENV_BRAVE_SEARCH_API_KEY)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())?;
        let mut config = Self::new(api_key);
        if let Ok(endpoint) = std::env::var(defaults::ENV_BRAVE_SEARCH_ENDPOINT) {
            if !endpoint.trim().is_empty() {
                config.endpoint = endpoint.trim().to_string();
            }
        }
        Some(config)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Brave web search API client.
pub struct BraveSearchProvider {
    client: Client,
    config: BraveSearchConfig,
}

impl BraveSearchProvider {
    pub fn new(config: BraveSearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[derive(Debug, Deserialize)]
struct BraveWebSearchResponse {
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    results: Option<Vec<BraveWebResult>>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResult {
    url: String,
    title: Option<String>,
    description: Option<String>,
}

impl BraveWebSearchResponse {
    fn into_hits(self, limit: usize) -> Vec<SearchHit> {
        self.web
            .and_then(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .take(limit)
            .map(|r| SearchHit {
                url: r.url,
                title: r.title.unwrap_or_default(),
                snippet: r.description.unwrap_or_default(),
            })
            .collect()
    }
}

#[async_trait]
impl SearchProvider for BraveSearchProvider {
    fn name(&self) -> &'static str {
        "brave"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("search query is empty".to_string()));
        }

        let count = limit.to_string();
        let resp = self
            .client
            .get(&self.config.endpoint)
            .header("X-Subscription-Token", &self.config.api_key)
            .header("Accept", "application/json")
            .query(&[("q", query), ("count", count.as_str())])
            .send()
            .await
            .map_err(|e| Error::Service(format!("brave search request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Service(format!("brave search HTTP {status}")));
        }

        let parsed: BraveWebSearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(format!("brave search body: {e}")))?;
        let hits = parsed.into_hits(limit);
        debug!(query_len = query.len(), results = hits.len(), "Web search finished");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_minimal_brave_shape() {
        let js = r#"{"web":{"results":[{"url":"https://example.com","title":"Example","description":"Snippet"},{"url":"https://bare.example"}]}}"#;
        let parsed: BraveWebSearchResponse = serde_json::from_str(js).unwrap();
        let hits = parsed.into_hits(5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Example");
        assert_eq!(hits[1].title, "");
        assert_eq!(hits[1].snippet, "");
    }

    #[test]
    fn test_truncates_to_limit() {
        let js = r#"{"web":{"results":[{"url":"a"},{"url":"b"},{"url":"c"}]}}"#;
        let parsed: BraveWebSearchResponse = serde_json::from_str(js).unwrap();
        assert_eq!(parsed.into_hits(2).len(), 2);
    }

    #[test]
    fn test_missing_web_section_is_empty() {
        let parsed: BraveWebSearchResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.into_hits(5).is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let provider = BraveSearchProvider::new(BraveSearchConfig::new("k")).unwrap();
        let err = provider.search("   ", 5).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
