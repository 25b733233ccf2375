//! Gemini inference backend implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use marginalia_core::{defaults, Error, Result};

use super::error::{to_core_error, GeminiErrorCode};
use super::types::{GenerateContentRequest, GenerateContentResponse, GeminiErrorResponse};
use crate::backend::{GenerateRequest, GenerationBackend};

/// Configuration for the Gemini backend.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: defaults::GEMINI_URL.to_string(),
            api_key: api_key.into(),
            model: defaults::GEN_MODEL.to_string(),
            timeout_seconds: defaults::GEN_TIMEOUT_SECS,
        }
    }

    /// Load from environment variables.
    ///
    /// `GEMINI_API_KEY` is required; a missing or blank key is a
    /// configuration error rather than something discovered on first call.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(defaults::ENV_GEMINI_API_KEY)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(format!("{} is not set", defaults::ENV_GEMINI_API_KEY))
            })?;

        Ok(Self {
            base_url: std::env::var(defaults::ENV_GEMINI_BASE_URL)
                .unwrap_or_else(|_| defaults::GEMINI_URL.to_string()),
            api_key,
            model: std::env::var(defaults::ENV_GEMINI_MODEL)
                .unwrap_or_else(|_| defaults::GEN_MODEL.to_string()),
            timeout_seconds: std::env::var(defaults::ENV_GEMINI_TIMEOUT_SECS)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::GEN_TIMEOUT_SECS),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

/// Gemini `generateContent` backend.
pub struct GeminiBackend {
    client: Client,
    config: GeminiConfig,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        info!(
            base_url = %config.base_url,
            model = %config.model,
            "Initializing Gemini backend"
        );

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(GeminiConfig::from_env()?)
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    async fn generate_content(&self, request: &GenerateRequest) -> Result<String> {
        debug!(
            model = %self.config.model,
            parts = request.parts.len(),
            blobs = request.blob_count(),
            "Sending generateContent request"
        );

        let body = GenerateContentRequest::from(request);
        let response = self
            .client
            .post(self.config.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Service(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let (error_status, message) = match serde_json::from_str::<GeminiErrorResponse>(&text)
            {
                Ok(body) => (body.error.status, body.error.message),
                Err(_) => (String::new(), text),
            };
            let code = GeminiErrorCode::from_response(status.as_u16(), &error_status);
            return Err(to_core_error(
                code,
                &format!("Gemini returned {status}: {message}"),
            ));
        }

        let result: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| Error::Service(format!("Failed to parse response: {e}")))?;

        let text = result.text();
        if text.trim().is_empty() {
            return Err(Error::EmptyResult(result.empty_reason()));
        }

        debug!(response_len = text.len(), "Generation complete");
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
