//! The model client adapter used by the summary jobs and the chat pipeline.

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tracing::{debug, warn};

use marginalia_core::{
    defaults, ContentPart, DecisionResult, Error, FileKind, GenerationResult, Result,
};

use crate::backend::{GenerateRequest, GenerationBackend};
use crate::cooldown::CooldownGate;
use crate::prompts;
use crate::repair::parse_model_json;
use crate::search::{SearchHit, SearchProvider};

/// Outcome of the lightweight tool-use decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolDecision {
    /// The model wants a web search. `query` is `None` when it asked for a
    /// search without saying what to look for.
    Search { query: Option<String> },
    /// Answer directly.
    Respond,
}

#[derive(Debug, Default, Deserialize)]
struct RawToolDecision {
    #[serde(default)]
    action: String,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    query: Option<String>,
}

impl From<RawToolDecision> for ToolDecision {
    fn from(raw: RawToolDecision) -> Self {
        let is_search_tool = raw.tool.as_deref().is_some_and(|t| {
            t.eq_ignore_ascii_case("google_search") || t.eq_ignore_ascii_case("web_search")
        });
        if raw.action.eq_ignore_ascii_case("tool_use") && is_search_tool {
            let query = raw
                .query
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty());
            ToolDecision::Search { query }
        } else {
            ToolDecision::Respond
        }
    }
}

/// Gated access to the generative model and the optional web search.
///
/// Every model call acquires the shared [`CooldownGate`] first. The client
/// never retries.
#[derive(Clone)]
pub struct ModelClient {
    backend: Arc<dyn GenerationBackend>,
    gate: Arc<CooldownGate>,
    search: Option<Arc<dyn SearchProvider>>,
}

impl ModelClient {
    pub fn new(backend: Arc<dyn GenerationBackend>, gate: Arc<CooldownGate>) -> Self {
        Self {
            backend,
            gate,
            search: None,
        }
    }

    /// Enable web search.
    pub fn with_search(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(provider);
        self
    }

    pub fn gate(&self) -> &Arc<CooldownGate> {
        &self.gate
    }

    pub fn has_search(&self) -> bool {
        self.search.is_some()
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    async fn call(&self, operation: &'static str, request: GenerateRequest) -> Result<String> {
        let waited = self.gate.acquire().await;
        let start = Instant::now();
        let result = self.backend.generate_content(&request).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(text) => debug!(
                operation,
                model = self.backend.model_name(),
                cooldown_ms = waited.as_millis() as u64,
                duration_ms,
                blobs = request.blob_count(),
                response_len = text.len(),
                "Model call finished"
            ),
            Err(e) => warn!(
                operation,
                model = self.backend.model_name(),
                duration_ms,
                error = %e,
                "Model call failed"
            ),
        }

        let text = result?;
        if text.trim().is_empty() {
            return Err(Error::EmptyResult(format!("{operation}: blank response")));
        }
        Ok(text)
    }

    async fn single_shot(
        &self,
        operation: &'static str,
        bytes: Vec<u8>,
        mime_type: &str,
        prompt: &str,
    ) -> Result<String> {
        if bytes.is_empty() {
            return Err(Error::FileUnavailable(format!("{operation}: no file content")));
        }
        let request = GenerateRequest::new(vec![
            ContentPart::blob(mime_type, bytes),
            ContentPart::text(prompt),
        ]);
        Ok(self.call(operation, request).await?.trim().to_string())
    }

    /// Short factual description of an attachment.
    pub async fn summarize_document(
        &self,
        bytes: Vec<u8>,
        kind: FileKind,
        mime_type: &str,
    ) -> Result<String> {
        self.single_shot("summarize", bytes, mime_type, prompts::summary_prompt(kind))
            .await
    }

    /// A 5-7 word web search query describing an image.
    pub async fn search_query_for_image(&self, bytes: Vec<u8>, mime_type: &str) -> Result<String> {
        let query = self
            .single_shot(
                "image_search_query",
                bytes,
                mime_type,
                prompts::IMAGE_SEARCH_QUERY_PROMPT,
            )
            .await?;
        Ok(query.trim_matches('"').trim().to_string())
    }

    /// Verbatim transcription of an audio recording.
    pub async fn transcribe_audio(&self, bytes: Vec<u8>, mime_type: &str) -> Result<String> {
        self.single_shot("transcribe", bytes, mime_type, prompts::TRANSCRIPTION_PROMPT)
            .await
    }

    fn structured_request(prompt: &str, context_parts: Vec<ContentPart>) -> GenerateRequest {
        let mut parts = context_parts;
        parts.push(ContentPart::text(prompt));
        GenerateRequest::new(parts).json()
    }

    /// Need-files decision. The result is not yet normalized against the
    /// attachment count.
    pub async fn decide(
        &self,
        prompt: &str,
        context_parts: Vec<ContentPart>,
    ) -> Result<DecisionResult> {
        let raw = self
            .call("decide", Self::structured_request(prompt, context_parts))
            .await?;
        parse_model_json(&raw)
    }

    /// Tool-use vs. direct-answer decision.
    pub async fn plan_tool_use(
        &self,
        prompt: &str,
        context_parts: Vec<ContentPart>,
    ) -> Result<ToolDecision> {
        let raw = self
            .call("plan_tool_use", Self::structured_request(prompt, context_parts))
            .await?;
        let decision: RawToolDecision = parse_model_json(&raw)?;
        Ok(decision.into())
    }

    /// Final structured answer. `search_results` is appended after the
    /// prompt as its own text part.
    pub async fn generate(
        &self,
        prompt: &str,
        context_parts: Vec<ContentPart>,
        search_results: Option<&str>,
    ) -> Result<GenerationResult> {
        let mut request = Self::structured_request(prompt, context_parts);
        if let Some(block) = search_results.filter(|b| !b.trim().is_empty()) {
            request.parts.push(ContentPart::text(block));
        }
        let raw = self.call("generate", request).await?;
        parse_model_json(&raw)
    }

    /// Web search through the configured provider. Not gated by the
    /// model cooldown.
    pub async fn search_web(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let provider = self
            .search
            .as_ref()
            .ok_or_else(|| Error::Config("web search is not configured".to_string()))?;
        let limit = if limit == 0 {
            defaults::SEARCH_MAX_RESULTS
        } else {
            limit
        };
        let start = Instant::now();
        let hits = provider.search(query, limit).await?;
        debug!(
            provider = provider.name(),
            results = hits.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Web search finished"
        );
        Ok(hits)
    }
}
