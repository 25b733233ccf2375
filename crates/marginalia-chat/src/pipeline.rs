//! The decide-then-generate chat pipeline.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use marginalia_core::{
    defaults, AttachmentSummary, AttachmentSummaryReader, ChatHistoryReader, ChatTurn,
    ConfirmationMode, DecisionResult, Error, FileStore, GenerationResult, Result,
};
use marginalia_inference::repair::format_latex_markup;
use marginalia_inference::{ModelClient, ToolDecision};

use crate::context::{
    load_files, search_error_block, search_results_block, select_files,
    SEARCH_QUERY_MISSING_BLOCK,
};
use crate::prompts::{self, GenerateContext};

/// Prefix added when a search happened but the reply does not say so.
pub const SEARCH_MENTION_PREFIX: &str = "I searched for information. ";

/// Configuration for the chat pipeline.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Most recent turns loaded by [`ChatPipeline::chat`].
    pub history_limit: usize,
    /// Web search results folded into the prompt.
    pub search_max_results: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: defaults::CHAT_HISTORY_LIMIT,
            search_max_results: defaults::SEARCH_MAX_RESULTS,
        }
    }
}

impl ChatConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CHAT_HISTORY_LIMIT` | `100` | Turns of history sent to the model |
    /// | `SEARCH_MAX_RESULTS` | `5` | Web results per search |
    pub fn from_env() -> Self {
        let history_limit = std::env::var(defaults::ENV_CHAT_HISTORY_LIMIT)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::CHAT_HISTORY_LIMIT);
        let search_max_results = std::env::var(defaults::ENV_SEARCH_MAX_RESULTS)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults::SEARCH_MAX_RESULTS);
        Self {
            history_limit,
            search_max_results,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_search_max_results(mut self, max: usize) -> Self {
        self.search_max_results = max.max(1);
        self
    }
}

/// A user message about a note.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub note_id: Uuid,
    pub message: String,
    /// Current note content, returned unchanged on failure.
    pub note_html: String,
    pub selected_text: Option<String>,
    pub confirmation_mode: ConfirmationMode,
    /// Let the model decide whether to search the web first.
    pub web_search: bool,
}

impl ChatRequest {
    pub fn new(note_id: Uuid, message: impl Into<String>, note_html: impl Into<String>) -> Self {
        Self {
            note_id,
            message: message.into(),
            note_html: note_html.into(),
            ..Self::default()
        }
    }

    pub fn with_selected_text(mut self, text: impl Into<String>) -> Self {
        self.selected_text = Some(text.into());
        self
    }

    pub fn with_confirmation_mode(mut self, mode: ConfirmationMode) -> Self {
        self.confirmation_mode = mode;
        self
    }

    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.message.trim().is_empty() {
            return Err(Error::InvalidInput("message must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Both phases of a combined [`ChatPipeline::chat`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatOutcome {
    pub decision: DecisionResult,
    pub result: GenerationResult,
}

/// Two-phase chat over a note and its attachments.
///
/// Model and repair failures never escape: the decide phase degrades to "no
/// files" and the respond phase to an apology that leaves the note as it
/// was. Only an empty message is an error.
pub struct ChatPipeline {
    model: ModelClient,
    attachments: Arc<dyn AttachmentSummaryReader>,
    history: Arc<dyn ChatHistoryReader>,
    files: Arc<dyn FileStore>,
    config: ChatConfig,
    capabilities: String,
}

impl ChatPipeline {
    pub fn new(
        model: ModelClient,
        attachments: Arc<dyn AttachmentSummaryReader>,
        history: Arc<dyn ChatHistoryReader>,
        files: Arc<dyn FileStore>,
        config: ChatConfig,
    ) -> Self {
        Self {
            model,
            attachments,
            history,
            files,
            config,
            capabilities: prompts::BASE_CAPABILITIES.to_string(),
        }
    }

    /// Replace the styling and content rules given to the model.
    pub fn with_capabilities(mut self, capabilities: impl Into<String>) -> Self {
        self.capabilities = capabilities.into();
        self
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Phase 1: does answering need the full content of any attachment?
    ///
    /// With no attachments the model is not called.
    #[instrument(skip_all, fields(attachments = attachments.len()))]
    pub async fn decide(
        &self,
        message: &str,
        note_html: &str,
        selected_text: Option<&str>,
        attachments: &[AttachmentSummary],
    ) -> Result<DecisionResult> {
        if message.trim().is_empty() {
            return Err(Error::InvalidInput("message must not be empty".to_string()));
        }
        if attachments.is_empty() {
            return Ok(DecisionResult::no_files("No attachments on this note"));
        }

        let prompt = prompts::decide_prompt(message, note_html, selected_text, attachments);
        match self.model.decide(&prompt, Vec::new()).await {
            Ok(decision) => {
                let decision = decision.normalized(attachments.len());
                info!(
                    need_files = decision.need_files,
                    file_numbers = ?decision.file_numbers,
                    "File decision made"
                );
                Ok(decision)
            }
            Err(e) => {
                warn!(error = %e, "File decision failed");
                Ok(DecisionResult::no_files(format!("Decision unavailable: {e}")))
            }
        }
    }

    /// Phase 2: produce the reply and the edited note.
    ///
    /// `file_numbers` are 1-based indices into the note's attachment list;
    /// `history` is oldest first.
    #[instrument(skip_all, fields(note_id = %request.note_id, files = file_numbers.len()))]
    pub async fn respond(
        &self,
        request: &ChatRequest,
        history: &[ChatTurn],
        file_numbers: &[usize],
    ) -> Result<GenerationResult> {
        request.validate()?;

        let selected = if file_numbers.is_empty() {
            Vec::new()
        } else {
            let attachments = self
                .attachments
                .list_attachment_summaries(request.note_id)
                .await?;
            select_files(&attachments, file_numbers)
        };
        let loaded = load_files(self.files.as_ref(), &selected).await;

        match self
            .generate(request, history, loaded.parts, &loaded.analyzed)
            .await
        {
            Ok(mut result) => {
                result.analyzed_files = loaded.analyzed;
                Ok(result)
            }
            Err(e) => {
                warn!(error = %e, "Response generation failed");
                Ok(GenerationResult::fallback(&e, &request.note_html))
            }
        }
    }

    async fn generate(
        &self,
        request: &ChatRequest,
        history: &[ChatTurn],
        parts: Vec<marginalia_core::ContentPart>,
        file_names: &[String],
    ) -> Result<GenerationResult> {
        let search_block = if request.web_search {
            self.search_block(request, parts.clone(), file_names).await?
        } else {
            None
        };
        let searched = search_block.is_some();

        let prompt = prompts::generate_prompt(&GenerateContext {
            message: &request.message,
            note_html: &request.note_html,
            selected_text: request.selected_text.as_deref(),
            history,
            file_names,
            confirmation_mode: request.confirmation_mode,
            searched,
            capabilities: &self.capabilities,
        });

        let mut result = self
            .model
            .generate(&prompt, parts, search_block.as_deref())
            .await?;

        result.updated_html = format_latex_markup(&result.updated_html);
        if let Some(changes) = result.changes.as_mut() {
            for change in changes.iter_mut() {
                change.replace = format_latex_markup(&change.replace);
            }
        }
        if searched
            && !result
                .response_text
                .to_lowercase()
                .contains("searched for")
        {
            result.response_text = format!("{SEARCH_MENTION_PREFIX}{}", result.response_text);
        }
        Ok(result)
    }

    /// Run the tool decision and, if asked, the web search.
    ///
    /// `Ok(None)` means no search took place. A failed search still yields a
    /// block describing the failure.
    async fn search_block(
        &self,
        request: &ChatRequest,
        parts: Vec<marginalia_core::ContentPart>,
        file_names: &[String],
    ) -> Result<Option<String>> {
        if !self.model.has_search() {
            debug!("Web search requested but no provider is configured");
            return Ok(None);
        }

        let prompt = prompts::tool_prompt(
            &request.message,
            &request.note_html,
            request.selected_text.as_deref(),
            file_names,
        );
        let block = match self.model.plan_tool_use(&prompt, parts).await? {
            ToolDecision::Respond => return Ok(None),
            ToolDecision::Search { query: None } => {
                warn!("Model asked for a search without a query");
                SEARCH_QUERY_MISSING_BLOCK.to_string()
            }
            ToolDecision::Search { query: Some(query) } => {
                info!(query = %query, "Searching the web");
                match self
                    .model
                    .search_web(&query, self.config.search_max_results)
                    .await
                {
                    Ok(hits) => search_results_block(&hits),
                    Err(e) => {
                        warn!(error = %e, "Web search failed");
                        search_error_block(&e)
                    }
                }
            }
        };
        Ok(Some(block))
    }

    /// Decide, then respond with the decided files and the stored history.
    #[instrument(skip_all, fields(note_id = %request.note_id))]
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatOutcome> {
        request.validate()?;

        let attachments = self
            .attachments
            .list_attachment_summaries(request.note_id)
            .await?;
        let decision = self
            .decide(
                &request.message,
                &request.note_html,
                request.selected_text.as_deref(),
                &attachments,
            )
            .await?;

        let history = self
            .history
            .recent_turns(request.note_id, self.config.history_limit)
            .await?;
        let file_numbers: &[usize] = if decision.need_files {
            &decision.file_numbers
        } else {
            &[]
        };
        let result = self.respond(request, &history, file_numbers).await?;

        Ok(ChatOutcome { decision, result })
    }
}
