//! Provider-neutral generation request and backend trait.

use async_trait::async_trait;

use marginalia_core::{ContentPart, Result};

/// Expected shape of the model's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Ask the provider for `application/json` output.
    Json,
}

/// A single multimodal generation request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenerateRequest {
    pub parts: Vec<ContentPart>,
    pub response_format: ResponseFormat,
}

impl GenerateRequest {
    pub fn new(parts: Vec<ContentPart>) -> Self {
        Self {
            parts,
            response_format: ResponseFormat::Text,
        }
    }

    pub fn json(mut self) -> Self {
        self.response_format = ResponseFormat::Json;
        self
    }

    /// Concatenated text parts, used for logging and mock matching.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) => Some(t.as_str()),
                ContentPart::Blob { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn blob_count(&self) -> usize {
        self.parts.iter().filter(|p| p.is_blob()).count()
    }
}

/// Backend for multimodal text generation.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Send the request and return the raw text of the first candidate.
    async fn generate_content(&self, request: &GenerateRequest) -> Result<String>;

    /// Get the model name.
    fn model_name(&self) -> &str;
}
