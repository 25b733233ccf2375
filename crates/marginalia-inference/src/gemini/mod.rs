//! Gemini REST backend.
//!
//! Talks to `POST {base}/v1beta/models/{model}:generateContent` with the API
//! key in the `x-goog-api-key` header. File parts are sent inline as base64.

mod backend;
mod error;
mod types;

pub use backend::{GeminiBackend, GeminiConfig};
pub use error::{to_core_error, GeminiErrorCode};
pub use types::*;
