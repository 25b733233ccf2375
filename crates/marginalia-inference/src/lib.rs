//! # marginalia-inference
//!
//! Model client adapter for the marginalia AI core.
//!
//! Every generative call goes through [`ModelClient`], which serializes calls
//! behind a shared [`CooldownGate`] so consecutive requests to the provider
//! are spaced by a minimum delay. The concrete provider sits behind the
//! [`GenerationBackend`] trait; [`GeminiBackend`] talks to the Gemini REST
//! API and [`MockGenerationBackend`] scripts responses for tests.
//!
//! Model output that is meant to be JSON is passed through [`repair`] before
//! parsing: code fences are stripped, invalid escapes and raw control
//! characters are fixed, and LaTeX delimiters in returned HTML are rewritten
//! into math markup.

pub mod backend;
pub mod client;
pub mod cooldown;
pub mod gemini;
pub mod prompts;
pub mod repair;
pub mod search;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use backend::{GenerateRequest, GenerationBackend, ResponseFormat};
pub use client::{ModelClient, ToolDecision};
pub use cooldown::CooldownGate;
pub use gemini::{GeminiBackend, GeminiConfig};
pub use search::{BraveSearchConfig, BraveSearchProvider, SearchHit, SearchProvider};

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockGenerationBackend, MockSearchProvider};
