//! Mock generation and search backends for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use marginalia_inference::mock::MockGenerationBackend;
//!
//! let backend = MockGenerationBackend::new().with_default_response("A short summary.");
//! backend.push_response(r#"{"need_files": false, "file_numbers": [], "reason": "none"}"#);
//! backend.push_failure("quota exhausted");
//! ```
//!
//! Replies are chosen in this order: the next scripted reply, then the first
//! mapping whose key occurs in the request text, then the default response.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use marginalia_core::{Error, Result};

use crate::backend::{GenerateRequest, GenerationBackend};
use crate::search::{SearchHit, SearchProvider};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
enum MockReply {
    Text(String),
    Failure(String),
}

#[derive(Debug, Clone)]
struct MockConfig {
    model_name: String,
    default_response: String,
    mappings: Vec<(String, String)>,
    latency: Duration,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            model_name: "mock-model".to_string(),
            default_response: "Mock response".to_string(),
            mappings: Vec::new(),
            latency: Duration::ZERO,
        }
    }
}

/// A recorded call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub request: GenerateRequest,
    pub timestamp: Instant,
}

/// Scripted [`GenerationBackend`].
#[derive(Clone, Default)]
pub struct MockGenerationBackend {
    config: Arc<MockConfig>,
    script: Arc<Mutex<VecDeque<MockReply>>>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
    hold: Option<Arc<Semaphore>>,
}

impl MockGenerationBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).model_name = name.into();
        self
    }

    /// Reply used when nothing is scripted or mapped.
    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).default_response = response.into();
        self
    }

    /// Reply with `output` whenever the request text contains `needle`.
    pub fn with_response_mapping(
        mut self,
        needle: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Arc::make_mut(&mut self.config)
            .mappings
            .push((needle.into(), output.into()));
        self
    }

    /// Simulated latency per call, on the tokio clock.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        Arc::make_mut(&mut self.config).latency = latency;
        self
    }

    /// Hold every call in flight until a permit is added to `gate`.
    ///
    /// The call is logged before it blocks, so tests can observe that it
    /// started.
    pub fn with_hold(mut self, gate: Arc<Semaphore>) -> Self {
        self.hold = Some(gate);
        self
    }

    /// Queue a successful reply.
    pub fn push_response(&self, response: impl Into<String>) {
        lock(&self.script).push_back(MockReply::Text(response.into()));
    }

    /// Queue a service failure.
    pub fn push_failure(&self, message: impl Into<String>) {
        lock(&self.script).push_back(MockReply::Failure(message.into()));
    }

    /// Requests received so far, in call order.
    pub fn calls(&self) -> Vec<GenerateRequest> {
        lock(&self.call_log)
            .iter()
            .map(|c| c.request.clone())
            .collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        lock(&self.call_log).iter().map(|c| c.timestamp).collect()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.call_log).len()
    }

    pub fn clear_calls(&self) {
        lock(&self.call_log).clear()
    }

    fn next_reply(&self, request: &GenerateRequest) -> MockReply {
        if let Some(reply) = lock(&self.script).pop_front() {
            return reply;
        }
        let text = request.text();
        self.config
            .mappings
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, output)| MockReply::Text(output.clone()))
            .unwrap_or_else(|| MockReply::Text(self.config.default_response.clone()))
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate_content(&self, request: &GenerateRequest) -> Result<String> {
        lock(&self.call_log).push(MockCall {
            request: request.clone(),
            timestamp: Instant::now(),
        });

        if let Some(gate) = &self.hold {
            gate.acquire()
                .await
                .map_err(|_| Error::Service("mock hold gate closed".to_string()))?
                .forget();
        }
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        match self.next_reply(request) {
            MockReply::Text(text) => Ok(text),
            MockReply::Failure(message) => Err(Error::Service(message)),
        }
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}

/// Canned [`SearchProvider`].
#[derive(Clone, Default)]
pub struct MockSearchProvider {
    hits: Vec<SearchHit>,
    failure: Option<String>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hit(
        mut self,
        url: impl Into<String>,
        title: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        self.hits.push(SearchHit {
            url: url.into(),
            title: title.into(),
            snippet: snippet.into(),
        });
        self
    }

    /// Fail every search with a service error.
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Queries received so far.
    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        lock(&self.queries).push(query.to_string());
        if let Some(message) = &self.failure {
            return Err(Error::Service(message.clone()));
        }
        Ok(self.hits.iter().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marginalia_core::ContentPart;

    fn request(text: &str) -> GenerateRequest {
        GenerateRequest::new(vec![ContentPart::text(text)])
    }

    #[tokio::test]
    async fn test_script_then_mapping_then_default() {
        let mock = MockGenerationBackend::new()
            .with_default_response("default")
            .with_response_mapping("invoice", "mapped");
        mock.push_response("scripted");

        assert_eq!(mock.generate_content(&request("invoice")).await.unwrap(), "scripted");
        assert_eq!(mock.generate_content(&request("invoice")).await.unwrap(), "mapped");
        assert_eq!(mock.generate_content(&request("other")).await.unwrap(), "default");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let mock = MockGenerationBackend::new();
        mock.push_failure("boom");
        let err = mock.generate_content(&request("x")).await.unwrap_err();
        assert!(matches!(err, Error::Service(msg) if msg == "boom"));
    }

    #[tokio::test]
    async fn test_hold_blocks_until_released() {
        let gate = Arc::new(Semaphore::new(0));
        let mock = MockGenerationBackend::new().with_hold(gate.clone());

        let task = {
            let mock = mock.clone();
            tokio::spawn(async move { mock.generate_content(&request("x")).await })
        };
        while mock.call_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!task.is_finished());

        gate.add_permits(1);
        assert_eq!(task.await.unwrap().unwrap(), "Mock response");
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_uses_tokio_clock() {
        let mock = MockGenerationBackend::new().with_latency(Duration::from_secs(30));
        let start = Instant::now();
        mock.generate_content(&request("x")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_mock_search() {
        let search = MockSearchProvider::new()
            .with_hit("https://a", "A", "")
            .with_hit("https://b", "B", "");
        assert_eq!(search.search("q", 1).await.unwrap().len(), 1);

        let failing = MockSearchProvider::new().with_failure("down");
        assert!(failing.search("q", 5).await.is_err());
        assert_eq!(failing.queries(), vec!["q".to_string()]);
    }
}
