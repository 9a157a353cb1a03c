use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

use super::cost::estimate_tokens;
use super::{BackendError, BackendResult, Completion, CompletionRequest, ModelBackend, TokenUsage};

#[derive(Debug, Clone)]
enum Mode {
    /// Token counts estimated from the prompt and response text
    Estimated,
    /// Every call reports the same usage
    Fixed(TokenUsage),
    /// Every call fails
    Failing(String),
}

/// Offline backend producing deterministic responses
///
/// Used by default so the platform runs without provider credentials, and by
/// tests that need exact token counts or upstream failures.
#[derive(Debug)]
pub struct SimulatedBackend {
    mode: Mode,
    latency: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::with_mode(Mode::Estimated)
    }

    pub fn with_usage(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self::with_mode(Mode::Fixed(TokenUsage::new(prompt_tokens, completion_tokens)))
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_mode(Mode::Failing(message.into()))
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            latency: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delay every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of calls received so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls that were in progress at the same moment
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelBackend for SimulatedBackend {
    async fn complete(&self, request: &CompletionRequest) -> BackendResult<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        let summary: String = request.prompt.chars().take(80).collect();
        let text = format!(
            "[{}] Simulated response to: {}",
            request.model.provider_model_id, summary
        );

        let usage = match &self.mode {
            Mode::Failing(message) => return Err(BackendError::Unavailable(message.clone())),
            Mode::Fixed(usage) => *usage,
            Mode::Estimated => {
                let completion = estimate_tokens(&text);
                let completion = request
                    .max_tokens()
                    .map_or(completion, |cap| completion.min(cap));
                TokenUsage::new(estimate_tokens(&request.prompt), completion)
            }
        };

        debug!(
            model = %request.model.id,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Simulated completion"
        );

        Ok(Completion { text, usage })
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Model, ModelCapability, ModelCreate, ModelId, ModelProvider, Parameters};

    fn request(prompt: &str) -> CompletionRequest {
        let model = Model::from_create(
            ModelId::from("local-llama"),
            ModelCreate {
                name: "Llama".to_string(),
                provider: ModelProvider::Local,
                provider_model_id: "llama3".to_string(),
                capabilities: vec![ModelCapability::Text],
                context_window: 8192,
                cost_per_prompt_token: 0.0,
                cost_per_completion_token: 0.0,
                max_tokens: None,
                description: None,
                metadata: None,
            },
        );
        CompletionRequest::new(model, prompt.to_string(), Parameters::new())
    }

    #[tokio::test]
    async fn test_fixed_usage() {
        let backend = SimulatedBackend::with_usage(100, 200);
        let completion = backend.complete(&request("Summarise this")).await.unwrap();
        assert_eq!(completion.usage, TokenUsage::new(100, 200));
        assert!(completion.text.starts_with("[llama3]"));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_estimated_usage_is_deterministic() {
        let backend = SimulatedBackend::new();
        let first = backend.complete(&request("abcdefgh")).await.unwrap();
        let second = backend.complete(&request("abcdefgh")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.usage.prompt_tokens, 2);
    }

    #[test]
    fn test_failing_backend() {
        let backend = SimulatedBackend::failing("provider down");
        let err = tokio_test::block_on(backend.complete(&request("x"))).unwrap_err();
        assert!(err.to_string().contains("provider down"));
    }
}
