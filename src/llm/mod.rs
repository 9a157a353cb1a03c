//! Model invocation backends
//!
//! The engine never talks to a provider directly. It hands a resolved
//! [`Model`] and a rendered prompt to a [`ModelBackend`] and gets back text
//! plus token counts. Cost is computed from the model's rates in [`cost`].
//!
//! - [`SimulatedBackend`]: offline and deterministic, the default
//! - [`HttpBackend`]: OpenAI-compatible and Anthropic HTTP APIs via `reqwest`

pub mod cost;
pub mod http;
pub mod simulated;

pub use cost::{estimate_tokens, CostBreakdown, CostTracker};
pub use http::HttpBackend;
pub use simulated::SimulatedBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{Model, Parameters};
use crate::MachineError;

/// Token counts reported for one invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// What the executor asks a backend to run
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: Model,
    pub prompt: String,
    /// Merged agent/caller parameters; `temperature` and `max_tokens` are honoured
    pub parameters: Parameters,
}

impl CompletionRequest {
    pub fn new(model: Model, prompt: String, parameters: Parameters) -> Self {
        Self {
            model,
            prompt,
            parameters,
        }
    }

    /// Output cap: the `max_tokens` parameter, bounded by the model's own limit
    pub fn max_tokens(&self) -> Option<u32> {
        let requested = self
            .parameters
            .get("max_tokens")
            .and_then(|v| v.as_u64())
            .map(|v| v.min(u32::MAX as u64) as u32);
        match (requested, self.model.max_tokens) {
            (Some(r), Some(m)) => Some(r.min(m)),
            (Some(r), None) => Some(r),
            (None, m) => m,
        }
    }

    pub fn temperature(&self) -> Option<f64> {
        self.parameters.get("temperature").and_then(|v| v.as_f64())
    }
}

/// Backend answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// Failures of a model backend
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

impl From<BackendError> for MachineError {
    fn from(err: BackendError) -> Self {
        MachineError::UpstreamExecutionFailure(err.to_string())
    }
}

/// The collaborator that actually runs a prompt against a model
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> BackendResult<Completion>;

    /// Short name for logs
    fn name(&self) -> &str;
}
