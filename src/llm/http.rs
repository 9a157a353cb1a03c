//! HTTP model backend
//!
//! `openai`, `local` and `custom` models are called through the
//! OpenAI-compatible `/chat/completions` endpoint; `anthropic` models through
//! `/v1/messages`. Endpoints and keys come from [`ProviderSettings`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::{BackendError, BackendResult, Completion, CompletionRequest, ModelBackend, TokenUsage};
use crate::models::ModelProvider;
use crate::settings::ProviderSettings;
use crate::{MachineError, Result};

const DEFAULT_ANTHROPIC_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: MessagesUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Provider HTTP APIs
pub struct HttpBackend {
    client: Client,
    providers: ProviderSettings,
}

impl HttpBackend {
    pub fn new(providers: ProviderSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(providers.request_timeout_secs))
            .build()
            .map_err(|e| MachineError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self { client, providers })
    }

    fn headers(&self, provider: ModelProvider) -> BackendResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let key = self.providers.api_key_for(provider);
        match provider {
            ModelProvider::Anthropic => {
                let key = key.ok_or_else(|| {
                    BackendError::AuthenticationFailed("no Anthropic API key configured".into())
                })?;
                headers.insert("x-api-key", header_value(&key)?);
                headers.insert(
                    "anthropic-version",
                    header_value(&self.providers.anthropic_version)?,
                );
            }
            ModelProvider::OpenAI => {
                let key = key.ok_or_else(|| {
                    BackendError::AuthenticationFailed("no OpenAI API key configured".into())
                })?;
                headers.insert("Authorization", header_value(&format!("Bearer {}", key))?);
            }
            ModelProvider::Local | ModelProvider::Custom => {
                if let Some(key) = key {
                    headers.insert("Authorization", header_value(&format!("Bearer {}", key))?);
                }
            }
        }
        Ok(headers)
    }

    fn base_url(&self, provider: ModelProvider) -> BackendResult<String> {
        self.providers
            .base_url_for(provider)
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                BackendError::InvalidRequest(format!("no base URL configured for {}", provider))
            })
    }

    async fn chat_completions(&self, request: &CompletionRequest) -> BackendResult<Completion> {
        let provider = request.model.provider;
        let url = format!("{}/chat/completions", self.base_url(provider)?);
        let body = ChatCompletionRequest {
            model: &request.model.provider_model_id,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature(),
            max_tokens: request.max_tokens(),
            stream: false,
        };

        debug!(url = %url, model = %request.model.provider_model_id, "Chat completion request");

        let response = self
            .client
            .post(&url)
            .headers(self.headers(provider)?)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = status.as_u16(), "Provider returned an error");
            return Err(error_from_status(status.as_u16(), &text));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Serialization(e.to_string()))?;
        completion_from_chat(parsed, &request.prompt)
    }

    async fn messages(&self, request: &CompletionRequest) -> BackendResult<Completion> {
        let url = format!("{}/v1/messages", self.base_url(ModelProvider::Anthropic)?);
        let body = MessagesRequest {
            model: &request.model.provider_model_id,
            max_tokens: request.max_tokens().unwrap_or(DEFAULT_ANTHROPIC_MAX_TOKENS),
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature(),
        };

        debug!(url = %url, model = %request.model.provider_model_id, "Messages request");

        let response = self
            .client
            .post(&url)
            .headers(self.headers(ModelProvider::Anthropic)?)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = status.as_u16(), "Provider returned an error");
            return Err(error_from_status(status.as_u16(), &text));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Serialization(e.to_string()))?;
        Ok(completion_from_messages(parsed))
    }
}

#[async_trait]
impl ModelBackend for HttpBackend {
    async fn complete(&self, request: &CompletionRequest) -> BackendResult<Completion> {
        match request.model.provider {
            ModelProvider::Anthropic => self.messages(request).await,
            ModelProvider::OpenAI | ModelProvider::Local | ModelProvider::Custom => {
                self.chat_completions(request).await
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn header_value(value: &str) -> BackendResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| BackendError::Internal(format!("Invalid header value: {}", e)))
}

fn map_transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(err.to_string())
    } else {
        BackendError::Network(err.to_string())
    }
}

fn error_from_status(status: u16, body: &str) -> BackendError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());
    match status {
        401 | 403 => BackendError::AuthenticationFailed(message),
        429 => BackendError::RateLimitExceeded(message),
        400 | 404 | 422 => BackendError::InvalidRequest(message),
        408 | 504 => BackendError::Timeout(message),
        500..=599 => BackendError::Unavailable(format!("HTTP {}: {}", status, message)),
        _ => BackendError::Internal(format!("HTTP {}: {}", status, message)),
    }
}

fn completion_from_chat(response: ChatCompletionResponse, prompt: &str) -> BackendResult<Completion> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| BackendError::Serialization("response has no choices".into()))?;

    // Some OpenAI-compatible servers omit usage
    let usage = match response.usage {
        Some(u) => TokenUsage::new(u.prompt_tokens, u.completion_tokens),
        None => TokenUsage::new(
            super::cost::estimate_tokens(prompt),
            super::cost::estimate_tokens(&text),
        ),
    };
    Ok(Completion { text, usage })
}

fn completion_from_messages(response: MessagesResponse) -> Completion {
    let text = response
        .content
        .into_iter()
        .filter(|b| b.block_type == "text")
        .filter_map(|b| b.text)
        .collect::<Vec<_>>()
        .join("");
    Completion {
        text,
        usage: TokenUsage::new(response.usage.input_tokens, response.usage.output_tokens),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_mapping() {
        let body = r#"{"error": {"message": "Incorrect API key", "type": "invalid_request_error"}}"#;
        assert!(matches!(
            error_from_status(401, body),
            BackendError::AuthenticationFailed(ref m) if m == "Incorrect API key"
        ));
        assert!(matches!(error_from_status(429, "busy"), BackendError::RateLimitExceeded(_)));
        assert!(matches!(error_from_status(503, "down"), BackendError::Unavailable(_)));
        assert!(matches!(error_from_status(400, "bad"), BackendError::InvalidRequest(_)));
    }

    #[test]
    fn test_chat_response_parsing() {
        let response: ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "done"}}],
            "usage": {"prompt_tokens": 100, "completion_tokens": 200, "total_tokens": 300}
        }))
        .unwrap();
        let completion = completion_from_chat(response, "prompt").unwrap();
        assert_eq!(completion.text, "done");
        assert_eq!(completion.usage, TokenUsage::new(100, 200));

        let empty: ChatCompletionResponse =
            serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(completion_from_chat(empty, "prompt").is_err());
    }

    #[test]
    fn test_messages_response_parsing() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Hello "},
                {"type": "tool_use", "id": "t1"},
                {"type": "text", "text": "world"}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 3}
        }))
        .unwrap();
        let completion = completion_from_messages(response);
        assert_eq!(completion.text, "Hello world");
        assert_eq!(completion.usage, TokenUsage::new(12, 3));
    }

    #[test]
    fn test_missing_keys_fail_before_any_request() {
        let mut providers = ProviderSettings::default();
        providers.anthropic_api_key = None;
        let backend = HttpBackend::new(providers).unwrap();
        assert!(backend.headers(ModelProvider::Local).is_ok());
        assert!(backend.base_url(ModelProvider::Custom).is_err());
    }
}
