//! Model catalog entries
//!
//! A `Model` is a reference to an inference backend with declared capabilities,
//! a context limit and per-token rates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{validate_text, Parameters};
use crate::{MachineError, Result};

/// Unique identifier for a registered model
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ModelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who hosts the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    #[serde(rename = "openai")]
    OpenAI,
    Anthropic,
    Local,
    Custom,
}

impl ModelProvider {
    /// First-party hosted providers
    pub fn is_hosted(&self) -> bool {
        matches!(self, ModelProvider::OpenAI | ModelProvider::Anthropic)
    }
}

impl fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelProvider::OpenAI => "openai",
            ModelProvider::Anthropic => "anthropic",
            ModelProvider::Local => "local",
            ModelProvider::Custom => "custom",
        };
        f.write_str(name)
    }
}

impl FromStr for ModelProvider {
    type Err = MachineError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "openai" => Ok(ModelProvider::OpenAI),
            "anthropic" => Ok(ModelProvider::Anthropic),
            "local" => Ok(ModelProvider::Local),
            "custom" => Ok(ModelProvider::Custom),
            other => Err(MachineError::validation(format!(
                "unknown model provider '{}'",
                other
            ))),
        }
    }
}

/// Model capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelCapability {
    Text,
    Code,
    Reasoning,
    Planning,
    Vision,
    Audio,
}

impl ModelCapability {
    pub const ALL: [ModelCapability; 6] = [
        ModelCapability::Text,
        ModelCapability::Code,
        ModelCapability::Reasoning,
        ModelCapability::Planning,
        ModelCapability::Vision,
        ModelCapability::Audio,
    ];
}

impl fmt::Display for ModelCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelCapability::Text => "text",
            ModelCapability::Code => "code",
            ModelCapability::Reasoning => "reasoning",
            ModelCapability::Planning => "planning",
            ModelCapability::Vision => "vision",
            ModelCapability::Audio => "audio",
        };
        f.write_str(name)
    }
}

impl FromStr for ModelCapability {
    type Err = MachineError;

    fn from_str(value: &str) -> Result<Self> {
        ModelCapability::ALL
            .iter()
            .copied()
            .find(|c| c.to_string() == value)
            .ok_or_else(|| MachineError::validation(format!("unknown model capability '{}'", value)))
    }
}

/// A registered model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: ModelId,
    pub name: String,
    pub provider: ModelProvider,
    /// Identifier the provider knows the model by
    #[serde(rename = "model_id")]
    pub provider_model_id: String,
    pub capabilities: Vec<ModelCapability>,
    pub context_window: u32,
    pub cost_per_prompt_token: f64,
    pub cost_per_completion_token: f64,
    pub max_tokens: Option<u32>,
    pub description: Option<String>,
    pub metadata: Parameters,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn from_create(id: ModelId, create: ModelCreate) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: create.name,
            provider: create.provider,
            provider_model_id: create.provider_model_id,
            capabilities: create.capabilities,
            context_window: create.context_window,
            cost_per_prompt_token: create.cost_per_prompt_token,
            cost_per_completion_token: create.cost_per_completion_token,
            max_tokens: create.max_tokens,
            description: create.description,
            metadata: create.metadata.unwrap_or_default(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn missing_capabilities(&self, required: &[ModelCapability]) -> Vec<ModelCapability> {
        required
            .iter()
            .filter(|c| !self.capabilities.contains(c))
            .copied()
            .collect()
    }

    pub fn has_capabilities(&self, required: &[ModelCapability]) -> bool {
        self.missing_capabilities(required).is_empty()
    }

    /// Average of the prompt and completion rates
    pub fn blended_cost_per_token(&self) -> f64 {
        (self.cost_per_prompt_token + self.cost_per_completion_token) / 2.0
    }

    pub fn fits_context(&self, context_size: u32) -> bool {
        context_size <= self.context_window
    }

    /// Number of distinct declared capabilities
    pub fn capability_breadth(&self) -> usize {
        let mut caps = self.capabilities.clone();
        caps.sort();
        caps.dedup();
        caps.len()
    }
}

fn validate_rate(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(MachineError::validation(format!(
            "{} must be a non-negative number",
            field
        )));
    }
    Ok(())
}

fn validate_context_window(value: u32) -> Result<()> {
    if value == 0 {
        return Err(MachineError::validation(
            "context_window must be greater than zero",
        ));
    }
    Ok(())
}

fn validate_max_tokens(value: Option<u32>) -> Result<()> {
    if value == Some(0) {
        return Err(MachineError::validation(
            "max_tokens must be greater than zero",
        ));
    }
    Ok(())
}

/// Registration payload for a new model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCreate {
    pub name: String,
    pub provider: ModelProvider,
    #[serde(rename = "model_id")]
    pub provider_model_id: String,
    pub capabilities: Vec<ModelCapability>,
    pub context_window: u32,
    pub cost_per_prompt_token: f64,
    pub cost_per_completion_token: f64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<Parameters>,
}

impl ModelCreate {
    pub fn validate(&self) -> Result<()> {
        validate_text("name", &self.name, Some(100))?;
        validate_text("model_id", &self.provider_model_id, None)?;
        validate_context_window(self.context_window)?;
        validate_rate("cost_per_prompt_token", self.cost_per_prompt_token)?;
        validate_rate("cost_per_completion_token", self.cost_per_completion_token)?;
        validate_max_tokens(self.max_tokens)?;
        Ok(())
    }
}

/// Partial update for a model; `None` fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Vec<ModelCapability>>,
    #[serde(default)]
    pub context_window: Option<u32>,
    #[serde(default)]
    pub cost_per_prompt_token: Option<f64>,
    #[serde(default)]
    pub cost_per_completion_token: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<Parameters>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl ModelUpdate {
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_text("name", name, Some(100))?;
        }
        if let Some(window) = self.context_window {
            validate_context_window(window)?;
        }
        if let Some(rate) = self.cost_per_prompt_token {
            validate_rate("cost_per_prompt_token", rate)?;
        }
        if let Some(rate) = self.cost_per_completion_token {
            validate_rate("cost_per_completion_token", rate)?;
        }
        validate_max_tokens(self.max_tokens)?;
        Ok(())
    }

    pub fn apply(&self, model: &mut Model) {
        if let Some(name) = &self.name {
            model.name = name.clone();
        }
        if let Some(capabilities) = &self.capabilities {
            model.capabilities = capabilities.clone();
        }
        if let Some(window) = self.context_window {
            model.context_window = window;
        }
        if let Some(rate) = self.cost_per_prompt_token {
            model.cost_per_prompt_token = rate;
        }
        if let Some(rate) = self.cost_per_completion_token {
            model.cost_per_completion_token = rate;
        }
        if let Some(max_tokens) = self.max_tokens {
            model.max_tokens = Some(max_tokens);
        }
        if let Some(description) = &self.description {
            model.description = Some(description.clone());
        }
        if let Some(metadata) = &self.metadata {
            model.metadata = metadata.clone();
        }
        if let Some(is_active) = self.is_active {
            model.is_active = is_active;
        }
        model.updated_at = Utc::now();
    }
}
