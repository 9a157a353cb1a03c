use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::llm_model::{ModelCapability, ModelId};
use super::{validate_text, Parameters};
use crate::{MachineError, Result};

/// Unique identifier for an AI agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
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

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of work an agent (or a standalone task) performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Code,
    Design,
    Test,
    Security,
    Analysis,
    Custom,
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentType::Code => "code",
            AgentType::Design => "design",
            AgentType::Test => "test",
            AgentType::Security => "security",
            AgentType::Analysis => "analysis",
            AgentType::Custom => "custom",
        };
        f.write_str(name)
    }
}

impl FromStr for AgentType {
    type Err = MachineError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "code" => Ok(AgentType::Code),
            "design" => Ok(AgentType::Design),
            "test" => Ok(AgentType::Test),
            "security" => Ok(AgentType::Security),
            "analysis" => Ok(AgentType::Analysis),
            "custom" => Ok(AgentType::Custom),
            other => Err(MachineError::validation(format!(
                "unknown agent type '{}'",
                other
            ))),
        }
    }
}

/// Skills an agent declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCapability {
    CodeGeneration,
    CodeReview,
    DesignCreation,
    TestGeneration,
    SecurityAnalysis,
    DataAnalysis,
    Documentation,
}

impl AgentCapability {
    /// Model capability a model must offer to serve this agent capability
    pub fn required_model_capability(&self) -> ModelCapability {
        match self {
            AgentCapability::CodeGeneration
            | AgentCapability::CodeReview
            | AgentCapability::TestGeneration => ModelCapability::Code,
            AgentCapability::SecurityAnalysis | AgentCapability::DataAnalysis => {
                ModelCapability::Reasoning
            }
            AgentCapability::DesignCreation | AgentCapability::Documentation => {
                ModelCapability::Text
            }
        }
    }
}

impl fmt::Display for AgentCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentCapability::CodeGeneration => "code_generation",
            AgentCapability::CodeReview => "code_review",
            AgentCapability::DesignCreation => "design_creation",
            AgentCapability::TestGeneration => "test_generation",
            AgentCapability::SecurityAnalysis => "security_analysis",
            AgentCapability::DataAnalysis => "data_analysis",
            AgentCapability::Documentation => "documentation",
        };
        f.write_str(name)
    }
}

impl FromStr for AgentCapability {
    type Err = MachineError;

    fn from_str(value: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(value.to_string()))
            .map_err(|_| MachineError::validation(format!("unknown agent capability '{}'", value)))
    }
}

/// Agent definition: a prompt template bound to a default model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub description: String,
    pub capabilities: Vec<AgentCapability>,
    pub default_model_id: ModelId,
    pub prompt_template: String,
    pub parameters: Parameters,
    pub metadata: Parameters,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn from_create(id: AgentId, create: AgentCreate) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: create.name,
            agent_type: create.agent_type,
            description: create.description,
            capabilities: create.capabilities,
            default_model_id: create.default_model_id,
            prompt_template: create.prompt_template,
            parameters: create.parameters.unwrap_or_default(),
            metadata: create.metadata.unwrap_or_default(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fill the prompt template
    ///
    /// `{{task}}` receives the task text; any other `{{key}}` receives the
    /// matching parameter. Unknown placeholders are left untouched.
    pub fn render_prompt(&self, task: &str, parameters: &Parameters) -> String {
        let mut prompt = self.prompt_template.replace("{{task}}", task);
        for (key, value) in parameters {
            let placeholder = format!("{{{{{}}}}}", key);
            if !prompt.contains(&placeholder) {
                continue;
            }
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            prompt = prompt.replace(&placeholder, &rendered);
        }
        prompt
    }

    /// Model capabilities implied by the agent's declared capabilities
    pub fn required_model_capabilities(&self) -> Vec<ModelCapability> {
        let mut required: Vec<ModelCapability> = self
            .capabilities
            .iter()
            .map(|c| c.required_model_capability())
            .collect();
        required.sort();
        required.dedup();
        required
    }
}

/// Registration payload for a new agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCreate {
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub description: String,
    pub capabilities: Vec<AgentCapability>,
    pub default_model_id: ModelId,
    pub prompt_template: String,
    #[serde(default)]
    pub parameters: Option<Parameters>,
    #[serde(default)]
    pub metadata: Option<Parameters>,
}

impl AgentCreate {
    pub fn validate(&self) -> Result<()> {
        validate_text("name", &self.name, Some(100))?;
        validate_text("description", &self.description, None)?;
        validate_text("default_model_id", self.default_model_id.as_str(), None)?;
        validate_text("prompt_template", &self.prompt_template, None)?;
        Ok(())
    }
}

/// Partial update for an agent; `None` fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Vec<AgentCapability>>,
    #[serde(default)]
    pub default_model_id: Option<ModelId>,
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub parameters: Option<Parameters>,
    #[serde(default)]
    pub metadata: Option<Parameters>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl AgentUpdate {
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_text("name", name, Some(100))?;
        }
        if let Some(description) = &self.description {
            validate_text("description", description, None)?;
        }
        if let Some(model_id) = &self.default_model_id {
            validate_text("default_model_id", model_id.as_str(), None)?;
        }
        if let Some(template) = &self.prompt_template {
            validate_text("prompt_template", template, None)?;
        }
        Ok(())
    }

    pub fn apply(&self, agent: &mut Agent) {
        if let Some(name) = &self.name {
            agent.name = name.clone();
        }
        if let Some(description) = &self.description {
            agent.description = description.clone();
        }
        if let Some(capabilities) = &self.capabilities {
            agent.capabilities = capabilities.clone();
        }
        if let Some(model_id) = &self.default_model_id {
            agent.default_model_id = model_id.clone();
        }
        if let Some(template) = &self.prompt_template {
            agent.prompt_template = template.clone();
        }
        if let Some(parameters) = &self.parameters {
            agent.parameters = parameters.clone();
        }
        if let Some(metadata) = &self.metadata {
            agent.metadata = metadata.clone();
        }
        if let Some(is_active) = self.is_active {
            agent.is_active = is_active;
        }
        agent.updated_at = Utc::now();
    }
}
