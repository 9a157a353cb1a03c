//! Development catalog
//!
//! Registers a small, realistic set of models and agents plus the "Code Review
//! Workflow" so a fresh platform has something to run. Identifiers are
//! generated by the registry; the returned [`SeedSummary`] carries them.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::models::{
    AgentCapability, AgentCreate, AgentId, AgentType, ModelCapability, ModelCreate, ModelId,
    ModelProvider, Parameters, StepType, WorkflowCreate, WorkflowStep, WorkflowType,
};
use crate::platform::Platform;
use crate::Result;

#[derive(Debug, Clone, Serialize)]
pub struct SeedSummary {
    pub models: Vec<ModelId>,
    pub agents: Vec<AgentId>,
    pub workflow_id: String,
}

fn params(value: Value) -> Parameters {
    match value {
        Value::Object(map) => map,
        _ => Parameters::new(),
    }
}

fn catalog_models() -> Vec<ModelCreate> {
    use ModelCapability::*;
    vec![
        ModelCreate {
            name: "GPT-4o".to_string(),
            provider: ModelProvider::OpenAI,
            provider_model_id: "gpt-4o".to_string(),
            capabilities: vec![Text, Code, Reasoning, Planning, Vision],
            context_window: 128000,
            cost_per_prompt_token: 0.00001,
            cost_per_completion_token: 0.00003,
            max_tokens: Some(4096),
            description: Some("OpenAI's GPT-4o model".to_string()),
            metadata: None,
        },
        ModelCreate {
            name: "GPT-4o Mini".to_string(),
            provider: ModelProvider::OpenAI,
            provider_model_id: "gpt-4o-mini".to_string(),
            capabilities: vec![Text, Code, Reasoning, Planning],
            context_window: 128000,
            cost_per_prompt_token: 0.000005,
            cost_per_completion_token: 0.000015,
            max_tokens: Some(4096),
            description: Some("OpenAI's GPT-4o Mini model".to_string()),
            metadata: None,
        },
        ModelCreate {
            name: "Claude 3 Opus".to_string(),
            provider: ModelProvider::Anthropic,
            provider_model_id: "claude-3-opus-20240229".to_string(),
            capabilities: vec![Text, Code, Reasoning, Planning, Vision],
            context_window: 200000,
            cost_per_prompt_token: 0.000015,
            cost_per_completion_token: 0.000075,
            max_tokens: Some(4096),
            description: Some("Anthropic's Claude 3 Opus model".to_string()),
            metadata: None,
        },
    ]
}

/// Register the development catalog on `platform`
pub async fn seed_catalog(platform: &Platform) -> Result<SeedSummary> {
    let mut models = Vec::new();
    let mut default_model = None;
    let mut mini_model = None;

    for create in catalog_models() {
        let provider_model_id = create.provider_model_id.clone();
        let model = platform.register_model(create).await?;
        if provider_model_id == platform.settings().default_model {
            default_model = Some(model.id.clone());
        }
        if provider_model_id == "gpt-4o-mini" {
            mini_model = Some(model.id.clone());
        }
        models.push(model.id);
    }

    // Unknown default_model names fall back to the first catalog entry
    let primary = default_model.unwrap_or_else(|| models[0].clone());
    let secondary = mini_model.unwrap_or_else(|| primary.clone());

    let agent_specs = vec![
        AgentCreate {
            name: "Code Generation Agent".to_string(),
            agent_type: AgentType::Code,
            description: "Generates code based on requirements".to_string(),
            capabilities: vec![
                AgentCapability::CodeGeneration,
                AgentCapability::CodeReview,
                AgentCapability::Documentation,
            ],
            default_model_id: primary.clone(),
            prompt_template: "You are an expert software developer. Your task is to: {{task}}"
                .to_string(),
            parameters: Some(params(json!({"temperature": 0.2, "max_tokens": 2000}))),
            metadata: None,
        },
        AgentCreate {
            name: "Design Agent".to_string(),
            agent_type: AgentType::Design,
            description: "Creates design artifacts and mockups".to_string(),
            capabilities: vec![
                AgentCapability::DesignCreation,
                AgentCapability::Documentation,
            ],
            default_model_id: primary.clone(),
            prompt_template: "You are an expert designer. Your task is to: {{task}}".to_string(),
            parameters: Some(params(json!({"temperature": 0.7, "max_tokens": 1500}))),
            metadata: None,
        },
        AgentCreate {
            name: "Testing Agent".to_string(),
            agent_type: AgentType::Test,
            description: "Generates and executes tests".to_string(),
            capabilities: vec![
                AgentCapability::TestGeneration,
                AgentCapability::CodeReview,
            ],
            default_model_id: secondary,
            prompt_template: "You are an expert software tester. Your task is to: {{task}}"
                .to_string(),
            parameters: Some(params(json!({"temperature": 0.2, "max_tokens": 2000}))),
            metadata: None,
        },
        AgentCreate {
            name: "Security Agent".to_string(),
            agent_type: AgentType::Security,
            description: "Reviews code for security vulnerabilities".to_string(),
            capabilities: vec![
                AgentCapability::SecurityAnalysis,
                AgentCapability::CodeReview,
            ],
            default_model_id: primary,
            prompt_template: "You are an application security expert. Your task is to: {{task}}"
                .to_string(),
            parameters: Some(params(json!({"temperature": 0.1, "max_tokens": 2000}))),
            metadata: None,
        },
    ];

    let mut agents = Vec::new();
    for create in agent_specs {
        agents.push(platform.register_agent(create).await?.id);
    }
    let code_agent = agents[0].clone();
    let security_agent = agents[3].clone();

    let mut review = WorkflowStep::new("step3", StepType::Human, "Human Review");
    review.description = Some("Human review of AI findings".to_string());

    let mut analysis = WorkflowStep::agent("step1", "Code Analysis", code_agent)
        .with_parameters(params(json!({"focus": "quality"})))
        .with_next(&["step2"]);
    analysis.description = Some("Analyze code for issues".to_string());

    let mut security = WorkflowStep::agent("step2", "Security Check", security_agent)
        .with_parameters(params(json!({"focus": "security"})))
        .with_next(&["step3"]);
    security.description = Some("Check for security vulnerabilities".to_string());

    let workflow = platform
        .create_workflow(WorkflowCreate {
            name: "Code Review Workflow".to_string(),
            description: "Automated code review workflow".to_string(),
            workflow_type: WorkflowType::Sequential,
            steps: vec![analysis, security, review],
            parameters: Some(params(json!({"timeout": 3600}))),
            metadata: None,
        })
        .await?;

    info!(
        models = models.len(),
        agents = agents.len(),
        workflow_id = %workflow.id,
        "Seeded development catalog"
    );

    Ok(SeedSummary {
        models,
        agents,
        workflow_id: workflow.id,
    })
}
