//! # Agent Execution
//!
//! Runs one agent against one task: resolve the model, merge parameters,
//! render the prompt, call the backend and account the cost. The executor
//! holds no per-invocation state, so any number of executions run in parallel.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::events::{EngineEvent, EventBus};
use super::registry::Registry;
use super::selector::ModelSelector;
use crate::llm::{
    estimate_tokens, CompletionRequest, CostBreakdown, CostTracker, ModelBackend, TokenUsage,
};
use crate::models::{merge_parameters, AgentId, ModelId, Parameters};
use crate::{MachineError, Result};

/// One agent invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionRequest {
    pub agent_id: AgentId,
    pub task: String,
    /// Overrides the agent's default model
    #[serde(default)]
    pub model_id: Option<ModelId>,
    /// Overlaid on the agent's parameters
    #[serde(default)]
    pub parameters: Option<Parameters>,
}

impl AgentExecutionRequest {
    pub fn new(agent_id: AgentId, task: impl Into<String>) -> Self {
        Self {
            agent_id,
            task: task.into(),
            model_id: None,
            parameters: None,
        }
    }

    pub fn with_model(mut self, model_id: ModelId) -> Self {
        self.model_id = Some(model_id);
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// Outcome of an agent invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub result: String,
    pub agent_id: AgentId,
    pub model_id: ModelId,
    /// Effective parameters after the merge
    pub parameters: Parameters,
    pub usage: TokenUsage,
    pub cost: f64,
    pub cost_breakdown: CostBreakdown,
    pub duration_ms: u64,
}

pub struct AgentExecutor {
    registry: Arc<Registry>,
    backend: Arc<dyn ModelBackend>,
    costs: Arc<CostTracker>,
    events: Option<EventBus>,
}

impl AgentExecutor {
    pub fn new(
        registry: Arc<Registry>,
        backend: Arc<dyn ModelBackend>,
        costs: Arc<CostTracker>,
    ) -> Self {
        Self {
            registry,
            backend,
            costs,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn execute(&self, request: AgentExecutionRequest) -> Result<ExecutionResult> {
        if request.task.trim().is_empty() {
            return Err(MachineError::validation("task must not be empty"));
        }

        let agent = self.registry.get_agent(&request.agent_id).await?;
        if !agent.is_active {
            return Err(MachineError::inactive("Agent", &agent.id));
        }

        let model_id = request
            .model_id
            .clone()
            .unwrap_or_else(|| agent.default_model_id.clone());
        let model = self.registry.get_model(&model_id).await?;

        let parameters = merge_parameters(&agent.parameters, request.parameters.as_ref());
        let prompt = agent.render_prompt(&request.task, &parameters);

        ModelSelector::check_model(
            &model,
            &agent.required_model_capabilities(),
            Some(estimate_tokens(&prompt)),
        )?;
        self.costs.check_budget()?;

        debug!(
            agent_id = %agent.id,
            model_id = %model.id,
            backend = self.backend.name(),
            "Invoking model"
        );

        let started = Instant::now();
        let request_model = model.clone();
        let completion = self
            .backend
            .complete(&CompletionRequest::new(request_model, prompt, parameters.clone()))
            .await
            .map_err(|e| {
                warn!(agent_id = %agent.id, model_id = %model.id, error = %e, "Model invocation failed");
                MachineError::from(e)
            })?;
        let duration_ms = started.elapsed().as_millis().min(u64::MAX as u128) as u64;

        let cost_breakdown = CostBreakdown::compute(&model, &completion.usage);
        let cost = cost_breakdown.total_cost;
        let spent_today = self.costs.record(cost);

        info!(
            agent_id = %agent.id,
            model_id = %model.id,
            prompt_tokens = completion.usage.prompt_tokens,
            completion_tokens = completion.usage.completion_tokens,
            cost,
            spent_today,
            duration_ms,
            "Agent executed"
        );

        if let Some(events) = &self.events {
            events.publish(EngineEvent::AgentExecuted {
                agent_id: agent.id.clone(),
                model_id: model.id.clone(),
                cost,
            });
        }

        Ok(ExecutionResult {
            result: completion.text,
            agent_id: agent.id,
            model_id: model.id,
            parameters,
            usage: completion.usage,
            cost,
            cost_breakdown,
            duration_ms,
        })
    }
}
