// Core domain models for TheMachine
// Plain data types shared by the registry, the engine and the transport layer

//! # Domain Models Module
//!
//! This module contains the records the orchestration core works with. They are
//! plain serde types: the engine owns the behaviour, the models own validation of
//! their own payloads and the small state transitions that belong to a record.
//!
//! - `agent`: agents, their types and capabilities
//! - `llm_model`: models, providers and per-token rates
//! - `workflow`: workflow definitions and the step graph
//! - `execution`: one run of a workflow
//! - `task`: standalone tasks
//! - `rule`: conditions used by the default step evaluator
//! - `query`: list filters and pagination

pub mod agent;
pub mod execution;
pub mod llm_model;
pub mod query;
pub mod rule;
pub mod task;
pub mod workflow;

pub use agent::{Agent, AgentCapability, AgentCreate, AgentId, AgentType, AgentUpdate};
pub use execution::{
    ExecutionCreate, ExecutionStatus, StepOutcome, StepRecord, StepRunStatus, WorkflowExecution,
    CANCELLATION_MESSAGE,
};
pub use llm_model::{Model, ModelCapability, ModelCreate, ModelId, ModelProvider, ModelUpdate};
pub use query::{
    AgentFilter, ExecutionFilter, ModelFilter, Pagination, TaskFilter, WorkflowFilter,
};
pub use rule::{Rule, RuleCondition};
pub use task::{Task, TaskCreate, TaskPriority, TaskStatus, TaskType, TaskUpdate};
pub use workflow::{
    validate_steps, StepType, Workflow, WorkflowCreate, WorkflowStep, WorkflowType,
    WorkflowUpdate,
};

/// Free-form parameter, metadata and data maps
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Overlay `overrides` on `base` key by key; keys in `overrides` win
pub fn merge_parameters(base: &Parameters, overrides: Option<&Parameters>) -> Parameters {
    let mut merged = base.clone();
    if let Some(overrides) = overrides {
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Check a required string field against a length range (in characters)
pub(crate) fn validate_text(
    field: &str,
    value: &str,
    max_chars: Option<usize>,
) -> crate::Result<()> {
    if value.trim().is_empty() {
        return Err(crate::MachineError::validation(format!(
            "{} must not be empty",
            field
        )));
    }
    if let Some(max) = max_chars {
        if value.chars().count() > max {
            return Err(crate::MachineError::validation(format!(
                "{} must be at most {} characters",
                field, max
            )));
        }
    }
    Ok(())
}
