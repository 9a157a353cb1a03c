// Workflow definitions: an ordered list of steps forming a directed graph

//! # Workflow Definitions
//!
//! A [`Workflow`] is a reusable graph of [`WorkflowStep`]s. The first step in
//! the list is the entry; each step names its successors in `next_steps`.
//! The graph may contain cycles (loop steps re-enter their body), so the
//! engine bounds traversal itself rather than relying on the shape of the graph.
//!
//! Structural rules checked here:
//! - step ids are non-empty and unique within the workflow
//! - every successor id names a step of the same workflow
//! - agent steps carry an agent binding
//! - loop steps carry a condition and at least one successor (the loop body)
//! - condition steps with successors carry a condition
//!
//! Whether bound agents actually exist is a registry question and is checked by
//! the workflow engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::agent::AgentId;
use super::{validate_text, Parameters};
use crate::{MachineError, Result};

/// Declared traversal intent; informational only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Sequential,
    Parallel,
    Conditional,
    Custom,
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowType::Sequential => "sequential",
            WorkflowType::Parallel => "parallel",
            WorkflowType::Conditional => "conditional",
            WorkflowType::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// How the engine treats a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Agent,
    Human,
    Condition,
    Loop,
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepType::Agent => "agent",
            StepType::Human => "human",
            StepType::Condition => "condition",
            StepType::Loop => "loop",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub parameters: Option<Parameters>,
    #[serde(default)]
    pub next_steps: Option<Vec<String>>,
    /// Opaque expression handed to the step evaluator
    #[serde(default)]
    pub condition: Option<String>,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, step_type: StepType, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_type,
            name: name.into(),
            description: None,
            agent_id: None,
            parameters: None,
            next_steps: None,
            condition: None,
        }
    }

    pub fn agent(id: impl Into<String>, name: impl Into<String>, agent_id: impl Into<AgentId>) -> Self {
        let mut step = Self::new(id, StepType::Agent, name);
        step.agent_id = Some(agent_id.into());
        step
    }

    pub fn with_next(mut self, next: &[&str]) -> Self {
        self.next_steps = Some(next.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Successor ids; empty for a sink
    pub fn successors(&self) -> &[String] {
        self.next_steps.as_deref().unwrap_or(&[])
    }

    pub fn is_sink(&self) -> bool {
        self.successors().is_empty()
    }
}

/// Validate the step graph of a workflow
pub fn validate_steps(steps: &[WorkflowStep]) -> Result<()> {
    let mut ids = HashSet::new();
    for step in steps {
        if step.id.trim().is_empty() {
            return Err(MachineError::validation("step id must not be empty"));
        }
        if !ids.insert(step.id.as_str()) {
            return Err(MachineError::validation(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
        validate_text("step name", &step.name, Some(100))?;
    }

    for step in steps {
        for next in step.successors() {
            if !ids.contains(next.as_str()) {
                return Err(MachineError::validation(format!(
                    "step '{}' references unknown successor '{}'",
                    step.id, next
                )));
            }
        }

        let has_condition = step
            .condition
            .as_deref()
            .map_or(false, |c| !c.trim().is_empty());

        match step.step_type {
            StepType::Agent if step.agent_id.is_none() => {
                return Err(MachineError::validation(format!(
                    "agent step '{}' has no agent binding",
                    step.id
                )));
            }
            StepType::Loop if !has_condition || step.is_sink() => {
                return Err(MachineError::validation(format!(
                    "loop step '{}' needs a condition and at least one successor",
                    step.id
                )));
            }
            StepType::Condition if !has_condition && !step.is_sink() => {
                return Err(MachineError::validation(format!(
                    "condition step '{}' has successors but no condition",
                    step.id
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub workflow_type: WorkflowType,
    pub steps: Vec<WorkflowStep>,
    pub parameters: Parameters,
    pub metadata: Parameters,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn from_create(id: String, create: WorkflowCreate) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: create.name,
            description: create.description,
            workflow_type: create.workflow_type,
            steps: create.steps,
            parameters: create.parameters.unwrap_or_default(),
            metadata: create.metadata.unwrap_or_default(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// The first step in the list
    pub fn entry_step(&self) -> Option<&WorkflowStep> {
        self.steps.first()
    }

    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Distinct agents bound by the workflow's steps
    pub fn referenced_agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self
            .steps
            .iter()
            .filter_map(|s| s.agent_id.clone())
            .collect();
        agents.sort();
        agents.dedup();
        agents
    }

    pub fn references_agent(&self, agent_id: &AgentId) -> bool {
        self.steps
            .iter()
            .any(|s| s.agent_id.as_ref() == Some(agent_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCreate {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub workflow_type: WorkflowType,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub parameters: Option<Parameters>,
    #[serde(default)]
    pub metadata: Option<Parameters>,
}

impl WorkflowCreate {
    pub fn validate(&self) -> Result<()> {
        validate_text("name", &self.name, Some(100))?;
        validate_text("description", &self.description, None)?;
        validate_steps(&self.steps)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub workflow_type: Option<WorkflowType>,
    #[serde(default)]
    pub steps: Option<Vec<WorkflowStep>>,
    #[serde(default)]
    pub parameters: Option<Parameters>,
    #[serde(default)]
    pub metadata: Option<Parameters>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl WorkflowUpdate {
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_text("name", name, Some(100))?;
        }
        if let Some(description) = &self.description {
            validate_text("description", description, None)?;
        }
        if let Some(steps) = &self.steps {
            validate_steps(steps)?;
        }
        Ok(())
    }

    pub fn apply(&self, workflow: &mut Workflow) {
        if let Some(name) = &self.name {
            workflow.name = name.clone();
        }
        if let Some(description) = &self.description {
            workflow.description = description.clone();
        }
        if let Some(workflow_type) = self.workflow_type {
            workflow.workflow_type = workflow_type;
        }
        if let Some(steps) = &self.steps {
            workflow.steps = steps.clone();
        }
        if let Some(parameters) = &self.parameters {
            workflow.parameters = parameters.clone();
        }
        if let Some(metadata) = &self.metadata {
            workflow.metadata = metadata.clone();
        }
        if let Some(is_active) = self.is_active {
            workflow.is_active = is_active;
        }
        workflow.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn review_steps() -> Vec<WorkflowStep> {
        vec![
            WorkflowStep::agent("analysis", "Code Analysis", "code-agent").with_next(&["security"]),
            WorkflowStep::agent("security", "Security Review", "security-agent")
                .with_next(&["review"]),
            WorkflowStep::new("review", StepType::Human, "Human Review"),
        ]
    }

    #[test]
    fn test_valid_graph() {
        assert!(validate_steps(&review_steps()).is_ok());
        assert!(validate_steps(&[]).is_ok());
    }

    #[test]
    fn test_unknown_successor_is_rejected() {
        let mut steps = review_steps();
        steps[2].next_steps = Some(vec!["deploy".to_string()]);
        let err = validate_steps(&steps).unwrap_err();
        assert!(err.to_string().contains("unknown successor 'deploy'"));
    }

    #[test]
    fn test_duplicate_ids_and_missing_bindings() {
        let mut steps = review_steps();
        steps[1].id = "analysis".to_string();
        steps[0].next_steps = Some(vec!["analysis".to_string()]);
        assert!(validate_steps(&steps).is_err());

        let unbound = vec![WorkflowStep::new("a", StepType::Agent, "A")];
        assert!(validate_steps(&unbound).is_err());
    }

    #[test]
    fn test_loop_and_condition_requirements() {
        let body = WorkflowStep::agent("body", "Body", "code-agent");

        let no_condition = vec![
            WorkflowStep::new("loop", StepType::Loop, "Loop").with_next(&["body"]),
            body.clone(),
        ];
        assert!(validate_steps(&no_condition).is_err());

        let cyclic = vec![
            WorkflowStep::new("loop", StepType::Loop, "Loop")
                .with_next(&["body"])
                .with_condition(r#"{"type": "FieldLessThan", "field": "n", "value": 3}"#),
            body.with_next(&["loop"]),
        ];
        assert!(validate_steps(&cyclic).is_ok());

        let gate_without_condition = vec![
            WorkflowStep::new("gate", StepType::Condition, "Gate").with_next(&["end"]),
            WorkflowStep::new("end", StepType::Human, "End"),
        ];
        assert!(validate_steps(&gate_without_condition).is_err());
    }

    #[test]
    fn test_wire_format_and_helpers() {
        let workflow = Workflow::from_create(
            "wf-1".to_string(),
            WorkflowCreate {
                name: "Code Review Workflow".to_string(),
                description: "Reviews code".to_string(),
                workflow_type: WorkflowType::Sequential,
                steps: review_steps(),
                parameters: None,
                metadata: None,
            },
        );

        let value = serde_json::to_value(&workflow).unwrap();
        assert_eq!(value["type"], json!("sequential"));
        assert_eq!(value["steps"][2]["type"], json!("human"));

        assert_eq!(workflow.entry_step().unwrap().id, "analysis");
        assert!(workflow.step("review").unwrap().is_sink());
        assert_eq!(
            workflow.referenced_agents(),
            vec![AgentId::from("code-agent"), AgentId::from("security-agent")]
        );
        assert!(workflow.references_agent(&AgentId::from("security-agent")));
    }
}
