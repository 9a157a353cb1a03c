//! List filters and pagination
//!
//! Every list operation takes a filter and a [`Pagination`]. Filters are plain
//! structs whose `None` fields match everything.

use serde::{Deserialize, Serialize};

use super::agent::{Agent, AgentCapability, AgentType};
use super::execution::{ExecutionStatus, WorkflowExecution};
use super::llm_model::{Model, ModelCapability, ModelProvider};
use super::task::{Task, TaskPriority, TaskStatus, TaskType};
use super::workflow::{Workflow, WorkflowType};
use crate::{MachineError, Result};

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 1000;
pub const DEFAULT_TASK_LIMIT: usize = 10;
pub const MAX_TASK_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Pagination {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    /// Effective limit, checked against `1..=max`
    pub fn resolve(&self, default: usize, max: usize) -> Result<usize> {
        let limit = self.limit.unwrap_or(default);
        if limit == 0 || limit > max {
            return Err(MachineError::validation(format!(
                "limit must be between 1 and {}",
                max
            )));
        }
        Ok(limit)
    }

    /// Slice an already sorted list
    pub fn apply<T>(&self, items: Vec<T>, default: usize, max: usize) -> Result<Vec<T>> {
        let limit = self.resolve(default, max)?;
        Ok(items.into_iter().skip(self.offset).take(limit).collect())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentFilter {
    #[serde(default, rename = "type")]
    pub agent_type: Option<AgentType>,
    #[serde(default)]
    pub capability: Option<AgentCapability>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl AgentFilter {
    pub fn matches(&self, agent: &Agent) -> bool {
        self.agent_type.map_or(true, |t| agent.agent_type == t)
            && self
                .capability
                .map_or(true, |c| agent.capabilities.contains(&c))
            && self.is_active.map_or(true, |a| agent.is_active == a)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelFilter {
    #[serde(default)]
    pub provider: Option<ModelProvider>,
    #[serde(default)]
    pub capability: Option<ModelCapability>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl ModelFilter {
    pub fn matches(&self, model: &Model) -> bool {
        self.provider.map_or(true, |p| model.provider == p)
            && self
                .capability
                .map_or(true, |c| model.capabilities.contains(&c))
            && self.is_active.map_or(true, |a| model.is_active == a)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowFilter {
    #[serde(default, rename = "type")]
    pub workflow_type: Option<WorkflowType>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl WorkflowFilter {
    pub fn matches(&self, workflow: &Workflow) -> bool {
        self.workflow_type
            .map_or(true, |t| workflow.workflow_type == t)
            && self.is_active.map_or(true, |a| workflow.is_active == a)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionFilter {
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
}

impl ExecutionFilter {
    pub fn matches(&self, execution: &WorkflowExecution) -> bool {
        self.workflow_id
            .as_ref()
            .map_or(true, |w| &execution.workflow_id == w)
            && self.status.map_or(true, |s| execution.status == s)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    #[serde(default, rename = "type")]
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.task_type.map_or(true, |t| task.task_type == t)
            && self.status.map_or(true, |s| task.status == s)
            && self.priority.map_or(true, |p| task.priority == p)
    }
}
