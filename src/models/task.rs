use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::agent::{AgentId, AgentType};
use super::llm_model::ModelId;
use super::{validate_text, Parameters};
use crate::{MachineError, Result};

/// Tasks share the agent type set
pub type TaskType = AgentType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Verifying,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Verifying => "verifying",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A standalone unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub progress: f64,
    pub result: Option<Parameters>,
    pub error: Option<String>,
    pub cost: f64,
    pub context: Parameters,
    pub agent_id: Option<AgentId>,
    pub model_id: Option<ModelId>,
    pub parameters: Option<Parameters>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn from_create(create: TaskCreate) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_type: create.task_type,
            title: create.title,
            description: create.description,
            priority: create.priority.unwrap_or_default(),
            status: TaskStatus::Pending,
            progress: 0.0,
            result: None,
            error: None,
            cost: 0.0,
            context: create.context.unwrap_or_default(),
            agent_id: create.agent_id,
            model_id: create.model_id,
            parameters: create.parameters,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Change status; the first transition to `completed` stamps `completed_at`
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        let now = Utc::now();
        if status == TaskStatus::Completed && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        self.updated_at = now;
    }

    pub fn add_cost(&mut self, cost: f64) {
        if cost.is_finite() && cost > 0.0 {
            self.cost += cost;
        }
    }

    /// Text handed to a bound agent
    pub fn prompt_text(&self) -> String {
        if self.description.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{}\n\n{}", self.title, self.description)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreate {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub context: Option<Parameters>,
    /// Agent that should process the task; unbound tasks are tracked only
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub model_id: Option<ModelId>,
    #[serde(default)]
    pub parameters: Option<Parameters>,
}

impl TaskCreate {
    pub fn validate(&self) -> Result<()> {
        validate_text("title", &self.title, Some(200))?;
        validate_text("description", &self.description, None)?;
        Ok(())
    }
}

/// Partial update; status, progress and result are independent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub result: Option<Parameters>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub context: Option<Parameters>,
}

impl TaskUpdate {
    pub fn validate(&self) -> Result<()> {
        if let Some(title) = &self.title {
            validate_text("title", title, Some(200))?;
        }
        if let Some(description) = &self.description {
            validate_text("description", description, None)?;
        }
        if let Some(progress) = self.progress {
            if !(0.0..=1.0).contains(&progress) {
                return Err(MachineError::validation(
                    "progress must be between 0 and 1",
                ));
            }
        }
        Ok(())
    }

    pub fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(progress) = self.progress {
            task.progress = progress;
        }
        if let Some(result) = &self.result {
            task.result = Some(result.clone());
        }
        if let Some(error) = &self.error {
            task.error = Some(error.clone());
        }
        if let Some(context) = &self.context {
            task.context = context.clone();
        }
        match self.status {
            Some(status) => task.set_status(status),
            None => task.updated_at = Utc::now(),
        }
    }
}
