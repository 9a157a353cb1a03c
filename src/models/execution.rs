// Workflow executions and their state machine

//! # Workflow Executions
//!
//! A [`WorkflowExecution`] is one run of a workflow against caller-supplied
//! input. Its lifecycle is
//!
//! ```text
//! pending -> in_progress -> completed
//!                        \-> failed      (step error, budget, cancellation)
//! ```
//!
//! `completed` and `failed` are terminal. The transition helpers on this type
//! are meant to run inside the store's per-record mutation, so every check and
//! write happens while the record is held exclusively. That is what lets a
//! worker observe a cancellation at its next step boundary without racing it.
//!
//! ## Branch accounting
//!
//! `active_branches` counts the step chains currently alive. Starting the
//! execution opens one. A finished step closes its own branch and opens one per
//! successor it continues with, so fan-out raises the counter and sinks lower
//! it. The execution completes when the counter returns to zero.
//!
//! Branches that converge on one human step park there separately. Each parked
//! visit keeps its own input and needs its own signal, so the join still sees
//! every branch close.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::agent::AgentId;
use super::llm_model::ModelId;
use super::workflow::StepType;
use super::Parameters;
use crate::{MachineError, Result};

/// Error recorded on an execution cancelled by a caller
pub const CANCELLATION_MESSAGE: &str = "Cancelled by user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::InProgress => "in_progress",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRunStatus {
    Running,
    AwaitingSignal,
    Completed,
    Failed,
}

/// One visit of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub step_type: StepType,
    pub status: StepRunStatus,
    pub agent_id: Option<AgentId>,
    pub model_id: Option<ModelId>,
    pub cost: f64,
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Visit number of this step within the execution, starting at 1
    pub iteration: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub current_step_id: Option<String>,
    pub input_data: Parameters,
    pub output_data: Parameters,
    /// Workflow defaults overlaid by caller parameters
    pub parameters: Parameters,
    pub error: Option<String>,
    pub cost: f64,
    pub steps_executed: u32,
    pub active_branches: u32,
    /// Human steps waiting for a signal, with the input of every parked visit
    pub awaiting_signal: BTreeMap<String, Vec<Value>>,
    pub loop_iterations: BTreeMap<String, u32>,
    pub sink_outputs: BTreeMap<String, Value>,
    pub step_history: Vec<StepRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>, input_data: Parameters, parameters: Parameters) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Pending,
            current_step_id: None,
            input_data,
            output_data: Parameters::new(),
            parameters,
            error: None,
            cost: 0.0,
            steps_executed: 0,
            active_branches: 0,
            awaiting_signal: BTreeMap::new(),
            loop_iterations: BTreeMap::new(),
            sink_outputs: BTreeMap::new(),
            step_history: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Accept the execution: `pending -> in_progress` at the entry step
    pub fn start(&mut self, entry_step_id: &str) -> Result<()> {
        if self.status != ExecutionStatus::Pending {
            return Err(MachineError::InvalidStateTransition(format!(
                "Cannot start execution with status {}",
                self.status
            )));
        }
        self.status = ExecutionStatus::InProgress;
        self.current_step_id = Some(entry_step_id.to_string());
        self.active_branches = 1;
        self.touch();
        Ok(())
    }

    /// Forced transition to `failed` with the cancellation message
    pub fn cancel(&mut self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(MachineError::InvalidStateTransition(format!(
                "Cannot cancel execution with status {}",
                self.status
            )));
        }
        self.status = ExecutionStatus::Failed;
        self.error = Some(CANCELLATION_MESSAGE.to_string());
        self.awaiting_signal.clear();
        self.touch();
        Ok(())
    }

    /// Fail the execution unless it already reached a terminal status
    ///
    /// `step_id` names the step whose open visit is marked failed; `None` when
    /// the failure is not tied to a step. Returns whether this call performed
    /// the transition.
    pub fn fail(&mut self, step_id: Option<&str>, message: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let message = message.into();
        if let Some(step_id) = step_id {
            self.close_step(step_id, StepRunStatus::Failed, None, Some(message.clone()));
        }
        self.status = ExecutionStatus::Failed;
        self.error = Some(message);
        self.awaiting_signal.clear();
        self.touch();
        true
    }

    /// Error unless the execution is still advancing
    pub fn ensure_in_progress(&self) -> Result<()> {
        if self.status != ExecutionStatus::InProgress {
            return Err(MachineError::InvalidStateTransition(format!(
                "Execution {} is {}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Record the start of a step visit, enforcing the step budget
    pub fn begin_step(&mut self, step_id: &str, step_type: StepType, max_steps: u32) -> Result<u32> {
        self.ensure_in_progress()?;
        if self.steps_executed >= max_steps {
            return Err(MachineError::QuotaExceeded(format!(
                "execution exceeded its budget of {} steps",
                max_steps
            )));
        }
        self.steps_executed += 1;
        self.current_step_id = Some(step_id.to_string());

        let iteration = self
            .step_history
            .iter()
            .filter(|r| r.step_id == step_id)
            .count() as u32
            + 1;
        self.step_history.push(StepRecord {
            step_id: step_id.to_string(),
            step_type,
            status: StepRunStatus::Running,
            agent_id: None,
            model_id: None,
            cost: 0.0,
            output: None,
            error: None,
            iteration,
            started_at: Utc::now(),
            finished_at: None,
        });
        self.touch();
        Ok(iteration)
    }

    /// Park a human step until a signal arrives; the branch stays active
    pub fn await_signal(&mut self, step_id: &str, input: Value) -> Result<()> {
        self.ensure_in_progress()?;
        if let Some(record) = self.open_record_mut(step_id) {
            record.status = StepRunStatus::AwaitingSignal;
        }
        self.awaiting_signal
            .entry(step_id.to_string())
            .or_default()
            .push(input);
        self.touch();
        Ok(())
    }

    /// Take the input of the latest parked visit of a human step
    ///
    /// The latest visit is also the one whose open record gets closed next.
    pub fn take_signal(&mut self, step_id: &str) -> Result<Value> {
        self.ensure_in_progress()?;
        let parked = self.awaiting_signal.get_mut(step_id);
        let input = parked.and_then(|inputs| inputs.pop()).ok_or_else(|| {
            MachineError::InvalidStateTransition(format!(
                "Step {} of execution {} is not awaiting a signal",
                step_id, self.id
            ))
        })?;
        if self
            .awaiting_signal
            .get(step_id)
            .map_or(false, |inputs| inputs.is_empty())
        {
            self.awaiting_signal.remove(step_id);
        }
        Ok(input)
    }

    /// Number of parked human visits across all steps
    pub fn parked_signals(&self) -> u32 {
        self.awaiting_signal.values().map(|v| v.len() as u32).sum()
    }

    /// Count one more pass through a loop step and return the new count
    pub fn next_loop_iteration(&mut self, step_id: &str) -> u32 {
        let count = self.loop_iterations.entry(step_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Forget the pass count of a loop step that exited
    pub fn exit_loop(&mut self, step_id: &str) {
        self.loop_iterations.remove(step_id);
    }

    /// Close a step visit and update branch accounting
    ///
    /// `continuations` is the number of successors the branch continues with.
    /// A step that ends its branch contributes `output` to the execution output.
    /// Returns `true` when this step completed the execution.
    pub fn finish_step(&mut self, outcome: StepOutcome, continuations: usize) -> Result<bool> {
        self.ensure_in_progress()?;

        if outcome.cost.is_finite() && outcome.cost > 0.0 {
            self.cost += outcome.cost;
        }

        let StepOutcome {
            step_id,
            agent_id,
            model_id,
            cost,
            output,
        } = outcome;

        if let Some(record) = self.open_record_mut(&step_id) {
            record.agent_id = agent_id;
            record.model_id = model_id;
            record.cost = cost;
        }
        self.close_step(&step_id, StepRunStatus::Completed, Some(output.clone()), None);

        if continuations == 0 {
            self.sink_outputs.insert(step_id, output);
        }

        self.active_branches = self
            .active_branches
            .saturating_sub(1)
            .saturating_add(continuations as u32);

        if self.active_branches == 0 {
            self.complete();
            return Ok(true);
        }
        self.touch();
        Ok(false)
    }

    fn complete(&mut self) {
        self.output_data = match self.sink_outputs.len() {
            0 => Parameters::new(),
            1 => match self.sink_outputs.values().next() {
                Some(Value::Object(map)) => map.clone(),
                Some(other) => {
                    let mut wrapped = Parameters::new();
                    wrapped.insert("result".to_string(), other.clone());
                    wrapped
                }
                None => Parameters::new(),
            },
            _ => self
                .sink_outputs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        self.status = ExecutionStatus::Completed;
        let now = Utc::now();
        self.completed_at.get_or_insert(now);
        self.updated_at = now;
    }

    fn open_record_mut(&mut self, step_id: &str) -> Option<&mut StepRecord> {
        self.step_history
            .iter_mut()
            .rev()
            .find(|r| r.step_id == step_id && r.finished_at.is_none())
    }

    fn close_step(
        &mut self,
        step_id: &str,
        status: StepRunStatus,
        output: Option<Value>,
        error: Option<String>,
    ) {
        if let Some(record) = self.open_record_mut(step_id) {
            record.status = status;
            record.output = output;
            record.error = error;
            record.finished_at = Some(Utc::now());
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Result of running one step, applied through [`WorkflowExecution::finish_step`]
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step_id: String,
    pub agent_id: Option<AgentId>,
    pub model_id: Option<ModelId>,
    pub cost: f64,
    pub output: Value,
}

impl StepOutcome {
    pub fn new(step_id: impl Into<String>, output: Value) -> Self {
        Self {
            step_id: step_id.into(),
            agent_id: None,
            model_id: None,
            cost: 0.0,
            output,
        }
    }
}

/// Request to start an execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionCreate {
    #[serde(default)]
    pub input_data: Option<Parameters>,
    #[serde(default)]
    pub parameters: Option<Parameters>,
}
