// Workflow engine: definitions, executions and step advancement

//! # Workflow Engine
//!
//! The engine owns workflow definitions and their executions. Starting an
//! execution is synchronous (validate, persist, queue the entry step); the
//! steps themselves run when a worker hands a [`StepWork`] item to
//! [`WorkflowEngine::dispatch_step`].
//!
//! ## Step handling
//!
//! | Step type   | Behaviour                                                      |
//! |-------------|----------------------------------------------------------------|
//! | `agent`     | run the bound agent, add its cost, continue with all successors |
//! | `human`     | park the branch until [`WorkflowEngine::resolve_human_step`]   |
//! | `condition` | continue with the single successor the evaluator picks         |
//! | `loop`      | re-enter the body or exit, as the evaluator decides            |
//!
//! A step that continues with several successors fans out. Each successor
//! becomes its own work item, and the execution only completes once every
//! branch has reached a sink (see the branch accounting on
//! [`WorkflowExecution`]).
//!
//! ## Cancellation
//!
//! Every state change goes through the store's per-record mutation and the
//! execution's own transition checks, so a worker that loses the race against
//! a cancellation gets an error back and never overwrites the cancellation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::evaluator::{EvaluationContext, LoopDecision, StepEvaluator};
use super::events::{EngineEvent, EventBus};
use super::executor::{AgentExecutionRequest, AgentExecutor};
use super::registry::{AgentReferences, GateHold, Registry};
use super::scheduler::{StepWork, WorkItem, WorkQueue};
use super::storage::{Mutation, WorkflowStorage};
use crate::models::query::{DEFAULT_LIMIT, MAX_LIMIT};
use crate::models::{
    merge_parameters, AgentId, ExecutionCreate, ExecutionFilter, ExecutionStatus, ModelId,
    Pagination, Parameters, StepOutcome, StepType, Workflow, WorkflowCreate, WorkflowExecution,
    WorkflowFilter, WorkflowStep, WorkflowUpdate,
};
use crate::settings::Settings;
use crate::{MachineError, Result};

/// Bounds on a single execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Step visits allowed per execution, across all branches
    pub max_steps_per_execution: u32,
    /// Body passes allowed per loop step unless the step sets `max_iterations`
    pub max_loop_iterations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps_per_execution: 100,
            max_loop_iterations: 25,
        }
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_steps_per_execution: settings.max_steps_per_execution,
            max_loop_iterations: settings.max_loop_iterations,
        }
    }
}

/// Signal delivered to a human step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HumanDecision {
    pub approved: bool,
    #[serde(default)]
    pub comment: Option<String>,
    /// Replaces the step input as the data passed on
    #[serde(default)]
    pub output: Option<Value>,
}

impl HumanDecision {
    pub fn approve() -> Self {
        Self {
            approved: true,
            ..Default::default()
        }
    }

    pub fn reject(comment: impl Into<String>) -> Self {
        Self {
            approved: false,
            comment: Some(comment.into()),
            output: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    fn approved_output(&self, input: Value) -> Value {
        let base = self.output.clone().unwrap_or(input);
        let mut output = match base {
            Value::Object(map) => map,
            Value::Null => Parameters::new(),
            other => {
                let mut wrapped = Parameters::new();
                wrapped.insert("result".to_string(), other);
                wrapped
            }
        };
        output.insert("approved".to_string(), Value::Bool(true));
        if let Some(comment) = &self.comment {
            output.insert("comment".to_string(), Value::String(comment.clone()));
        }
        Value::Object(output)
    }
}

pub struct WorkflowEngine {
    storage: Arc<dyn WorkflowStorage>,
    registry: Arc<Registry>,
    executor: Arc<AgentExecutor>,
    evaluator: Arc<dyn StepEvaluator>,
    queue: WorkQueue,
    events: EventBus,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        storage: Arc<dyn WorkflowStorage>,
        registry: Arc<Registry>,
        executor: Arc<AgentExecutor>,
        evaluator: Arc<dyn StepEvaluator>,
        queue: WorkQueue,
        events: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            storage,
            registry,
            executor,
            evaluator,
            queue,
            events,
            config,
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    // Workflow definitions

    pub async fn create_workflow(&self, create: WorkflowCreate) -> Result<Workflow> {
        create.validate()?;
        let _bound = self.hold_bound_agents(&create.steps).await?;

        let workflow = Workflow::from_create(Uuid::new_v4().to_string(), create);
        let workflow = self.storage.insert_workflow(workflow).await?;
        info!(
            workflow_id = %workflow.id,
            name = %workflow.name,
            steps = workflow.steps.len(),
            "Workflow created"
        );
        Ok(workflow)
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Workflow> {
        self.storage
            .get_workflow(id)
            .await?
            .ok_or_else(|| MachineError::not_found("Workflow", id))
    }

    /// Workflows matching `filter`, sorted by name then id
    pub async fn list_workflows(
        &self,
        filter: &WorkflowFilter,
        page: &Pagination,
    ) -> Result<Vec<Workflow>> {
        let mut workflows: Vec<Workflow> = self
            .storage
            .list_workflows()
            .await?
            .into_iter()
            .filter(|w| filter.matches(w))
            .collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        page.apply(workflows, DEFAULT_LIMIT, MAX_LIMIT)
    }

    pub async fn update_workflow(&self, id: &str, update: WorkflowUpdate) -> Result<Workflow> {
        update.validate()?;
        let _bound = match &update.steps {
            Some(steps) => Some(self.hold_bound_agents(steps).await?),
            None => None,
        };

        let workflow = self
            .storage
            .update_workflow(id, &mut |workflow| {
                update.apply(workflow);
                Ok(())
            })
            .await?
            .ok_or_else(|| MachineError::not_found("Workflow", id))?;
        info!(workflow_id = %id, "Workflow updated");
        Ok(workflow)
    }

    /// Hard delete, refused while executions of the workflow are still live
    pub async fn delete_workflow(&self, id: &str) -> Result<()> {
        self.get_workflow(id).await?;

        if let Some(live) = self
            .storage
            .list_executions(Some(id))
            .await?
            .into_iter()
            .find(|e| !e.status.is_terminal())
        {
            return Err(MachineError::InUse {
                entity: "Workflow",
                id: id.to_string(),
                referenced_by: format!("execution {} ({})", live.id, live.status),
            });
        }

        self.storage
            .remove_workflow(id)
            .await?
            .ok_or_else(|| MachineError::not_found("Workflow", id))?;
        info!(workflow_id = %id, "Workflow deleted");
        Ok(())
    }

    /// First workflow (by id) with a step bound to `agent_id`
    pub async fn workflow_referencing_agent(&self, agent_id: &AgentId) -> Result<Option<Workflow>> {
        let mut workflows: Vec<Workflow> = self
            .storage
            .list_workflows()
            .await?
            .into_iter()
            .filter(|w| w.references_agent(agent_id))
            .collect();
        workflows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workflows.into_iter().next())
    }

    /// Check the agents bound by `steps` exist and keep them from being
    /// deleted until the returned hold is dropped
    async fn hold_bound_agents(&self, steps: &[WorkflowStep]) -> Result<GateHold<'_>> {
        let bound: Vec<&AgentId> = steps.iter().filter_map(|s| s.agent_id.as_ref()).collect();
        let hold = self.registry.hold_agents(bound.iter().copied()).await;
        for agent_id in bound {
            self.registry.get_agent(agent_id).await?;
        }
        Ok(hold)
    }

    // Executions

    pub async fn start_execution(
        &self,
        workflow_id: &str,
        create: ExecutionCreate,
    ) -> Result<WorkflowExecution> {
        let workflow = self.get_workflow(workflow_id).await?;
        if !workflow.is_active {
            return Err(MachineError::inactive("Workflow", &workflow.id));
        }
        let entry = workflow
            .entry_step()
            .ok_or_else(|| MachineError::validation("Workflow has no steps"))?;

        let input = create.input_data.unwrap_or_default();
        let parameters = merge_parameters(&workflow.parameters, create.parameters.as_ref());

        let mut execution = WorkflowExecution::new(&workflow.id, input.clone(), parameters);
        execution.start(&entry.id)?;
        let execution = self.storage.insert_execution(execution).await?;

        info!(
            execution_id = %execution.id,
            workflow_id = %workflow.id,
            entry_step = %entry.id,
            "Execution started"
        );
        self.events.publish(EngineEvent::ExecutionStarted {
            execution_id: execution.id,
            workflow_id: workflow.id.clone(),
        });

        let work = WorkItem::Step(StepWork {
            execution_id: execution.id,
            step_id: entry.id.clone(),
            input: Value::Object(input),
        });
        if let Err(e) = self.queue.enqueue(work) {
            self.fail_execution(&execution.id, None, &e.to_string()).await?;
            return Err(e);
        }
        Ok(execution)
    }

    pub async fn get_execution(&self, id: &Uuid) -> Result<WorkflowExecution> {
        self.storage
            .get_execution(id)
            .await?
            .ok_or_else(|| MachineError::not_found("Execution", id))
    }

    /// Executions matching `filter`, newest first
    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        page: &Pagination,
    ) -> Result<Vec<WorkflowExecution>> {
        let mut executions: Vec<WorkflowExecution> = self
            .storage
            .list_executions(filter.workflow_id.as_deref())
            .await?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        page.apply(executions, DEFAULT_LIMIT, MAX_LIMIT)
    }

    /// Cancel a pending or in-progress execution
    pub async fn cancel_execution(&self, id: &Uuid) -> Result<WorkflowExecution> {
        let execution = self.mutate(id, &mut |execution| execution.cancel()).await?;
        info!(execution_id = %id, "Execution cancelled");
        self.events
            .publish(EngineEvent::ExecutionCancelled { execution_id: *id });
        Ok(execution)
    }

    /// Deliver the external signal a human step is waiting for
    ///
    /// Approval continues the branch with the step's successors; rejection
    /// fails the execution.
    pub async fn resolve_human_step(
        &self,
        execution_id: &Uuid,
        step_id: &str,
        decision: HumanDecision,
    ) -> Result<WorkflowExecution> {
        let execution = self.get_execution(execution_id).await?;
        let workflow = self.get_workflow(&execution.workflow_id).await?;
        let step = workflow
            .step(step_id)
            .ok_or_else(|| MachineError::not_found("Step", step_id))?;
        if step.step_type != StepType::Human {
            return Err(MachineError::InvalidStateTransition(format!(
                "Step {} is a {} step, not a human step",
                step_id, step.step_type
            )));
        }

        if !decision.approved {
            let message = match &decision.comment {
                Some(comment) => format!("Human step {} rejected: {}", step_id, comment),
                None => format!("Human step {} rejected", step_id),
            };
            let execution = self
                .mutate(execution_id, &mut |execution| {
                    execution.take_signal(step_id)?;
                    execution.fail(Some(step_id), message.as_str());
                    Ok(())
                })
                .await?;
            warn!(execution_id = %execution_id, step_id, "Human step rejected");
            self.events.publish(EngineEvent::ExecutionFailed {
                execution_id: *execution_id,
                error: message,
            });
            return Ok(execution);
        }

        let successors = step.successors().to_vec();
        let mut output = Value::Null;
        let mut completed = false;
        let execution = self
            .mutate(execution_id, &mut |execution| {
                let input = execution.take_signal(step_id)?;
                output = decision.approved_output(input);
                completed = execution
                    .finish_step(StepOutcome::new(step_id, output.clone()), successors.len())?;
                Ok(())
            })
            .await?;

        info!(execution_id = %execution_id, step_id, "Human step approved");
        self.after_step(&execution, step_id, 0.0, completed, successors, output)?;
        Ok(execution)
    }

    /// Resolve once the execution is terminal or every live branch is parked
    /// on a human step
    ///
    /// When `timeout` elapses first, the latest snapshot is returned as is.
    pub async fn wait_for_execution(&self, id: &Uuid, timeout: Duration) -> Result<WorkflowExecution> {
        let mut events = self.events.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let execution = self.get_execution(id).await?;
            if is_settled(&execution) {
                return Ok(execution);
            }

            loop {
                match tokio::time::timeout_at(deadline, events.recv()).await {
                    Err(_) => return self.get_execution(id).await,
                    Ok(Ok(event)) if event.execution_id() == Some(*id) => break,
                    Ok(Ok(_)) => continue,
                    Ok(Err(RecvError::Lagged(skipped))) => {
                        debug!(skipped, "Event subscriber lagged");
                        break;
                    }
                    Ok(Err(RecvError::Closed)) => return self.get_execution(id).await,
                }
            }
        }
    }

    // Step processing

    /// Run one queued step; any error fails the execution
    pub async fn dispatch_step(&self, work: StepWork) -> Result<()> {
        match self.process_step(&work).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if self
                    .fail_execution(&work.execution_id, Some(&work.step_id), &e.to_string())
                    .await?
                {
                    Err(e)
                } else {
                    debug!(
                        execution_id = %work.execution_id,
                        step_id = %work.step_id,
                        error = %e,
                        "Execution already finished; step dropped"
                    );
                    Ok(())
                }
            }
        }
    }

    /// Move a live execution to `failed`; returns whether this call did it
    ///
    /// `step_id` is the step that failed, when there is one.
    pub async fn fail_execution(
        &self,
        id: &Uuid,
        step_id: Option<&str>,
        message: &str,
    ) -> Result<bool> {
        let mut transitioned = false;
        let updated = self
            .storage
            .update_execution(id, &mut |execution| {
                transitioned = execution.fail(step_id, message);
                Ok(())
            })
            .await?;

        if updated.is_some() && transitioned {
            warn!(execution_id = %id, error = message, "Execution failed");
            self.events.publish(EngineEvent::ExecutionFailed {
                execution_id: *id,
                error: message.to_string(),
            });
        }
        Ok(transitioned)
    }

    async fn process_step(&self, work: &StepWork) -> Result<()> {
        let execution = self.get_execution(&work.execution_id).await?;
        if execution.status.is_terminal() {
            debug!(
                execution_id = %execution.id,
                step_id = %work.step_id,
                status = %execution.status,
                "Skipping step of finished execution"
            );
            return Ok(());
        }

        let workflow = self.get_workflow(&execution.workflow_id).await?;
        let step = workflow.step(&work.step_id).cloned().ok_or_else(|| {
            MachineError::InvalidStateTransition(format!(
                "Step {} is not part of workflow {}",
                work.step_id, workflow.id
            ))
        })?;

        let max_steps = self.config.max_steps_per_execution;
        let mut iteration = 0;
        let execution = self
            .mutate(&work.execution_id, &mut |execution| {
                iteration = execution.begin_step(&step.id, step.step_type, max_steps)?;
                Ok(())
            })
            .await?;

        debug!(
            execution_id = %execution.id,
            step_id = %step.id,
            step_type = %step.step_type,
            iteration,
            "Step started"
        );
        self.events.publish(EngineEvent::StepStarted {
            execution_id: execution.id,
            step_id: step.id.clone(),
            step_type: step.step_type,
        });

        match step.step_type {
            StepType::Agent => self.run_agent_step(&execution, &step, work).await,
            StepType::Human => self.park_human_step(&execution, &step, work).await,
            StepType::Condition => {
                self.run_condition_step(&execution, &step, work, iteration)
                    .await
            }
            StepType::Loop => self.run_loop_step(&execution, &step, work).await,
        }
    }

    async fn run_agent_step(
        &self,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
        work: &StepWork,
    ) -> Result<()> {
        let agent_id = step.agent_id.clone().ok_or_else(|| {
            MachineError::validation(format!("agent step '{}' has no agent binding", step.id))
        })?;
        let parameters = merge_parameters(&execution.parameters, step.parameters.as_ref());
        let model_id = parameters
            .get("model_id")
            .and_then(|v| v.as_str())
            .map(ModelId::from);

        let request = AgentExecutionRequest {
            agent_id,
            task: step_task(step, &parameters, &work.input),
            model_id,
            parameters: Some(parameters),
        };
        let result = self.executor.execute(request).await?;

        let output = json!({
            "result": result.result,
            "agent_id": result.agent_id,
            "model_id": result.model_id,
            "cost": result.cost,
            "prompt_tokens": result.usage.prompt_tokens,
            "completion_tokens": result.usage.completion_tokens,
        });
        let outcome = StepOutcome {
            step_id: step.id.clone(),
            agent_id: Some(result.agent_id),
            model_id: Some(result.model_id),
            cost: result.cost,
            output,
        };
        self.finish_step(&execution.id, outcome, step.successors().to_vec())
            .await
    }

    async fn park_human_step(
        &self,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
        work: &StepWork,
    ) -> Result<()> {
        self.mutate(&execution.id, &mut |execution| {
            execution.await_signal(&step.id, work.input.clone())
        })
        .await?;
        info!(execution_id = %execution.id, step_id = %step.id, "Waiting for human decision");
        self.events.publish(EngineEvent::StepAwaitingSignal {
            execution_id: execution.id,
            step_id: step.id.clone(),
        });
        Ok(())
    }

    async fn run_condition_step(
        &self,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
        work: &StepWork,
        iteration: u32,
    ) -> Result<()> {
        let passthrough = StepOutcome::new(step.id.clone(), work.input.clone());
        if step.is_sink() {
            return self.finish_step(&execution.id, passthrough, Vec::new()).await;
        }

        let choice = self
            .evaluator
            .choose_branch(EvaluationContext {
                execution_id: execution.id,
                step,
                input: &work.input,
                parameters: &execution.parameters,
                iteration,
            })
            .await?;

        let next = match choice {
            Some(next) if step.successors().contains(&next) => vec![next],
            Some(next) => {
                return Err(MachineError::InvalidStateTransition(format!(
                    "Condition step {} chose undeclared successor {}",
                    step.id, next
                )))
            }
            None => Vec::new(),
        };
        debug!(execution_id = %execution.id, step_id = %step.id, ?next, "Branch chosen");
        self.finish_step(&execution.id, passthrough, next).await
    }

    async fn run_loop_step(
        &self,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
        work: &StepWork,
    ) -> Result<()> {
        let mut pass = 0;
        let execution = self
            .mutate(&execution.id, &mut |execution| {
                execution.ensure_in_progress()?;
                pass = execution.next_loop_iteration(&step.id);
                Ok(())
            })
            .await?;

        let cap = step
            .parameters
            .as_ref()
            .and_then(|p| p.get("max_iterations"))
            .and_then(|v| v.as_u64())
            .map(|v| v.min(u32::MAX as u64) as u32)
            .unwrap_or(self.config.max_loop_iterations);

        let decision = if pass > cap {
            warn!(
                execution_id = %execution.id,
                step_id = %step.id,
                max_iterations = cap,
                "Loop iteration cap reached; exiting loop"
            );
            LoopDecision::Exit
        } else {
            self.evaluator
                .loop_decision(EvaluationContext {
                    execution_id: execution.id,
                    step,
                    input: &work.input,
                    parameters: &execution.parameters,
                    iteration: pass,
                })
                .await?
        };

        let (body, exits) = step.successors().split_first().ok_or_else(|| {
            MachineError::InvalidStateTransition(format!("Loop step {} has no body", step.id))
        })?;
        let next = match decision {
            LoopDecision::Continue => vec![body.clone()],
            LoopDecision::Exit => exits.to_vec(),
        };
        debug!(execution_id = %execution.id, step_id = %step.id, pass, ?decision, "Loop decided");

        // An exited loop counts from one again when it is re-entered
        let exiting = decision == LoopDecision::Exit;
        let output = work.input.clone();
        let outcome = StepOutcome::new(step.id.clone(), output.clone());
        let mut completed = false;
        let execution = self
            .mutate(&execution.id, &mut |execution| {
                if exiting {
                    execution.exit_loop(&step.id);
                }
                completed = execution.finish_step(outcome.clone(), next.len())?;
                Ok(())
            })
            .await?;

        self.after_step(&execution, &step.id, 0.0, completed, next, output)
    }

    async fn finish_step(&self, id: &Uuid, outcome: StepOutcome, next: Vec<String>) -> Result<()> {
        let step_id = outcome.step_id.clone();
        let cost = outcome.cost;
        let output = outcome.output.clone();

        let mut completed = false;
        let execution = self
            .mutate(id, &mut |execution| {
                completed = execution.finish_step(outcome.clone(), next.len())?;
                Ok(())
            })
            .await?;

        self.after_step(&execution, &step_id, cost, completed, next, output)
    }

    /// Publish the outcome of a committed step and queue its successors
    fn after_step(
        &self,
        execution: &WorkflowExecution,
        step_id: &str,
        cost: f64,
        completed: bool,
        next: Vec<String>,
        output: Value,
    ) -> Result<()> {
        debug!(execution_id = %execution.id, step_id, cost, "Step completed");
        self.events.publish(EngineEvent::StepCompleted {
            execution_id: execution.id,
            step_id: step_id.to_string(),
            cost,
        });

        if completed {
            info!(
                execution_id = %execution.id,
                cost = execution.cost,
                steps = execution.steps_executed,
                "Execution completed"
            );
            self.events.publish(EngineEvent::ExecutionCompleted {
                execution_id: execution.id,
                cost: execution.cost,
            });
            return Ok(());
        }

        for step_id in next {
            self.queue.enqueue(WorkItem::Step(StepWork {
                execution_id: execution.id,
                step_id,
                input: output.clone(),
            }))?;
        }
        Ok(())
    }

    async fn mutate(
        &self,
        id: &Uuid,
        mutation: Mutation<'_, WorkflowExecution>,
    ) -> Result<WorkflowExecution> {
        self.storage
            .update_execution(id, mutation)
            .await?
            .ok_or_else(|| MachineError::not_found("Execution", id))
    }

    pub async fn workflow_count(&self) -> Result<usize> {
        Ok(self.storage.list_workflows().await?.len())
    }

    /// Counts of executions by status
    pub async fn execution_counts(&self) -> Result<Vec<(ExecutionStatus, usize)>> {
        let executions = self.storage.list_executions(None).await?;
        let statuses = [
            ExecutionStatus::Pending,
            ExecutionStatus::InProgress,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
        ];
        Ok(statuses
            .iter()
            .map(|s| (*s, executions.iter().filter(|e| e.status == *s).count()))
            .collect())
    }
}

#[async_trait]
impl AgentReferences for WorkflowEngine {
    async fn first_reference(&self, agent_id: &AgentId) -> Result<Option<String>> {
        Ok(self
            .workflow_referencing_agent(agent_id)
            .await?
            .map(|workflow| format!("workflow {}", workflow.id)))
    }
}

fn is_settled(execution: &WorkflowExecution) -> bool {
    execution.status.is_terminal()
        || (execution.parked_signals() > 0
            && execution.parked_signals() >= execution.active_branches)
}

/// Task text for an agent step
///
/// A `task` parameter wins, then the step description, then the step name.
/// Non-empty input from the predecessor is appended as JSON.
fn step_task(step: &WorkflowStep, parameters: &Parameters, input: &Value) -> String {
    let task = parameters
        .get("task")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| step.description.clone())
        .unwrap_or_else(|| step.name.clone());

    match input {
        Value::Null => task,
        Value::Object(map) if map.is_empty() => task,
        other => format!("{}\n\nInput:\n{}", task, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_task_precedence() {
        let mut step = WorkflowStep::agent("a", "Code Analysis", "agent");
        let empty = Parameters::new();
        assert_eq!(step_task(&step, &empty, &Value::Null), "Code Analysis");

        step.description = Some("Analyse the code".to_string());
        assert_eq!(step_task(&step, &empty, &json!({})), "Analyse the code");

        let params = json!({"task": "Review auth"}).as_object().cloned().unwrap();
        let task = step_task(&step, &params, &json!({"file": "auth.rs"}));
        assert!(task.starts_with("Review auth"));
        assert!(task.contains("auth.rs"));
    }

    #[test]
    fn test_approved_output() {
        let output = HumanDecision::approve()
            .with_comment("looks good")
            .approved_output(json!({"result": "draft"}));
        assert_eq!(output, json!({"result": "draft", "approved": true, "comment": "looks good"}));

        let replaced = HumanDecision::approve()
            .with_output(json!("final"))
            .approved_output(json!({"result": "draft"}));
        assert_eq!(replaced, json!({"result": "final", "approved": true}));
    }

    #[test]
    fn test_settled_when_all_branches_wait() {
        let mut execution = WorkflowExecution::new("wf", Parameters::new(), Parameters::new());
        execution.start("review").unwrap();
        assert!(!is_settled(&execution));

        execution.begin_step("review", StepType::Human, 10).unwrap();
        execution.await_signal("review", json!({})).unwrap();
        assert!(is_settled(&execution));

        execution.active_branches = 2;
        assert!(!is_settled(&execution));

        execution.begin_step("review", StepType::Human, 10).unwrap();
        execution.await_signal("review", json!({})).unwrap();
        assert!(is_settled(&execution));
    }
}
