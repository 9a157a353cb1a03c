// Platform: the assembled orchestration core
// Builds every component once, runs the worker pool, tears it down on shutdown

//! # Platform
//!
//! [`Platform`] is what a transport layer (HTTP, CLI, tests) talks to. It owns
//! the stores, the registry, the engines and the worker pool, and exposes every
//! operation of the core as an async method.
//!
//! ## Lifecycle
//!
//! ```text
//! PlatformBuilder::build()   stores, components and workers are created
//!        ↓
//! operations                 requests are served, work runs on the pool
//!        ↓
//! Platform::shutdown()       workers stop after their in-flight item
//! ```
//!
//! `build` must run inside a Tokio runtime because it spawns the workers.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::info;
use uuid::Uuid;

use crate::engine::scheduler::{channel, WorkDispatcher, WorkItem, WorkerPool};
use crate::engine::{
    AgentExecutionRequest, AgentExecutor, ContextValidation, EngineConfig, EngineEvent, EventBus,
    ExecutionResult, HumanDecision, InMemoryStorage, ModelSelection, ModelSelector, Registry,
    RegistryStorage, RuleEvaluator, SelectionCriteria, StepEvaluator, TaskQueue, TaskStorage,
    WorkflowEngine, WorkflowStorage,
};
use crate::llm::{CostTracker, HttpBackend, ModelBackend, SimulatedBackend};
use crate::models::{
    Agent, AgentCreate, AgentFilter, AgentId, AgentUpdate, ExecutionCreate, ExecutionFilter,
    ExecutionStatus, Model, ModelCreate, ModelFilter, ModelId, ModelUpdate, Pagination, Task,
    TaskCreate, TaskFilter, TaskUpdate, Workflow, WorkflowCreate, WorkflowExecution,
    WorkflowFilter, WorkflowUpdate,
};
use crate::settings::{BackendKind, Settings};
use crate::{MachineError, Result};

/// Snapshot of platform counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformStats {
    pub agents: usize,
    pub models: usize,
    pub workflows: usize,
    pub executions_pending: usize,
    pub executions_in_progress: usize,
    pub executions_completed: usize,
    pub executions_failed: usize,
    pub tasks: usize,
    pub spent_today: f64,
    pub daily_limit: Option<f64>,
}

pub struct PlatformBuilder {
    settings: Settings,
    backend: Option<Arc<dyn ModelBackend>>,
    evaluator: Option<Arc<dyn StepEvaluator>>,
    registry_storage: Option<Arc<dyn RegistryStorage>>,
    workflow_storage: Option<Arc<dyn WorkflowStorage>>,
    task_storage: Option<Arc<dyn TaskStorage>>,
}

impl PlatformBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            backend: None,
            evaluator: None,
            registry_storage: None,
            workflow_storage: None,
            task_storage: None,
        }
    }

    /// Use this backend instead of the one named in the settings
    pub fn with_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn StepEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_registry_storage(mut self, storage: Arc<dyn RegistryStorage>) -> Self {
        self.registry_storage = Some(storage);
        self
    }

    pub fn with_workflow_storage(mut self, storage: Arc<dyn WorkflowStorage>) -> Self {
        self.workflow_storage = Some(storage);
        self
    }

    pub fn with_task_storage(mut self, storage: Arc<dyn TaskStorage>) -> Self {
        self.task_storage = Some(storage);
        self
    }

    pub fn build(self) -> Result<Platform> {
        let settings = self.settings;
        settings.validate()?;
        tokio::runtime::Handle::try_current().map_err(|_| {
            MachineError::Configuration("the platform must be built inside a Tokio runtime".into())
        })?;

        let memory = Arc::new(InMemoryStorage::new());
        let registry_storage: Arc<dyn RegistryStorage> = match self.registry_storage {
            Some(storage) => storage,
            None => memory.clone(),
        };
        let workflow_storage: Arc<dyn WorkflowStorage> = match self.workflow_storage {
            Some(storage) => storage,
            None => memory.clone(),
        };
        let task_storage: Arc<dyn TaskStorage> = match self.task_storage {
            Some(storage) => storage,
            None => memory,
        };

        let backend: Arc<dyn ModelBackend> = match self.backend {
            Some(backend) => backend,
            None => match settings.backend {
                BackendKind::Simulated => Arc::new(SimulatedBackend::new()),
                BackendKind::Http => Arc::new(HttpBackend::new(settings.providers.clone())?),
            },
        };
        let evaluator: Arc<dyn StepEvaluator> = match self.evaluator {
            Some(evaluator) => evaluator,
            None => Arc::new(RuleEvaluator::new()),
        };

        let events = EventBus::new(settings.event_buffer_size);
        let costs = Arc::new(CostTracker::new(settings.cost_limit_daily));
        let registry = Arc::new(Registry::new(registry_storage));
        let selector = ModelSelector::new(registry.clone());
        let executor = Arc::new(
            AgentExecutor::new(registry.clone(), backend, costs.clone()).with_events(events.clone()),
        );

        let (queue, receiver) = channel();
        let workflows = Arc::new(WorkflowEngine::new(
            workflow_storage,
            registry.clone(),
            executor.clone(),
            evaluator,
            queue.clone(),
            events.clone(),
            EngineConfig::from_settings(&settings),
        ));
        let tasks = Arc::new(TaskQueue::new(
            task_storage,
            registry.clone(),
            executor.clone(),
            queue,
            events.clone(),
        ));

        let dispatcher = Arc::new(EngineDispatcher {
            workflows: workflows.clone(),
            tasks: tasks.clone(),
        });
        let workers = WorkerPool::spawn(settings.worker_count, receiver, dispatcher);

        info!(
            project = %settings.project_name,
            backend = executor.backend_name(),
            workers = settings.worker_count,
            cost_limit_daily = ?settings.cost_limit_daily,
            "Platform started"
        );

        Ok(Platform {
            settings,
            registry,
            selector,
            executor,
            workflows,
            tasks,
            events,
            costs,
            workers: Mutex::new(Some(workers)),
        })
    }
}

/// Routes queued work to the engine that owns it
struct EngineDispatcher {
    workflows: Arc<WorkflowEngine>,
    tasks: Arc<TaskQueue>,
}

#[async_trait]
impl WorkDispatcher for EngineDispatcher {
    async fn dispatch(&self, item: WorkItem) -> Result<()> {
        match item {
            WorkItem::Step(work) => self.workflows.dispatch_step(work).await,
            WorkItem::Task(id) => self.tasks.process_task(&id).await,
        }
    }
}

pub struct Platform {
    settings: Settings,
    registry: Arc<Registry>,
    selector: ModelSelector,
    executor: Arc<AgentExecutor>,
    workflows: Arc<WorkflowEngine>,
    tasks: Arc<TaskQueue>,
    events: EventBus,
    costs: Arc<CostTracker>,
    workers: Mutex<Option<WorkerPool>>,
}

impl Platform {
    pub fn builder(settings: Settings) -> PlatformBuilder {
        PlatformBuilder::new(settings)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn costs(&self) -> &CostTracker {
        &self.costs
    }

    // Agents

    pub async fn register_agent(&self, create: AgentCreate) -> Result<Agent> {
        self.registry.register_agent(create).await
    }

    pub async fn list_agents(&self, filter: &AgentFilter, page: &Pagination) -> Result<Vec<Agent>> {
        self.registry.list_agents(filter, page).await
    }

    pub async fn get_agent(&self, id: &AgentId) -> Result<Agent> {
        self.registry.get_agent(id).await
    }

    pub async fn update_agent(&self, id: &AgentId, update: AgentUpdate) -> Result<Agent> {
        self.registry.update_agent(id, update).await
    }

    /// Hard delete, refused while a workflow step is bound to the agent
    pub async fn delete_agent(&self, id: &AgentId) -> Result<()> {
        self.registry.delete_agent(id, self.workflows.as_ref()).await
    }

    pub async fn execute_agent(&self, request: AgentExecutionRequest) -> Result<ExecutionResult> {
        self.executor.execute(request).await
    }

    // Models

    pub async fn register_model(&self, create: ModelCreate) -> Result<Model> {
        self.registry.register_model(create).await
    }

    pub async fn list_models(&self, filter: &ModelFilter, page: &Pagination) -> Result<Vec<Model>> {
        self.registry.list_models(filter, page).await
    }

    pub async fn get_model(&self, id: &ModelId) -> Result<Model> {
        self.registry.get_model(id).await
    }

    pub async fn update_model(&self, id: &ModelId, update: ModelUpdate) -> Result<Model> {
        self.registry.update_model(id, update).await
    }

    pub async fn delete_model(&self, id: &ModelId) -> Result<()> {
        self.registry.delete_model(id).await
    }

    pub async fn validate_model_for_context(
        &self,
        id: &ModelId,
        context_size: Option<u32>,
    ) -> Result<ContextValidation> {
        self.selector.validate_model_for_context(id, context_size).await
    }

    pub async fn select_model(&self, criteria: &SelectionCriteria) -> Result<ModelSelection> {
        self.selector.select(criteria).await
    }

    // Workflows

    pub async fn create_workflow(&self, create: WorkflowCreate) -> Result<Workflow> {
        self.workflows.create_workflow(create).await
    }

    pub async fn list_workflows(
        &self,
        filter: &WorkflowFilter,
        page: &Pagination,
    ) -> Result<Vec<Workflow>> {
        self.workflows.list_workflows(filter, page).await
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Workflow> {
        self.workflows.get_workflow(id).await
    }

    pub async fn update_workflow(&self, id: &str, update: WorkflowUpdate) -> Result<Workflow> {
        self.workflows.update_workflow(id, update).await
    }

    pub async fn delete_workflow(&self, id: &str) -> Result<()> {
        self.workflows.delete_workflow(id).await
    }

    // Executions

    pub async fn start_execution(
        &self,
        workflow_id: &str,
        create: ExecutionCreate,
    ) -> Result<WorkflowExecution> {
        self.workflows.start_execution(workflow_id, create).await
    }

    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        page: &Pagination,
    ) -> Result<Vec<WorkflowExecution>> {
        self.workflows.list_executions(filter, page).await
    }

    pub async fn get_execution(&self, id: &Uuid) -> Result<WorkflowExecution> {
        self.workflows.get_execution(id).await
    }

    pub async fn cancel_execution(&self, id: &Uuid) -> Result<WorkflowExecution> {
        self.workflows.cancel_execution(id).await
    }

    pub async fn resolve_human_step(
        &self,
        execution_id: &Uuid,
        step_id: &str,
        decision: HumanDecision,
    ) -> Result<WorkflowExecution> {
        self.workflows
            .resolve_human_step(execution_id, step_id, decision)
            .await
    }

    /// Wait until the execution is terminal or parked on human steps
    pub async fn wait_for_execution(
        &self,
        id: &Uuid,
        timeout: Duration,
    ) -> Result<WorkflowExecution> {
        self.workflows.wait_for_execution(id, timeout).await
    }

    // Tasks

    pub async fn create_task(&self, create: TaskCreate) -> Result<Task> {
        self.tasks.create_task(create).await
    }

    pub async fn get_task(&self, id: &Uuid) -> Result<Task> {
        self.tasks.get_task(id).await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter, page: &Pagination) -> Result<Vec<Task>> {
        self.tasks.list_tasks(filter, page).await
    }

    pub async fn update_task(&self, id: &Uuid, update: TaskUpdate) -> Result<Task> {
        self.tasks.update_task(id, update).await
    }

    pub async fn delete_task(&self, id: &Uuid) -> Result<()> {
        self.tasks.delete_task(id).await
    }

    // Events and lifecycle

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub async fn stats(&self) -> Result<PlatformStats> {
        let (agents, models) = self.registry.count().await?;
        let counts = self.workflows.execution_counts().await?;
        let count_of = |status: ExecutionStatus| {
            counts
                .iter()
                .find(|(s, _)| *s == status)
                .map_or(0, |(_, n)| *n)
        };

        Ok(PlatformStats {
            agents,
            models,
            workflows: self.workflows.workflow_count().await?,
            executions_pending: count_of(ExecutionStatus::Pending),
            executions_in_progress: count_of(ExecutionStatus::InProgress),
            executions_completed: count_of(ExecutionStatus::Completed),
            executions_failed: count_of(ExecutionStatus::Failed),
            tasks: self.tasks.task_count().await?,
            spent_today: self.costs.spent_today(),
            daily_limit: self.costs.daily_limit(),
        })
    }

    /// Stop the worker pool; later calls do nothing
    pub async fn shutdown(&self) {
        let workers = self.workers.lock().await.take();
        if let Some(workers) = workers {
            info!("Platform shutting down");
            workers.shutdown().await;
        }
    }
}
