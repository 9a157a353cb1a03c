//! Shared fixtures for engine tests

use std::sync::Arc;

use super::evaluator::{RuleEvaluator, StepEvaluator};
use super::events::EventBus;
use super::executor::AgentExecutor;
use super::registry::Registry;
use super::scheduler::{channel, WorkItem, WorkReceiver};
use super::storage::InMemoryStorage;
use super::tasks::TaskQueue;
use super::workflow::{EngineConfig, WorkflowEngine};
use crate::llm::{CostTracker, SimulatedBackend};
use crate::models::{
    Agent, AgentCapability, AgentCreate, AgentType, Model, ModelCapability, ModelCreate, ModelId,
    ModelProvider,
};

pub(crate) fn model_create(name: &str, prompt_rate: f64, completion_rate: f64) -> ModelCreate {
    ModelCreate {
        name: name.to_string(),
        provider: ModelProvider::OpenAI,
        provider_model_id: name.to_lowercase().replace(' ', "-"),
        capabilities: vec![
            ModelCapability::Text,
            ModelCapability::Code,
            ModelCapability::Reasoning,
        ],
        context_window: 128000,
        cost_per_prompt_token: prompt_rate,
        cost_per_completion_token: completion_rate,
        max_tokens: Some(4096),
        description: None,
        metadata: None,
    }
}

pub(crate) fn agent_create(name: &str, model_id: &ModelId) -> AgentCreate {
    AgentCreate {
        name: name.to_string(),
        agent_type: AgentType::Code,
        description: format!("{} for tests", name),
        capabilities: vec![AgentCapability::CodeGeneration],
        default_model_id: model_id.clone(),
        prompt_template: "Complete the following task: {{task}}".to_string(),
        parameters: None,
        metadata: None,
    }
}

/// Engine components wired together, with the work queue drained by hand
pub(crate) struct Harness {
    pub registry: Arc<Registry>,
    pub engine: WorkflowEngine,
    pub tasks: TaskQueue,
    pub backend: Arc<SimulatedBackend>,
    pub costs: Arc<CostTracker>,
    pub events: EventBus,
    receiver: WorkReceiver,
}

impl Harness {
    pub fn new(backend: SimulatedBackend) -> Self {
        Self::with_parts(backend, EngineConfig::default(), Arc::new(RuleEvaluator::new()))
    }

    pub fn with_config(backend: SimulatedBackend, config: EngineConfig) -> Self {
        Self::with_parts(backend, config, Arc::new(RuleEvaluator::new()))
    }

    pub fn with_parts(
        backend: SimulatedBackend,
        config: EngineConfig,
        evaluator: Arc<dyn StepEvaluator>,
    ) -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        let registry = Arc::new(Registry::new(storage.clone()));
        let backend = Arc::new(backend);
        let costs = Arc::new(CostTracker::new(None));
        let events = EventBus::default();
        let executor = Arc::new(
            AgentExecutor::new(registry.clone(), backend.clone(), costs.clone())
                .with_events(events.clone()),
        );
        let (queue, receiver) = channel();
        let engine = WorkflowEngine::new(
            storage.clone(),
            registry.clone(),
            executor.clone(),
            evaluator,
            queue.clone(),
            events.clone(),
            config,
        );
        let tasks = TaskQueue::new(storage, registry.clone(), executor, queue, events.clone());

        Self {
            registry,
            engine,
            tasks,
            backend,
            costs,
            events,
            receiver,
        }
    }

    /// Register a model with the given rates and a code agent bound to it
    pub async fn agent(&self, name: &str, prompt_rate: f64, completion_rate: f64) -> (Model, Agent) {
        let model = self
            .registry
            .register_model(model_create(&format!("{} model", name), prompt_rate, completion_rate))
            .await
            .unwrap();
        let agent = self
            .registry
            .register_agent(agent_create(name, &model.id))
            .await
            .unwrap();
        (model, agent)
    }

    /// Process queued work until the queue is empty; returns the items run
    pub async fn drain(&mut self) -> usize {
        let mut processed = 0;
        while let Some(item) = self.receiver.try_recv() {
            match item {
                WorkItem::Step(work) => {
                    let _ = self.engine.dispatch_step(work).await;
                }
                WorkItem::Task(id) => {
                    let _ = self.tasks.process_task(&id).await;
                }
            }
            processed += 1;
            assert!(processed < 10_000, "work queue does not drain");
        }
        processed
    }

    /// Take the next queued item without running it
    pub fn next_item(&mut self) -> Option<WorkItem> {
        self.receiver.try_recv()
    }
}
