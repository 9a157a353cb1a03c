// Storage abstraction for the orchestration engine
// Defines the interfaces for persisting catalog, workflow and task records

//! # Storage Abstraction Layer
//!
//! Components never own ambient global maps. Each one receives the store it
//! works against, so the storage lifecycle is the lifecycle of the platform
//! that built it.
//!
//! ## Storage Architecture
//!
//! The storage layer follows the **Repository Pattern**:
//! - **RegistryStorage**: agents and models
//! - **WorkflowStorage**: workflow definitions and executions
//! - **TaskStorage**: standalone tasks
//! - **InMemoryStorage**: `DashMap`-backed implementation of all three
//!
//! ## Per-record mutation
//!
//! Updates go through a mutation closure rather than a read-modify-write pair
//! of calls. The store runs the closure while it holds the record exclusively,
//! so two writers of the same record are serialized while writers of
//! different records proceed independently. The closure works on a draft:
//! when it returns an error the stored record is left untouched.
//!
//! ## Rust Learning Notes:
//!
//! ### `dyn FnMut` across an async trait
//! The mutation is passed as `&mut dyn FnMut(&mut T) -> Result<()> + Send`.
//! `FnMut` lets callers capture `&mut` locals to carry values out of the
//! critical section (for example "did this step complete the execution?"),
//! and `Send` keeps the future produced by `async_trait` sendable.

use dashmap::DashMap;
use uuid::Uuid;

use crate::models::{Agent, AgentId, Model, ModelId, Task, Workflow, WorkflowExecution};
use crate::{MachineError, Result};

/// Mutation applied to a single record inside the store's critical section
pub type Mutation<'a, T> = &'a mut (dyn FnMut(&mut T) -> Result<()> + Send);

/// Agent and model records
///
/// `update_*` and `remove_*` return `Ok(None)` when the record does not exist;
/// turning that into `NotFound` is the caller's job.
#[async_trait::async_trait]
pub trait RegistryStorage: Send + Sync {
    async fn insert_agent(&self, agent: Agent) -> Result<Agent>;
    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>>;
    async fn list_agents(&self) -> Result<Vec<Agent>>;
    async fn update_agent(&self, id: &AgentId, mutation: Mutation<'_, Agent>)
        -> Result<Option<Agent>>;
    async fn remove_agent(&self, id: &AgentId) -> Result<Option<Agent>>;

    async fn insert_model(&self, model: Model) -> Result<Model>;
    async fn get_model(&self, id: &ModelId) -> Result<Option<Model>>;
    async fn list_models(&self) -> Result<Vec<Model>>;
    async fn update_model(&self, id: &ModelId, mutation: Mutation<'_, Model>)
        -> Result<Option<Model>>;
    async fn remove_model(&self, id: &ModelId) -> Result<Option<Model>>;
}

/// Workflow definitions and their executions
#[async_trait::async_trait]
pub trait WorkflowStorage: Send + Sync {
    async fn insert_workflow(&self, workflow: Workflow) -> Result<Workflow>;
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>>;
    async fn list_workflows(&self) -> Result<Vec<Workflow>>;
    async fn update_workflow(
        &self,
        id: &str,
        mutation: Mutation<'_, Workflow>,
    ) -> Result<Option<Workflow>>;
    async fn remove_workflow(&self, id: &str) -> Result<Option<Workflow>>;

    async fn insert_execution(&self, execution: WorkflowExecution) -> Result<WorkflowExecution>;
    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>>;
    /// Executions, optionally restricted to one workflow
    async fn list_executions(&self, workflow_id: Option<&str>) -> Result<Vec<WorkflowExecution>>;
    async fn update_execution(
        &self,
        id: &Uuid,
        mutation: Mutation<'_, WorkflowExecution>,
    ) -> Result<Option<WorkflowExecution>>;
}

/// Standalone tasks
#[async_trait::async_trait]
pub trait TaskStorage: Send + Sync {
    async fn insert_task(&self, task: Task) -> Result<Task>;
    async fn get_task(&self, id: &Uuid) -> Result<Option<Task>>;
    async fn list_tasks(&self) -> Result<Vec<Task>>;
    async fn update_task(&self, id: &Uuid, mutation: Mutation<'_, Task>) -> Result<Option<Task>>;
    async fn remove_task(&self, id: &Uuid) -> Result<Option<Task>>;
}

/// In-memory storage for development and testing
///
/// `DashMap` shards its locks, so a mutation holds only the shard of the
/// record it touches.
#[derive(Default)]
pub struct InMemoryStorage {
    agents: DashMap<AgentId, Agent>,
    models: DashMap<ModelId, Model>,
    workflows: DashMap<String, Workflow>,
    executions: DashMap<Uuid, WorkflowExecution>,
    tasks: DashMap<Uuid, Task>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn insert_new<K, V>(map: &DashMap<K, V>, key: K, value: V, entity: &str) -> Result<V>
where
    K: std::hash::Hash + Eq + std::fmt::Display,
    V: Clone,
{
    match map.entry(key) {
        dashmap::mapref::entry::Entry::Occupied(entry) => Err(MachineError::Internal(format!(
            "{} {} already exists",
            entity,
            entry.key()
        ))),
        dashmap::mapref::entry::Entry::Vacant(entry) => {
            entry.insert(value.clone());
            Ok(value)
        }
    }
}

fn mutate<K, V, Q>(map: &DashMap<K, V>, key: &Q, mutation: Mutation<'_, V>) -> Result<Option<V>>
where
    K: std::hash::Hash + Eq + std::borrow::Borrow<Q>,
    Q: std::hash::Hash + Eq + ?Sized,
    V: Clone,
{
    match map.get_mut(key) {
        Some(mut entry) => {
            let mut draft = entry.value().clone();
            mutation(&mut draft)?;
            *entry.value_mut() = draft.clone();
            Ok(Some(draft))
        }
        None => Ok(None),
    }
}

#[async_trait::async_trait]
impl RegistryStorage for InMemoryStorage {
    async fn insert_agent(&self, agent: Agent) -> Result<Agent> {
        insert_new(&self.agents, agent.id.clone(), agent, "Agent")
    }

    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>> {
        Ok(self.agents.get(id).map(|a| a.value().clone()))
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        Ok(self.agents.iter().map(|a| a.value().clone()).collect())
    }

    async fn update_agent(
        &self,
        id: &AgentId,
        mutation: Mutation<'_, Agent>,
    ) -> Result<Option<Agent>> {
        mutate(&self.agents, id, mutation)
    }

    async fn remove_agent(&self, id: &AgentId) -> Result<Option<Agent>> {
        Ok(self.agents.remove(id).map(|(_, agent)| agent))
    }

    async fn insert_model(&self, model: Model) -> Result<Model> {
        insert_new(&self.models, model.id.clone(), model, "Model")
    }

    async fn get_model(&self, id: &ModelId) -> Result<Option<Model>> {
        Ok(self.models.get(id).map(|m| m.value().clone()))
    }

    async fn list_models(&self) -> Result<Vec<Model>> {
        Ok(self.models.iter().map(|m| m.value().clone()).collect())
    }

    async fn update_model(
        &self,
        id: &ModelId,
        mutation: Mutation<'_, Model>,
    ) -> Result<Option<Model>> {
        mutate(&self.models, id, mutation)
    }

    async fn remove_model(&self, id: &ModelId) -> Result<Option<Model>> {
        Ok(self.models.remove(id).map(|(_, model)| model))
    }
}

#[async_trait::async_trait]
impl WorkflowStorage for InMemoryStorage {
    async fn insert_workflow(&self, workflow: Workflow) -> Result<Workflow> {
        insert_new(&self.workflows, workflow.id.clone(), workflow, "Workflow")
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        Ok(self.workflows.get(id).map(|w| w.value().clone()))
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        Ok(self.workflows.iter().map(|w| w.value().clone()).collect())
    }

    async fn update_workflow(
        &self,
        id: &str,
        mutation: Mutation<'_, Workflow>,
    ) -> Result<Option<Workflow>> {
        mutate(&self.workflows, id, mutation)
    }

    async fn remove_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        Ok(self.workflows.remove(id).map(|(_, workflow)| workflow))
    }

    async fn insert_execution(&self, execution: WorkflowExecution) -> Result<WorkflowExecution> {
        insert_new(&self.executions, execution.id, execution, "Execution")
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>> {
        Ok(self.executions.get(id).map(|e| e.value().clone()))
    }

    async fn list_executions(&self, workflow_id: Option<&str>) -> Result<Vec<WorkflowExecution>> {
        Ok(self
            .executions
            .iter()
            .filter(|e| workflow_id.map_or(true, |wid| e.workflow_id == wid))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn update_execution(
        &self,
        id: &Uuid,
        mutation: Mutation<'_, WorkflowExecution>,
    ) -> Result<Option<WorkflowExecution>> {
        mutate(&self.executions, id, mutation)
    }
}

#[async_trait::async_trait]
impl TaskStorage for InMemoryStorage {
    async fn insert_task(&self, task: Task) -> Result<Task> {
        insert_new(&self.tasks, task.id, task, "Task")
    }

    async fn get_task(&self, id: &Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.get(id).map(|t| t.value().clone()))
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.iter().map(|t| t.value().clone()).collect())
    }

    async fn update_task(&self, id: &Uuid, mutation: Mutation<'_, Task>) -> Result<Option<Task>> {
        mutate(&self.tasks, id, mutation)
    }

    async fn remove_task(&self, id: &Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.remove(id).map(|(_, task)| task))
    }
}
