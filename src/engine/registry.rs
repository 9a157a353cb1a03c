//! Agent and model catalog
//!
//! The registry validates payloads, assigns identities and enforces the
//! references it can see on its own: an agent's default model must exist, and
//! a model cannot be deleted while an agent uses it as its default. Every
//! mutation runs through the store's per-record path, so concurrent writers of
//! one record are serialized and writers of different records are not.
//!
//! ## Reference gates
//!
//! A reference check and the write it protects are two store calls. To keep a
//! delete from slipping between them, every path that creates a reference to
//! an agent or a model holds that record's [`ReferenceGate`] shared while it
//! checks and writes, and deleting the record holds it exclusively while it
//! checks and removes.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{info, warn};

use super::storage::RegistryStorage;
use crate::models::query::{DEFAULT_LIMIT, MAX_LIMIT};
use crate::models::{
    Agent, AgentCreate, AgentFilter, AgentId, AgentUpdate, Model, ModelCreate, ModelFilter,
    ModelId, ModelUpdate, Pagination,
};
use crate::{MachineError, Result};

/// Records outside the registry that bind agents
#[async_trait]
pub trait AgentReferences: Send + Sync {
    /// Describe one record bound to `agent_id`, if any
    async fn first_reference(&self, agent_id: &AgentId) -> Result<Option<String>>;
}

/// Read/write locks keyed by record id
///
/// A lock exists only while someone holds or waits for it.
#[derive(Default)]
pub struct ReferenceGate {
    locks: DashMap<String, Arc<RwLock<()>>>,
}

/// Held gate locks; released on drop
pub struct GateHold<'a> {
    gate: &'a ReferenceGate,
    ids: Vec<String>,
    shared: Vec<OwnedRwLockReadGuard<()>>,
    exclusive: Option<OwnedRwLockWriteGuard<()>>,
}

impl ReferenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Hold every id shared; ids are locked in sorted order
    pub async fn share<I, S>(&self, ids: I) -> GateHold<'_>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ids: Vec<String> = ids.into_iter().map(|id| id.as_ref().to_string()).collect();
        ids.sort();
        ids.dedup();

        let mut shared = Vec::with_capacity(ids.len());
        for id in &ids {
            shared.push(self.lock_for(id).read_owned().await);
        }
        GateHold {
            gate: self,
            ids,
            shared,
            exclusive: None,
        }
    }

    /// Hold one id exclusively
    pub async fn exclusive(&self, id: &str) -> GateHold<'_> {
        let guard = self.lock_for(id).write_owned().await;
        GateHold {
            gate: self,
            ids: vec![id.to_string()],
            shared: Vec::new(),
            exclusive: Some(guard),
        }
    }

    /// Ids with a live lock
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for GateHold<'_> {
    fn drop(&mut self) {
        self.shared.clear();
        self.exclusive.take();
        for id in &self.ids {
            // Cloning happens under the shard lock, so a count of one means
            // nobody else holds or waits for this id
            self.gate
                .locks
                .remove_if(id.as_str(), |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

pub struct Registry {
    storage: Arc<dyn RegistryStorage>,
    agent_refs: ReferenceGate,
    model_refs: ReferenceGate,
}

impl Registry {
    pub fn new(storage: Arc<dyn RegistryStorage>) -> Self {
        Self {
            storage,
            agent_refs: ReferenceGate::new(),
            model_refs: ReferenceGate::new(),
        }
    }

    /// Hold agents shared while a reference to them is checked and written
    pub async fn hold_agents<'a, I>(&self, ids: I) -> GateHold<'_>
    where
        I: IntoIterator<Item = &'a AgentId>,
    {
        self.agent_refs.share(ids.into_iter().map(AgentId::as_str)).await
    }

    // Models

    pub async fn register_model(&self, create: ModelCreate) -> Result<Model> {
        create.validate()?;
        let model = Model::from_create(ModelId::generate(), create);
        let model = self.storage.insert_model(model).await?;
        info!(model_id = %model.id, name = %model.name, provider = %model.provider, "Model registered");
        Ok(model)
    }

    pub async fn get_model(&self, id: &ModelId) -> Result<Model> {
        self.storage
            .get_model(id)
            .await?
            .ok_or_else(|| MachineError::not_found("Model", id))
    }

    /// Models matching `filter`, sorted by name then id
    pub async fn list_models(&self, filter: &ModelFilter, page: &Pagination) -> Result<Vec<Model>> {
        let mut models: Vec<Model> = self
            .storage
            .list_models()
            .await?
            .into_iter()
            .filter(|m| filter.matches(m))
            .collect();
        models.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        page.apply(models, DEFAULT_LIMIT, MAX_LIMIT)
    }

    /// Whole catalog, unpaginated, in id order
    pub async fn all_models(&self) -> Result<Vec<Model>> {
        let mut models = self.storage.list_models().await?;
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }

    pub async fn update_model(&self, id: &ModelId, update: ModelUpdate) -> Result<Model> {
        update.validate()?;
        let model = self
            .storage
            .update_model(id, &mut |model| {
                update.apply(model);
                Ok(())
            })
            .await?
            .ok_or_else(|| MachineError::not_found("Model", id))?;
        info!(model_id = %id, "Model updated");
        Ok(model)
    }

    pub async fn delete_model(&self, id: &ModelId) -> Result<()> {
        let _gate = self.model_refs.exclusive(id.as_str()).await;
        self.get_model(id).await?;

        if let Some(agent) = self
            .storage
            .list_agents()
            .await?
            .into_iter()
            .find(|a| &a.default_model_id == id)
        {
            return Err(MachineError::InUse {
                entity: "Model",
                id: id.to_string(),
                referenced_by: format!("agent {}", agent.id),
            });
        }

        self.storage
            .remove_model(id)
            .await?
            .ok_or_else(|| MachineError::not_found("Model", id))?;
        info!(model_id = %id, "Model deleted");
        Ok(())
    }

    // Agents

    pub async fn register_agent(&self, create: AgentCreate) -> Result<Agent> {
        create.validate()?;
        let _gate = self.model_refs.share([create.default_model_id.as_str()]).await;
        let model = self.get_model(&create.default_model_id).await?;

        let agent = Agent::from_create(AgentId::generate(), create);
        warn_on_capability_gap(&agent, &model);

        let agent = self.storage.insert_agent(agent).await?;
        info!(agent_id = %agent.id, name = %agent.name, agent_type = %agent.agent_type, "Agent registered");
        Ok(agent)
    }

    pub async fn get_agent(&self, id: &AgentId) -> Result<Agent> {
        self.storage
            .get_agent(id)
            .await?
            .ok_or_else(|| MachineError::not_found("Agent", id))
    }

    /// Agents matching `filter`, sorted by name then id
    pub async fn list_agents(&self, filter: &AgentFilter, page: &Pagination) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = self
            .storage
            .list_agents()
            .await?
            .into_iter()
            .filter(|a| filter.matches(a))
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        page.apply(agents, DEFAULT_LIMIT, MAX_LIMIT)
    }

    pub async fn update_agent(&self, id: &AgentId, update: AgentUpdate) -> Result<Agent> {
        update.validate()?;
        let _gate = self
            .model_refs
            .share(update.default_model_id.iter().map(ModelId::as_str))
            .await;
        if let Some(model_id) = &update.default_model_id {
            self.get_model(model_id).await?;
        }

        let agent = self
            .storage
            .update_agent(id, &mut |agent| {
                update.apply(agent);
                Ok(())
            })
            .await?
            .ok_or_else(|| MachineError::not_found("Agent", id))?;

        if update.capabilities.is_some() || update.default_model_id.is_some() {
            if let Ok(model) = self.get_model(&agent.default_model_id).await {
                warn_on_capability_gap(&agent, &model);
            }
        }

        info!(agent_id = %id, "Agent updated");
        Ok(agent)
    }

    /// Hard delete, refused while `references` still binds the agent
    pub async fn delete_agent(&self, id: &AgentId, references: &dyn AgentReferences) -> Result<()> {
        let _gate = self.agent_refs.exclusive(id.as_str()).await;
        self.get_agent(id).await?;

        if let Some(referenced_by) = references.first_reference(id).await? {
            return Err(MachineError::InUse {
                entity: "Agent",
                id: id.to_string(),
                referenced_by,
            });
        }

        self.storage
            .remove_agent(id)
            .await?
            .ok_or_else(|| MachineError::not_found("Agent", id))?;
        info!(agent_id = %id, "Agent deleted");
        Ok(())
    }

    pub async fn count(&self) -> Result<(usize, usize)> {
        Ok((
            self.storage.list_agents().await?.len(),
            self.storage.list_models().await?.len(),
        ))
    }
}

fn warn_on_capability_gap(agent: &Agent, model: &Model) {
    let missing = model.missing_capabilities(&agent.required_model_capabilities());
    if !missing.is_empty() {
        warn!(
            agent_id = %agent.id,
            model_id = %model.id,
            ?missing,
            "Default model lacks capabilities the agent needs; executions will need a model override"
        );
    }
}
