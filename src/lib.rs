// TheMachine - orchestration core
// Agents, models, step-graph workflows and cost accounting for AI tasks

//! # TheMachine Library
//!
//! This is the library crate for TheMachine's orchestration core. Clients submit
//! tasks, the platform routes them through **agents** (prompt/model bindings) and
//! multi-step **workflows**, and tracks cost and status until completion.
//!
//! ## Core Components
//!
//! ### Domain Models (`models`)
//! - [`Agent`] / [`Model`]: catalog entries owned by the registry
//! - [`Workflow`] / [`WorkflowStep`]: step graphs with one entry step
//! - [`WorkflowExecution`]: one run of a workflow against input data
//! - [`Task`]: a standalone unit of work, optionally bound to an agent
//!
//! ### Engine (`engine`)
//! - [`Registry`]: agents and models, fine-grained per-record locking
//! - [`ModelSelector`]: capability/context/cost driven model choice
//! - [`AgentExecutor`]: resolves the model, merges parameters, accounts cost
//! - [`WorkflowEngine`]: the execution state machine
//! - [`TaskQueue`]: lifecycle of standalone tasks
//! - [`WorkerPool`]: asynchronous processing of queued work items
//!
//! ### Model Backends (`llm`)
//! The engine never talks to a provider directly. It calls a [`ModelBackend`],
//! which returns text and token counts; cost is computed from the model's rates.
//!
//! ### Platform
//! [`Platform`] wires everything together with an explicit lifecycle and exposes
//! the operations a transport layer calls.
//!
//! ## Usage Example
//!
//! ```no_run
//! use themachine::{Platform, Settings};
//!
//! # async fn run() -> themachine::Result<()> {
//! let platform = Platform::builder(Settings::default()).build()?;
//! themachine::seed::seed_catalog(&platform).await?;
//! let models = platform
//!     .list_models(&Default::default(), &Default::default())
//!     .await?;
//! println!("{} models registered", models.len());
//! platform.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod llm;
pub mod models;
pub mod platform;
pub mod seed;
pub mod settings;

pub use settings::Settings;

pub use models::{
    Agent, AgentCapability, AgentCreate, AgentId, AgentType, AgentUpdate, ExecutionCreate,
    ExecutionStatus, Model, ModelCapability, ModelCreate, ModelId, ModelProvider, ModelUpdate,
    Parameters, StepType, Task, TaskCreate, TaskPriority, TaskStatus, TaskUpdate, Workflow,
    WorkflowCreate, WorkflowExecution, WorkflowStep, WorkflowType, WorkflowUpdate,
};

pub use engine::{
    AgentExecutor, EngineEvent, EventBus, HumanDecision, ModelSelector, Registry, RuleEvaluator,
    SelectionCriteria, StepEvaluator, TaskQueue, WorkQueue, WorkerPool, WorkflowEngine,
};

pub use llm::{BackendError, ModelBackend, TokenUsage};

pub use platform::{Platform, PlatformBuilder};

use thiserror::Error;

/// Errors surfaced by the orchestration core
///
/// None of these are fatal to the process. Each one concerns a single request,
/// execution or task; workers keep running after any of them.
#[derive(Error, Debug)]
pub enum MachineError {
    /// A referenced agent, model, workflow, execution or task does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Malformed create/update payload
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Operation attempted against a deactivated agent, model or workflow
    #[error("{entity} is not active: {id}")]
    InactiveEntity { entity: &'static str, id: String },

    /// No model satisfies the capability requirements
    #[error("No eligible model: {0}")]
    NoEligibleModel(String),

    /// Requested context does not fit the model's window
    #[error("Context size {required} exceeds context window {available} of model {model_id}")]
    ContextWindowExceeded {
        model_id: String,
        required: u32,
        available: u32,
    },

    /// Illegal lifecycle change, e.g. cancelling a finished execution
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Hard deletion refused because live records still reference the entity
    #[error("{entity} {id} is still referenced by {referenced_by}")]
    InUse {
        entity: &'static str,
        id: String,
        referenced_by: String,
    },

    /// Daily cost limit reached
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The model-invocation backend failed
    #[error("Upstream execution failed: {0}")]
    UpstreamExecutionFailure(String),

    /// Settings could not be loaded or are invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MachineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        MachineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn inactive(entity: &'static str, id: impl ToString) -> Self {
        MachineError::InactiveEntity {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        MachineError::Validation(message.into())
    }
}

impl From<config::ConfigError> for MachineError {
    fn from(err: config::ConfigError) -> Self {
        MachineError::Configuration(err.to_string())
    }
}

/// Type alias for Results that use the crate error type
pub type Result<T> = std::result::Result<T, MachineError>;
