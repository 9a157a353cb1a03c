// Orchestration engine
// Catalog, model selection, agent execution, workflows and tasks

//! # Engine Module
//!
//! This module contains the components that do the work of the orchestration
//! core. The domain models (in `models/`) are plain records; everything that
//! reads or changes them at runtime lives here.
//!
//! ## Architecture Overview
//!
//! ```text
//!            ┌──────────┐      ┌───────────────┐
//!            │ Registry │◄─────│ ModelSelector │
//!            └────▲─────┘      └───────────────┘
//!                 │
//!         ┌───────┴───────┐
//!         │ AgentExecutor │──► ModelBackend (llm)
//!         └───▲───────▲───┘
//!             │       │
//!  ┌──────────┴───┐ ┌─┴─────────┐
//!  │WorkflowEngine│ │ TaskQueue │
//!  └──────▲───────┘ └────▲──────┘
//!         └──── WorkerPool ◄── WorkQueue
//! ```
//!
//! Components receive their stores and collaborators explicitly; nothing here
//! is a global. The `Platform` builds the graph once and tears it down on
//! shutdown.
//!
//! ## Rust Learning Notes:
//!
//! ### Traits at the seams
//! Storage (`RegistryStorage`, `WorkflowStorage`, `TaskStorage`), model
//! invocation (`ModelBackend`), condition evaluation (`StepEvaluator`) and work
//! dispatch (`WorkDispatcher`) are traits held as `Arc<dyn Trait>`, so tests
//! and deployments swap implementations without touching the engine.

/// Storage abstraction layer
///
/// Contains:
/// - Storage traits with per-record mutation
/// - `DashMap`-backed in-memory implementation
pub mod storage;

/// Agent and model catalog
pub mod registry;

/// Capability, context and cost driven model choice
pub mod selector;

/// Single agent invocation with cost accounting
pub mod executor;

/// Condition and loop decisions for workflow steps
///
/// Contains:
/// - `StepEvaluator` trait
/// - `RuleEvaluator`, the JSON rule based default
pub mod evaluator;

/// Event system for engine state changes
pub mod events;

/// Work queue and worker pool
pub mod scheduler;

/// Workflow definitions, executions and step advancement
pub mod workflow;

/// Standalone task lifecycle
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
mod tests;

pub use evaluator::{EvaluationContext, LoopDecision, RuleEvaluator, StepEvaluator};
pub use events::{EngineEvent, EventBus};
pub use executor::{AgentExecutionRequest, AgentExecutor, ExecutionResult};
pub use registry::{AgentReferences, GateHold, ReferenceGate, Registry};
pub use scheduler::{StepWork, WorkDispatcher, WorkItem, WorkQueue, WorkReceiver, WorkerPool};
pub use selector::{
    ContextValidation, ModelSelection, ModelSelector, RankedModel, RejectedModel,
    RejectionReason, SelectionCriteria,
};
pub use storage::{InMemoryStorage, RegistryStorage, TaskStorage, WorkflowStorage};
pub use tasks::TaskQueue;
pub use workflow::{EngineConfig, HumanDecision, WorkflowEngine};
