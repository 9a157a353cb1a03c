// Event bus for engine state changes

//! # Event System
//!
//! The engine publishes an [`EngineEvent`] at every execution, step and task
//! state change. Subscribers get a `tokio::sync::broadcast` receiver; nothing
//! in the engine waits for them, and a slow subscriber only lags itself.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::models::{AgentId, ModelId, StepType, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    ExecutionStarted {
        execution_id: Uuid,
        workflow_id: String,
    },
    StepStarted {
        execution_id: Uuid,
        step_id: String,
        step_type: StepType,
    },
    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        cost: f64,
    },
    StepAwaitingSignal {
        execution_id: Uuid,
        step_id: String,
    },
    ExecutionCompleted {
        execution_id: Uuid,
        cost: f64,
    },
    ExecutionFailed {
        execution_id: Uuid,
        error: String,
    },
    ExecutionCancelled {
        execution_id: Uuid,
    },
    AgentExecuted {
        agent_id: AgentId,
        model_id: ModelId,
        cost: f64,
    },
    TaskStatusChanged {
        task_id: Uuid,
        status: TaskStatus,
    },
}

impl EngineEvent {
    pub fn execution_id(&self) -> Option<Uuid> {
        match self {
            EngineEvent::ExecutionStarted { execution_id, .. }
            | EngineEvent::StepStarted { execution_id, .. }
            | EngineEvent::StepCompleted { execution_id, .. }
            | EngineEvent::StepAwaitingSignal { execution_id, .. }
            | EngineEvent::ExecutionCompleted { execution_id, .. }
            | EngineEvent::ExecutionFailed { execution_id, .. }
            | EngineEvent::ExecutionCancelled { execution_id } => Some(*execution_id),
            EngineEvent::AgentExecuted { .. } | EngineEvent::TaskStatusChanged { .. } => None,
        }
    }

    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            EngineEvent::TaskStatusChanged { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }
}

/// Event bus for publishing and subscribing to engine events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: EngineEvent) {
        trace!(?event, "Event published");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
