//! Standalone task lifecycle
//!
//! ```text
//! pending -> in_progress -> verifying -> completed
//!    \____________\______________\_____-> failed
//! ```
//!
//! Creating a task is synchronous. A task bound to an agent is also queued, and
//! a worker later runs the agent against the task text and walks the task
//! through the lifecycle. The worker re-reads the status inside every mutation
//! and leaves a task alone once it has reached a terminal status by any other
//! route.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::{EngineEvent, EventBus};
use super::executor::{AgentExecutionRequest, AgentExecutor, ExecutionResult};
use super::registry::Registry;
use super::scheduler::{WorkItem, WorkQueue};
use super::storage::TaskStorage;
use crate::models::query::{DEFAULT_TASK_LIMIT, MAX_TASK_LIMIT};
use crate::models::{Pagination, Parameters, Task, TaskCreate, TaskFilter, TaskStatus, TaskUpdate};
use crate::{MachineError, Result};

pub struct TaskQueue {
    storage: Arc<dyn TaskStorage>,
    registry: Arc<Registry>,
    executor: Arc<AgentExecutor>,
    queue: WorkQueue,
    events: EventBus,
}

impl TaskQueue {
    pub fn new(
        storage: Arc<dyn TaskStorage>,
        registry: Arc<Registry>,
        executor: Arc<AgentExecutor>,
        queue: WorkQueue,
        events: EventBus,
    ) -> Self {
        Self {
            storage,
            registry,
            executor,
            queue,
            events,
        }
    }

    pub async fn create_task(&self, create: TaskCreate) -> Result<Task> {
        create.validate()?;
        if let Some(agent_id) = &create.agent_id {
            self.registry.get_agent(agent_id).await?;
        }
        if let Some(model_id) = &create.model_id {
            self.registry.get_model(model_id).await?;
        }

        let task = self.storage.insert_task(Task::from_create(create)).await?;
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            agent_id = ?task.agent_id,
            "Task created"
        );

        if task.agent_id.is_some() {
            if let Err(e) = self.queue.enqueue(WorkItem::Task(task.id)) {
                self.fail_task(&task.id, &e.to_string()).await?;
                return Err(e);
            }
        }
        Ok(task)
    }

    pub async fn get_task(&self, id: &Uuid) -> Result<Task> {
        self.storage
            .get_task(id)
            .await?
            .ok_or_else(|| MachineError::not_found("Task", id))
    }

    /// Tasks matching `filter`, newest first
    pub async fn list_tasks(&self, filter: &TaskFilter, page: &Pagination) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .storage
            .list_tasks()
            .await?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        page.apply(tasks, DEFAULT_TASK_LIMIT, MAX_TASK_LIMIT)
    }

    pub async fn update_task(&self, id: &Uuid, update: TaskUpdate) -> Result<Task> {
        update.validate()?;
        let mut previous = None;
        let task = self
            .storage
            .update_task(id, &mut |task| {
                previous = Some(task.status);
                update.apply(task);
                Ok(())
            })
            .await?
            .ok_or_else(|| MachineError::not_found("Task", id))?;

        if previous != Some(task.status) {
            self.status_changed(&task);
        }
        debug!(task_id = %id, "Task updated");
        Ok(task)
    }

    pub async fn task_count(&self) -> Result<usize> {
        Ok(self.storage.list_tasks().await?.len())
    }

    pub async fn delete_task(&self, id: &Uuid) -> Result<()> {
        self.storage
            .remove_task(id)
            .await?
            .ok_or_else(|| MachineError::not_found("Task", id))?;
        info!(task_id = %id, "Task deleted");
        Ok(())
    }

    /// Run a queued task through its bound agent
    pub async fn process_task(&self, id: &Uuid) -> Result<()> {
        let mut started = false;
        let task = self
            .storage
            .update_task(id, &mut |task| {
                started = task.status == TaskStatus::Pending && task.agent_id.is_some();
                if started {
                    task.set_status(TaskStatus::InProgress);
                }
                Ok(())
            })
            .await?
            .ok_or_else(|| MachineError::not_found("Task", id))?;

        let agent_id = match (&task.agent_id, started) {
            (Some(agent_id), true) => agent_id.clone(),
            _ => {
                debug!(task_id = %id, status = %task.status, "Task not runnable; skipped");
                return Ok(());
            }
        };
        self.status_changed(&task);

        let request = AgentExecutionRequest {
            agent_id,
            task: task.prompt_text(),
            model_id: task.model_id.clone(),
            parameters: task.parameters.clone(),
        };

        match self.executor.execute(request).await {
            Ok(result) => self.verify_and_complete(id, result).await,
            Err(e) => {
                self.fail_task(id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn verify_and_complete(&self, id: &Uuid, result: ExecutionResult) -> Result<()> {
        let cost = result.cost;
        let Some(task) = self
            .transition(id, TaskStatus::InProgress, TaskStatus::Verifying, |task| {
                task.add_cost(cost);
            })
            .await?
        else {
            return Ok(());
        };
        self.status_changed(&task);

        if result.result.trim().is_empty() {
            let message = "Agent returned an empty result";
            self.fail_task(id, message).await?;
            return Err(MachineError::UpstreamExecutionFailure(message.to_string()));
        }

        let output = task_result(&result);
        if let Some(task) = self
            .transition(id, TaskStatus::Verifying, TaskStatus::Completed, |task| {
                task.result = Some(output.clone());
                task.progress = 1.0;
            })
            .await?
        {
            info!(task_id = %id, cost = task.cost, "Task completed");
            self.status_changed(&task);
        }
        Ok(())
    }

    /// Apply `from -> to` if the task is still at `from`; `None` otherwise
    async fn transition<F>(
        &self,
        id: &Uuid,
        from: TaskStatus,
        to: TaskStatus,
        mut apply: F,
    ) -> Result<Option<Task>>
    where
        F: FnMut(&mut Task) + Send,
    {
        let mut moved = false;
        let task = self
            .storage
            .update_task(id, &mut |task| {
                moved = task.status == from;
                if moved {
                    apply(task);
                    task.set_status(to);
                }
                Ok(())
            })
            .await?;

        match task {
            Some(task) if moved => Ok(Some(task)),
            Some(task) => {
                debug!(task_id = %id, status = %task.status, expected = %from, "Task moved on; transition skipped");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Mark a non-terminal task failed; returns whether this call did it
    async fn fail_task(&self, id: &Uuid, message: &str) -> Result<bool> {
        let mut failed = false;
        let task = self
            .storage
            .update_task(id, &mut |task| {
                failed = !task.status.is_terminal();
                if failed {
                    task.error = Some(message.to_string());
                    task.set_status(TaskStatus::Failed);
                }
                Ok(())
            })
            .await?;

        if let (Some(task), true) = (task, failed) {
            warn!(task_id = %id, error = message, "Task failed");
            self.status_changed(&task);
        }
        Ok(failed)
    }

    fn status_changed(&self, task: &Task) {
        self.events.publish(EngineEvent::TaskStatusChanged {
            task_id: task.id,
            status: task.status,
        });
    }
}

fn task_result(result: &ExecutionResult) -> Parameters {
    let value = json!({
        "result": result.result,
        "agent_id": result.agent_id,
        "model_id": result.model_id,
        "prompt_tokens": result.usage.prompt_tokens,
        "completion_tokens": result.usage.completion_tokens,
        "duration_ms": result.duration_ms,
    });
    match value {
        Value::Object(map) => map,
        _ => Parameters::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scheduler::{channel, WorkReceiver};
    use crate::engine::storage::InMemoryStorage;
    use crate::engine::test_support::{agent_create, model_create};
    use crate::llm::{CostTracker, SimulatedBackend};
    use crate::models::{AgentId, TaskType};

    struct Fixture {
        registry: Arc<Registry>,
        tasks: TaskQueue,
        receiver: WorkReceiver,
    }

    fn fixture(backend: SimulatedBackend) -> Fixture {
        let storage = Arc::new(InMemoryStorage::new());
        let registry = Arc::new(Registry::new(storage.clone()));
        let executor = Arc::new(AgentExecutor::new(
            registry.clone(),
            Arc::new(backend),
            Arc::new(CostTracker::new(None)),
        ));
        let (queue, receiver) = channel();
        let tasks = TaskQueue::new(storage, registry.clone(), executor, queue, EventBus::default());
        Fixture {
            registry,
            tasks,
            receiver,
        }
    }

    fn create(agent_id: Option<AgentId>) -> TaskCreate {
        TaskCreate {
            task_type: TaskType::Code,
            title: "Implement login".to_string(),
            description: "Add the login form".to_string(),
            priority: None,
            context: None,
            agent_id,
            model_id: None,
            parameters: None,
        }
    }

    #[tokio::test]
    async fn test_bound_task_is_queued_and_completed() {
        let mut f = fixture(SimulatedBackend::with_usage(100, 200));
        let model = f.registry.register_model(model_create("M", 0.00001, 0.00003)).await.unwrap();
        let agent = f.registry.register_agent(agent_create("A", &model.id)).await.unwrap();

        let task = f.tasks.create_task(create(Some(agent.id.clone()))).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(f.receiver.try_recv(), Some(WorkItem::Task(task.id)));

        f.tasks.process_task(&task.id).await.unwrap();
        let done = f.tasks.get_task(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.progress, 1.0);
        assert!((done.cost - 0.007).abs() < 1e-12);
        assert!(done.completed_at.is_some());
        assert!(done.result.unwrap()["result"].as_str().unwrap().contains("Implement login"));

        // A second delivery is a no-op
        f.tasks.process_task(&task.id).await.unwrap();
        assert_eq!(f.tasks.get_task(&task.id).await.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_unbound_task_is_not_queued() {
        let mut f = fixture(SimulatedBackend::new());
        let task = f.tasks.create_task(create(None)).await.unwrap();
        assert_eq!(f.receiver.try_recv(), None);

        f.tasks.process_task(&task.id).await.unwrap();
        assert_eq!(f.tasks.get_task(&task.id).await.unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_upstream_failure_fails_the_task() {
        let f = fixture(SimulatedBackend::failing("provider down"));
        let model = f.registry.register_model(model_create("M", 0.0, 0.0)).await.unwrap();
        let agent = f.registry.register_agent(agent_create("A", &model.id)).await.unwrap();
        let task = f.tasks.create_task(create(Some(agent.id))).await.unwrap();

        assert!(f.tasks.process_task(&task.id).await.is_err());
        let failed = f.tasks.get_task(&task.id).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.error.unwrap().contains("provider down"));
    }

    #[tokio::test]
    async fn test_worker_leaves_terminal_tasks_alone() {
        let f = fixture(SimulatedBackend::new());
        let model = f.registry.register_model(model_create("M", 0.0, 0.0)).await.unwrap();
        let agent = f.registry.register_agent(agent_create("A", &model.id)).await.unwrap();
        let task = f.tasks.create_task(create(Some(agent.id))).await.unwrap();

        f.tasks
            .update_task(
                &task.id,
                TaskUpdate {
                    status: Some(TaskStatus::Failed),
                    error: Some("withdrawn".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        f.tasks.process_task(&task.id).await.unwrap();
        let task = f.tasks.get_task(&task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("withdrawn"));
    }

    #[tokio::test]
    async fn test_create_checks_references() {
        let f = fixture(SimulatedBackend::new());
        let err = f.tasks.create_task(create(Some(AgentId::from("ghost")))).await.unwrap_err();
        assert!(matches!(err, MachineError::NotFound { entity: "Agent", .. }));

        let mut blank = create(None);
        blank.title = " ".to_string();
        assert!(matches!(f.tasks.create_task(blank).await, Err(MachineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_list_newest_first_with_task_limits() {
        let f = fixture(SimulatedBackend::new());
        let mut ids = Vec::new();
        for _ in 0..12 {
            ids.push(f.tasks.create_task(create(None)).await.unwrap().id);
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let page = f.tasks.list_tasks(&TaskFilter::default(), &Pagination::default()).await.unwrap();
        assert_eq!(page.len(), 10);
        assert_eq!(page[0].id, ids[11]);

        assert!(f
            .tasks
            .list_tasks(&TaskFilter::default(), &Pagination::new(0, 101))
            .await
            .is_err());

        f.tasks.delete_task(&ids[0]).await.unwrap();
        assert!(matches!(
            f.tasks.get_task(&ids[0]).await,
            Err(MachineError::NotFound { .. })
        ));
    }
}
