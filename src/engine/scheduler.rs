//! Work queue and worker pool
//!
//! Workflow steps and agent-bound tasks are processed asynchronously: request
//! paths enqueue a [`WorkItem`] and return, and a fixed pool of workers drains
//! the queue. Items that share a key (one step of one execution, or one task)
//! are processed one at a time; items with different keys run in parallel, so
//! the branches of a fan-out make progress together. Execution state shared by
//! branches is guarded by the store's per-record mutation, not by these locks.
//!
//! A key's lock lives only while some worker holds or waits for it.
//!
//! A failing item is logged and dropped. It never stops its worker.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{MachineError, Result};

/// A step waiting to run within an execution
#[derive(Debug, Clone, PartialEq)]
pub struct StepWork {
    pub execution_id: Uuid,
    pub step_id: String,
    /// Output of the predecessor, or the execution input for the entry step
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkItem {
    Step(StepWork),
    Task(Uuid),
}

impl WorkItem {
    /// Serialization key; items with equal keys never run concurrently
    pub fn key(&self) -> String {
        match self {
            WorkItem::Step(work) => format!("step:{}:{}", work.execution_id, work.step_id),
            WorkItem::Task(id) => format!("task:{}", id),
        }
    }
}

/// Sending half of the work queue
#[derive(Debug, Clone)]
pub struct WorkQueue {
    sender: mpsc::UnboundedSender<WorkItem>,
}

impl WorkQueue {
    pub fn enqueue(&self, item: WorkItem) -> Result<()> {
        debug!(key = %item.key(), "Work enqueued");
        self.sender
            .send(item)
            .map_err(|_| MachineError::Internal("work queue is closed".to_string()))
    }
}

/// Receiving half of the work queue
#[derive(Debug)]
pub struct WorkReceiver {
    receiver: mpsc::UnboundedReceiver<WorkItem>,
}

impl WorkReceiver {
    pub async fn recv(&mut self) -> Option<WorkItem> {
        self.receiver.recv().await
    }

    /// Next queued item without waiting
    pub fn try_recv(&mut self) -> Option<WorkItem> {
        self.receiver.try_recv().ok()
    }
}

pub fn channel() -> (WorkQueue, WorkReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (WorkQueue { sender }, WorkReceiver { receiver })
}

/// Runs one work item
#[async_trait]
pub trait WorkDispatcher: Send + Sync {
    async fn dispatch(&self, item: WorkItem) -> Result<()>;
}

type KeyLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Fixed set of workers draining a [`WorkReceiver`]
pub struct WorkerPool {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    key_locks: KeyLocks,
}

impl WorkerPool {
    /// Spawn `count` workers on the current runtime
    pub fn spawn(count: usize, receiver: WorkReceiver, dispatcher: Arc<dyn WorkDispatcher>) -> Self {
        let count = count.max(1);
        let shutdown = CancellationToken::new();
        let receiver = Arc::new(Mutex::new(receiver));
        let key_locks: KeyLocks = Arc::new(DashMap::new());

        let handles = (0..count)
            .map(|worker| {
                let shutdown = shutdown.clone();
                let receiver = receiver.clone();
                let dispatcher = dispatcher.clone();
                let key_locks = key_locks.clone();
                tokio::spawn(async move {
                    run_worker(worker, shutdown, receiver, dispatcher, key_locks).await;
                })
            })
            .collect();

        info!(workers = count, "Worker pool started");
        Self {
            shutdown,
            handles,
            key_locks,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Keys with a live lock, i.e. held or waited for right now
    pub fn tracked_keys(&self) -> usize {
        self.key_locks.len()
    }

    /// Stop taking new items and wait for in-flight items to finish
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker terminated abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn run_worker(
    worker: usize,
    shutdown: CancellationToken,
    receiver: Arc<Mutex<WorkReceiver>>,
    dispatcher: Arc<dyn WorkDispatcher>,
    key_locks: KeyLocks,
) {
    debug!(worker, "Worker started");
    loop {
        let item = tokio::select! {
            _ = shutdown.cancelled() => break,
            item = async { receiver.lock().await.recv().await } => item,
        };
        let Some(item) = item else {
            // All senders dropped
            break;
        };

        let key = item.key();
        let lock = key_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;

        if let Err(e) = dispatcher.dispatch(item).await {
            error!(worker, key = %key, error = %e, "Work item failed");
        }

        drop(guard);
        drop(lock);
        // Cloning happens under the map's shard lock, so a count of one means
        // no other worker holds or waits for this key
        key_locks.remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
    }
    debug!(worker, "Worker stopped");
}
