//! In-process task broker
//!
//! Same contract as [`ptmr_db::PgTaskBroker`], with a mutex instead of row locks.
//! Used by tests and for running the worker without a broker database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use ptmr_core::models::{NewTask, QueueName, Task, TaskId, TaskInfo, TaskStatus};
use ptmr_core::{BrokerError, TaskBroker};

#[derive(Default)]
struct BrokerState {
    tasks: HashMap<TaskId, (u64, Task)>,
    next_seq: u64,
    completed: Vec<TaskId>,
}

impl BrokerState {
    fn insert(&mut self, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tasks.insert(task.id, (seq, task));
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut Task, BrokerError> {
        self.tasks
            .get_mut(&id)
            .map(|(_, task)| task)
            .ok_or(BrokerError::TaskNotFound(id))
    }
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the broker going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), BrokerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("broker connection refused".to_string()));
        }
        Ok(())
    }

    /// Store a task with an arbitrary wire kind and payload, bypassing the codec.
    pub async fn insert_raw(&self, kind: &str, payload: Vec<u8>, queue: QueueName, max_retry: i32) -> TaskId {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            kind: kind.to_string(),
            payload,
            queue,
            status: TaskStatus::Pending,
            retried: 0,
            max_retry,
            process_at: now,
            last_error: None,
            started_at: None,
            created_at: now,
        };
        let id = task.id;
        self.state.lock().await.insert(task);
        id
    }

    pub async fn task(&self, id: TaskId) -> Option<Task> {
        self.state.lock().await.tasks.get(&id).map(|(_, t)| t.clone())
    }

    pub async fn tasks(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        let mut tasks: Vec<(u64, Task)> = state.tasks.values().cloned().collect();
        tasks.sort_by_key(|(seq, _)| *seq);
        tasks.into_iter().map(|(_, t)| t).collect()
    }

    pub async fn archived(&self) -> Vec<Task> {
        self.tasks()
            .await
            .into_iter()
            .filter(|t| t.status == TaskStatus::Archived)
            .collect()
    }

    pub async fn completed(&self) -> Vec<TaskId> {
        self.state.lock().await.completed.clone()
    }

    /// Tasks that may still be delivered (pending, retry or active).
    pub async fn outstanding(&self) -> usize {
        self.state
            .lock()
            .await
            .tasks
            .values()
            .filter(|(_, t)| t.status != TaskStatus::Archived)
            .count()
    }
}

#[async_trait]
impl TaskBroker for MemoryBroker {
    async fn enqueue(&self, task: NewTask) -> Result<TaskInfo, BrokerError> {
        self.check_available()?;
        let now = Utc::now();
        let process_at = task.options.process_at(now);
        let stored = Task {
            id: Uuid::new_v4(),
            kind: task.kind.as_str().to_string(),
            payload: task.payload,
            queue: task.options.queue,
            status: TaskStatus::Pending,
            retried: 0,
            max_retry: task.options.max_retry,
            process_at,
            last_error: None,
            started_at: None,
            created_at: now,
        };
        let info = TaskInfo {
            id: stored.id,
            kind: task.kind,
            queue: stored.queue,
            max_retry: stored.max_retry,
            process_at,
        };
        self.state.lock().await.insert(stored);
        Ok(info)
    }

    async fn dequeue(&self, queue: QueueName) -> Result<Option<Task>, BrokerError> {
        self.check_available()?;
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let next = state
            .tasks
            .values()
            .filter(|(_, t)| t.queue == queue && t.is_ready_to_run(now))
            .min_by_key(|(seq, t)| (t.process_at, *seq))
            .map(|(_, t)| t.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let task = state.task_mut(id)?;
        task.status = TaskStatus::Active;
        task.started_at = Some(now);
        Ok(Some(task.clone()))
    }

    async fn complete(&self, id: TaskId) -> Result<(), BrokerError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state
            .tasks
            .remove(&id)
            .ok_or(BrokerError::TaskNotFound(id))?;
        state.completed.push(id);
        Ok(())
    }

    async fn retry(
        &self,
        id: TaskId,
        process_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), BrokerError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let task = state.task_mut(id)?;
        task.status = TaskStatus::Retry;
        task.retried += 1;
        task.process_at = process_at;
        task.last_error = Some(error.to_string());
        task.started_at = None;
        Ok(())
    }

    async fn archive(&self, id: TaskId, error: &str) -> Result<(), BrokerError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let task = state.task_mut(id)?;
        task.status = TaskStatus::Archived;
        task.last_error = Some(error.to_string());
        task.started_at = None;
        Ok(())
    }

    async fn requeue_stale(&self, lease: Duration) -> Result<u64, BrokerError> {
        self.check_available()?;
        let now = Utc::now();
        let cutoff = now - chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::zero());
        let mut state = self.state.lock().await;
        let mut count = 0;
        for (_, task) in state.tasks.values_mut() {
            let expired = task.status == TaskStatus::Active
                && task.started_at.is_some_and(|started| started < cutoff);
            if expired {
                task.status = TaskStatus::Retry;
                task.process_at = now;
                task.last_error = Some("lease expired".to_string());
                task.started_at = None;
                count += 1;
            }
        }
        Ok(count)
    }
}
