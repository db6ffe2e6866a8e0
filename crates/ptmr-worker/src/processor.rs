//! Task processor: weighted worker pool, retry, and graceful shutdown.
//!
//! Each queue gets a number of worker loops proportional to its weight. A worker
//! leases one task at a time, decodes it, runs the handler and acknowledges the
//! outcome to the broker (complete, retry with backoff, or archive).
//!
//! Shutdown: [`TaskProcessor::shutdown`] stops dispatching new tasks and waits for
//! in-flight handlers. When the grace period elapses first, the handlers'
//! cancellation token is triggered and the processor waits for them to observe it.
//! Handlers are never aborted.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use ptmr_core::models::{QueueName, Task, TaskId, TaskKind, TaskPayload};
use ptmr_core::{BrokerError, TaskBroker, TaskError, WorkerConfig};

use crate::events::{DeadReason, LoggingHook, TaskEvent, TaskEventHook, TaskOutcome};

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Total number of concurrent worker loops across all queues.
    pub concurrency: usize,
    pub queues: Vec<(QueueName, u32)>,
    /// Sleep between polls when a queue is empty.
    pub poll_interval: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub task_timeout: Option<Duration>,
    pub stale_reap_interval: Option<Duration>,
    pub stale_lease: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            queues: QueueName::ALL
                .into_iter()
                .map(|q| (q, q.default_weight()))
                .collect(),
            poll_interval: Duration::from_secs(1),
            retry_base: Duration::from_secs(1),
            retry_max: Duration::from_secs(300),
            task_timeout: None,
            stale_reap_interval: Some(Duration::from_secs(60)),
            stale_lease: Duration::from_secs(600),
        }
    }
}

impl From<&WorkerConfig> for ProcessorConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            concurrency: config.task_concurrency,
            queues: config.queue_weights.clone(),
            poll_interval: config.task_poll_interval,
            retry_base: config.task_retry_base,
            retry_max: config.task_retry_max,
            task_timeout: config.task_timeout,
            stale_reap_interval: config.stale_task_reap_interval,
            stale_lease: config.stale_task_lease,
        }
    }
}

impl ProcessorConfig {
    /// Check the configuration and compute the per-queue worker split.
    pub fn worker_split(&self) -> Result<Vec<(QueueName, usize)>, ProcessorError> {
        if self.concurrency == 0 {
            return Err(ProcessorError::ZeroConcurrency);
        }
        if self.queues.is_empty() {
            return Err(ProcessorError::NoQueues);
        }
        let mut seen = HashSet::new();
        for (queue, weight) in &self.queues {
            if *weight == 0 {
                return Err(ProcessorError::ZeroWeight(*queue));
            }
            if !seen.insert(*queue) {
                return Err(ProcessorError::DuplicateQueue(*queue));
            }
        }
        if self.concurrency < self.queues.len() {
            return Err(ProcessorError::ConcurrencyBelowQueueCount {
                concurrency: self.concurrency,
                queues: self.queues.len(),
            });
        }
        Ok(workers_per_queue(self.concurrency, &self.queues))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("task processor is already running")]
    AlreadyRunning,

    #[error("task processor is shutting down")]
    ShuttingDown,

    #[error("task processor is not running")]
    NotRunning,

    #[error("task concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("no queues configured")]
    NoQueues,

    #[error("queue {0} has weight 0")]
    ZeroWeight(QueueName),

    #[error("queue {0} configured more than once")]
    DuplicateQueue(QueueName),

    #[error("task concurrency {concurrency} is below the number of queues ({queues})")]
    ConcurrencyBelowQueueCount { concurrency: usize, queues: usize },

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Split `concurrency` workers across queues: one worker per queue, then the
/// rest proportionally to weight (largest remainder).
///
/// The total equals `concurrency` as long as it covers one worker per queue.
/// Below that every queue still gets one worker; [`ProcessorConfig::worker_split`]
/// rejects such configurations.
pub fn workers_per_queue(concurrency: usize, queues: &[(QueueName, u32)]) -> Vec<(QueueName, usize)> {
    let total_weight: u64 = queues.iter().map(|(_, w)| u64::from(*w)).sum();
    let spare = concurrency.saturating_sub(queues.len()) as u64;
    if total_weight == 0 || spare == 0 {
        return queues.iter().map(|(q, _)| (*q, 1)).collect();
    }

    let mut split: Vec<(QueueName, u64, u64)> = queues
        .iter()
        .map(|(queue, weight)| {
            let share = spare * u64::from(*weight);
            (*queue, share / total_weight, share % total_weight)
        })
        .collect();

    let assigned: u64 = split.iter().map(|(_, n, _)| n).sum();
    let mut by_remainder: Vec<usize> = (0..split.len()).collect();
    // Stable sort keeps configuration order among equal remainders.
    by_remainder.sort_by(|a, b| split[*b].2.cmp(&split[*a].2));
    for index in by_remainder
        .into_iter()
        .take(spare.saturating_sub(assigned) as usize)
    {
        split[index].1 += 1;
    }

    split
        .into_iter()
        .map(|(queue, count, _)| (queue, count as usize + 1))
        .collect()
}

/// Delay before the next attempt: `base * 2^retried`, capped at `max`.
pub fn retry_backoff(base: Duration, max: Duration, retried: i32) -> Duration {
    u32::try_from(retried.max(0))
        .ok()
        .and_then(|exp| 2u32.checked_pow(exp))
        .and_then(|factor| base.checked_mul(factor))
        .map_or(max, |delay| delay.min(max))
}

/// Per-delivery information handed to a handler.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub task_id: TaskId,
    pub queue: QueueName,
    pub retried: i32,
    pub max_retry: i32,
    cancel: CancellationToken,
}

impl HandlerContext {
    pub fn new(
        task_id: TaskId,
        queue: QueueName,
        retried: i32,
        max_retry: i32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            queue,
            retried,
            max_retry,
            cancel,
        }
    }

    /// Resolves once the processor gives up waiting for in-flight work.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Performs the side effect of a decoded task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext, payload: TaskPayload) -> Result<(), TaskError>;
}

struct Dispatcher {
    broker: Arc<dyn TaskBroker>,
    handler: Arc<dyn TaskHandler>,
    hook: Arc<dyn TaskEventHook>,
    retry_base: Duration,
    retry_max: Duration,
    task_timeout: Option<Duration>,
    cancel: CancellationToken,
}

fn decode(task: &Task) -> Result<TaskPayload, String> {
    let kind: TaskKind = task.kind.parse().map_err(|e: anyhow::Error| e.to_string())?;
    TaskPayload::decode(kind, &task.payload).map_err(|e| e.to_string())
}

impl Dispatcher {
    #[tracing::instrument(skip(self, task), fields(task.id = %task.id, task.kind = %task.kind, queue = %task.queue, retried = task.retried))]
    async fn process(&self, task: Task) {
        let payload = match decode(&task) {
            Ok(payload) => payload,
            Err(error) => {
                self.archive(&task, DeadReason::Undecodable, error).await;
                return;
            }
        };

        let ctx = HandlerContext::new(
            task.id,
            task.queue,
            task.retried,
            task.max_retry,
            self.cancel.clone(),
        );

        match self.run_handler(&ctx, payload).await {
            Ok(()) => {
                if let Err(e) = self.broker.complete(task.id).await {
                    tracing::error!(error = %e, "Failed to acknowledge completed task");
                }
                self.report(&task, TaskOutcome::Completed, None).await;
            }
            Err(err) if err.is_skip_retry() => {
                self.archive(&task, DeadReason::SkipRetry, err.to_string())
                    .await;
            }
            Err(err) if task.can_retry() => {
                let error = err.to_string();
                let delay = retry_backoff(self.retry_base, self.retry_max, task.retried);
                let next_attempt = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                if let Err(e) = self.broker.retry(task.id, next_attempt, &error).await {
                    tracing::error!(error = %e, "Failed to schedule task retry");
                }
                self.report(&task, TaskOutcome::Retried { next_attempt }, Some(error))
                    .await;
            }
            Err(err) => {
                self.archive(&task, DeadReason::Exhausted, err.to_string())
                    .await;
            }
        }
    }

    async fn run_handler(&self, ctx: &HandlerContext, payload: TaskPayload) -> Result<(), TaskError> {
        match self.task_timeout {
            Some(limit) => tokio::time::timeout(limit, self.handler.handle(ctx, payload))
                .await
                .unwrap_or_else(|_| {
                    Err(TaskError::retryable(anyhow::anyhow!(
                        "task timed out after {:?}",
                        limit
                    )))
                }),
            None => self.handler.handle(ctx, payload).await,
        }
    }

    async fn archive(&self, task: &Task, reason: DeadReason, error: String) {
        if let Err(e) = self.broker.archive(task.id, &error).await {
            tracing::error!(error = %e, "Failed to archive task");
        }
        self.report(task, TaskOutcome::Dead { reason }, Some(error))
            .await;
    }

    async fn report(&self, task: &Task, outcome: TaskOutcome, error: Option<String>) {
        let event = TaskEvent {
            task_id: task.id,
            kind: task.kind.clone(),
            queue: task.queue,
            payload: task.payload.clone(),
            retried: task.retried,
            max_retry: task.max_retry,
            outcome,
            error,
        };
        self.hook.on_event(&event).await;
    }
}

async fn worker_loop(
    dispatcher: Arc<Dispatcher>,
    queue: QueueName,
    poll_interval: Duration,
    stop: CancellationToken,
) {
    while !stop.is_cancelled() {
        match dispatcher.broker.dequeue(queue).await {
            Ok(Some(task)) => {
                dispatcher.process(task).await;
                continue;
            }
            Ok(None) => {
                tracing::trace!(queue = %queue, "No tasks available in queue");
            }
            Err(e) => {
                tracing::error!(error = %e, queue = %queue, "Failed to dequeue task");
            }
        }
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = sleep(poll_interval) => {}
        }
    }
}

async fn reap_loop(
    broker: Arc<dyn TaskBroker>,
    interval: Duration,
    lease: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = broker.requeue_stale(lease).await {
                    tracing::error!(error = %e, "Stale task reaper failed");
                }
            }
        }
    }
}

struct RunningPool {
    stop: CancellationToken,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    reaper: Option<JoinHandle<()>>,
}

enum ProcessorState {
    Stopped,
    Running(RunningPool),
    Draining,
}

pub struct TaskProcessor {
    broker: Arc<dyn TaskBroker>,
    handler: Arc<dyn TaskHandler>,
    hook: Arc<dyn TaskEventHook>,
    config: ProcessorConfig,
    state: Mutex<ProcessorState>,
}

impl TaskProcessor {
    pub fn new(
        broker: Arc<dyn TaskBroker>,
        handler: Arc<dyn TaskHandler>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            broker,
            handler,
            hook: Arc::new(LoggingHook),
            config,
            state: Mutex::new(ProcessorState::Stopped),
        }
    }

    pub fn with_event_hook(mut self, hook: Arc<dyn TaskEventHook>) -> Self {
        self.hook = hook;
        self
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, ProcessorState::Running(_))
    }

    /// Launch the worker loops (and the stale task reaper when configured).
    pub async fn start(&self) -> Result<(), ProcessorError> {
        let mut state = self.state.lock().await;
        match *state {
            ProcessorState::Stopped => {}
            ProcessorState::Running(_) => return Err(ProcessorError::AlreadyRunning),
            ProcessorState::Draining => return Err(ProcessorError::ShuttingDown),
        }
        let split = self.config.worker_split()?;

        if let Some(timeout) = self.config.task_timeout {
            if timeout >= self.config.stale_lease {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    lease_secs = self.config.stale_lease.as_secs(),
                    "Task timeout exceeds the stale lease, long tasks may be delivered twice"
                );
            }
        }

        let stop = CancellationToken::new();
        let cancel = CancellationToken::new();
        let dispatcher = Arc::new(Dispatcher {
            broker: self.broker.clone(),
            handler: self.handler.clone(),
            hook: self.hook.clone(),
            retry_base: self.config.retry_base,
            retry_max: self.config.retry_max,
            task_timeout: self.config.task_timeout,
            cancel: cancel.clone(),
        });

        let mut workers = Vec::new();
        for (queue, count) in &split {
            for _ in 0..*count {
                workers.push(tokio::spawn(worker_loop(
                    dispatcher.clone(),
                    *queue,
                    self.config.poll_interval,
                    stop.clone(),
                )));
            }
        }

        let reaper = self.config.stale_reap_interval.map(|interval| {
            tokio::spawn(reap_loop(
                self.broker.clone(),
                interval,
                self.config.stale_lease,
                stop.clone(),
            ))
        });

        tracing::info!(
            workers = workers.len(),
            split = ?split,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            reaper = reaper.is_some(),
            "Task processor started"
        );

        *state = ProcessorState::Running(RunningPool {
            stop,
            cancel,
            workers,
            reaper,
        });
        Ok(())
    }

    /// Stop dispatching, wait up to `grace` for in-flight handlers, then close the broker.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), ProcessorError> {
        let pool = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, ProcessorState::Draining) {
                ProcessorState::Running(pool) => pool,
                other => {
                    *state = other;
                    return Err(ProcessorError::NotRunning);
                }
            }
        };

        tracing::info!(grace_ms = grace.as_millis() as u64, "Task processor draining");
        pool.stop.cancel();

        let RunningPool {
            cancel,
            workers,
            reaper,
            ..
        } = pool;
        let drain = async move {
            for worker in workers {
                if let Err(e) = worker.await {
                    tracing::error!(error = %e, "Task worker exited abnormally");
                }
            }
        };
        tokio::pin!(drain);

        if tokio::time::timeout(grace, &mut drain).await.is_err() {
            tracing::warn!("Shutdown grace period elapsed, cancelling in-flight handlers");
            cancel.cancel();
            drain.await;
        }
        if let Some(reaper) = reaper {
            let _ = reaper.await;
        }

        let closed = self.broker.close().await;
        *self.state.lock().await = ProcessorState::Stopped;
        closed?;

        tracing::info!("Task processor stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;

    struct NoopHandler;

    #[async_trait]
    impl TaskHandler for NoopHandler {
        async fn handle(&self, _ctx: &HandlerContext, _payload: TaskPayload) -> Result<(), TaskError> {
            Ok(())
        }
    }

    fn processor(config: ProcessorConfig) -> TaskProcessor {
        TaskProcessor::new(
            Arc::new(MemoryBroker::new()),
            Arc::new(NoopHandler),
            config,
        )
    }

    #[test]
    fn test_workers_split_by_weight() {
        let queues = [(QueueName::Critical, 10), (QueueName::Default, 5)];
        assert_eq!(
            workers_per_queue(10, &queues),
            vec![(QueueName::Critical, 6), (QueueName::Default, 4)]
        );
        assert_eq!(
            workers_per_queue(3, &queues),
            vec![(QueueName::Critical, 2), (QueueName::Default, 1)]
        );
        assert_eq!(
            workers_per_queue(2, &queues),
            vec![(QueueName::Critical, 1), (QueueName::Default, 1)]
        );
        assert_eq!(
            workers_per_queue(3, &[(QueueName::Critical, 100), (QueueName::Default, 1)]),
            vec![(QueueName::Critical, 2), (QueueName::Default, 1)]
        );
        assert_eq!(
            workers_per_queue(4, &[(QueueName::Default, 1), (QueueName::Critical, 1)]),
            vec![(QueueName::Default, 2), (QueueName::Critical, 2)]
        );
    }

    #[test]
    fn test_retry_backoff_exponential_then_capped() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(300);
        assert_eq!(retry_backoff(base, max, 0), Duration::from_secs(1));
        assert_eq!(retry_backoff(base, max, 1), Duration::from_secs(2));
        assert_eq!(retry_backoff(base, max, 2), Duration::from_secs(4));
        assert_eq!(retry_backoff(base, max, 8), Duration::from_secs(256));
        assert_eq!(retry_backoff(base, max, 9), max);
        assert_eq!(retry_backoff(base, max, 40), max);
        assert_eq!(retry_backoff(base, max, -1), Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let zero = ProcessorConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(zero.worker_split(), Err(ProcessorError::ZeroConcurrency)));

        let empty = ProcessorConfig {
            queues: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(empty.worker_split(), Err(ProcessorError::NoQueues)));

        let weightless = ProcessorConfig {
            queues: vec![(QueueName::Critical, 10), (QueueName::Default, 0)],
            ..Default::default()
        };
        assert!(matches!(
            weightless.worker_split(),
            Err(ProcessorError::ZeroWeight(QueueName::Default))
        ));

        let duplicate = ProcessorConfig {
            queues: vec![(QueueName::Default, 1), (QueueName::Default, 2)],
            ..Default::default()
        };
        assert!(matches!(
            duplicate.worker_split(),
            Err(ProcessorError::DuplicateQueue(QueueName::Default))
        ));
    }

    #[test]
    fn test_split_never_exceeds_concurrency() {
        let single = ProcessorConfig {
            concurrency: 1,
            ..Default::default()
        };
        assert!(matches!(
            single.worker_split(),
            Err(ProcessorError::ConcurrencyBelowQueueCount {
                concurrency: 1,
                queues: 2
            })
        ));

        for concurrency in 2..=25 {
            let config = ProcessorConfig {
                concurrency,
                queues: vec![(QueueName::Critical, 1000), (QueueName::Default, 1)],
                ..Default::default()
            };
            let split = config.worker_split().unwrap();
            assert_eq!(split.iter().map(|(_, n)| n).sum::<usize>(), concurrency);
            assert!(split.iter().all(|(_, n)| *n >= 1));
        }
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let processor = processor(ProcessorConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(5),
            stale_reap_interval: None,
            ..Default::default()
        });

        assert!(matches!(
            processor.shutdown(Duration::from_secs(1)).await,
            Err(ProcessorError::NotRunning)
        ));
        processor.start().await.unwrap();
        assert!(processor.is_running().await);
        assert!(matches!(
            processor.start().await,
            Err(ProcessorError::AlreadyRunning)
        ));

        processor.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(!processor.is_running().await);
    }

    #[tokio::test]
    async fn test_start_rejects_zero_concurrency() {
        let processor = processor(ProcessorConfig {
            concurrency: 0,
            ..Default::default()
        });
        assert!(matches!(
            processor.start().await,
            Err(ProcessorError::ZeroConcurrency)
        ));
        assert!(!processor.is_running().await);
    }
}
