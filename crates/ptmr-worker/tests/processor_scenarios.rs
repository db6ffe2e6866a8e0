mod common;

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use ptmr_core::models::{
    PayloadDeleteApplication, QueueName, TaskKind, TaskOptions, TaskPayload, TaskStatus,
};
use ptmr_core::TaskError;
use ptmr_services::{
    InMemoryDocumentStore, RecordingEmailSender, CANDIDATE_APPLICATIONS_INDEX,
    EMPLOYER_APPLICATIONS_INDEX,
};
use ptmr_worker::{
    DeadReason, HandlerContext, MemoryBroker, ProcessorConfig, SideEffectHandlers,
    TaskDistributor, TaskHandler, TaskOutcome, TaskProcessor,
};

use common::{create_application, create_candidate_application, fast_config, immediate, RecordingHook};

const WAIT: Duration = Duration::from_secs(10);

struct Harness {
    broker: MemoryBroker,
    documents: InMemoryDocumentStore,
    hook: RecordingHook,
    distributor: TaskDistributor,
    processor: TaskProcessor,
}

fn harness(config: ProcessorConfig) -> Harness {
    let broker = MemoryBroker::new();
    let documents = InMemoryDocumentStore::new();
    let hook = RecordingHook::default();
    let handlers = SideEffectHandlers::new(
        Arc::new(documents.clone()),
        Arc::new(RecordingEmailSender::new()),
    );
    let processor = TaskProcessor::new(Arc::new(broker.clone()), Arc::new(handlers), config)
        .with_event_hook(Arc::new(hook.clone()));
    Harness {
        distributor: TaskDistributor::new(Arc::new(broker.clone())),
        broker,
        documents,
        hook,
        processor,
    }
}

#[tokio::test]
async fn test_create_application_task_indexes_document() {
    let h = harness(fast_config(2));
    h.processor.start().await.unwrap();

    h.distributor
        .enqueue(
            &create_candidate_application("5_7", "hi"),
            immediate(QueueName::Critical, 3),
        )
        .await
        .unwrap();

    let events = h.hook.wait_for_terminal(1, WAIT).await;
    h.processor.shutdown(Duration::from_secs(1)).await.unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, TaskOutcome::Completed);
    assert_eq!(
        h.documents.document(CANDIDATE_APPLICATIONS_INDEX, "5_7").await,
        Some(json!({"message": "hi"}))
    );
    assert_eq!(h.documents.len(CANDIDATE_APPLICATIONS_INDEX).await, 1);
    assert_eq!(h.broker.outstanding().await, 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_success() {
    let h = harness(fast_config(2));
    h.documents.fail_next_writes(3);
    h.processor.start().await.unwrap();

    let info = h
        .distributor
        .enqueue(
            &create_candidate_application("5_7", "hi"),
            immediate(QueueName::Critical, 5),
        )
        .await
        .unwrap();

    h.hook.wait_for_terminal(1, WAIT).await;
    h.processor.shutdown(Duration::from_secs(1)).await.unwrap();

    let events = h.hook.events().await;
    let retries = events
        .iter()
        .filter(|e| matches!(e.outcome, TaskOutcome::Retried { .. }))
        .count();
    assert_eq!(retries, 3);
    assert_eq!(events.last().unwrap().outcome, TaskOutcome::Completed);
    assert_eq!(events.last().unwrap().retried, 3);
    assert_eq!(h.documents.len(CANDIDATE_APPLICATIONS_INDEX).await, 1);
    assert_eq!(
        h.documents.document(CANDIDATE_APPLICATIONS_INDEX, "5_7").await,
        Some(json!({"message": "hi"}))
    );
    assert!(h.broker.completed().await.contains(&info.id));
}

#[tokio::test]
async fn test_always_failing_task_is_archived_after_max_retry() {
    let h = harness(fast_config(2));
    h.documents.fail_next_writes(usize::MAX);
    h.processor.start().await.unwrap();

    let info = h
        .distributor
        .enqueue(
            &create_candidate_application("5_7", "hi"),
            immediate(QueueName::Default, 2),
        )
        .await
        .unwrap();

    let terminal = h.hook.wait_for_terminal(1, WAIT).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.processor.shutdown(Duration::from_secs(1)).await.unwrap();

    assert_eq!(
        terminal[0].outcome,
        TaskOutcome::Dead {
            reason: DeadReason::Exhausted
        }
    );
    // One first attempt plus max_retry retries, and nothing after the task died.
    assert_eq!(h.documents.write_count(), 3);
    assert_eq!(h.hook.events().await.len(), 3);

    let task = h.broker.task(info.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Archived);
    assert_eq!(task.retried, 2);
    assert!(task.last_error.is_some());
}

#[tokio::test]
async fn test_undecodable_payload_is_archived_without_retries() {
    let h = harness(fast_config(2));
    let garbage = h
        .broker
        .insert_raw("task:create_candidate_app", b"not json".to_vec(), QueueName::Default, 5)
        .await;
    let unknown = h
        .broker
        .insert_raw("task:reindex_everything", b"{}".to_vec(), QueueName::Default, 5)
        .await;
    h.processor.start().await.unwrap();

    let terminal = h.hook.wait_for_terminal(2, WAIT).await;
    h.processor.shutdown(Duration::from_secs(1)).await.unwrap();

    assert_eq!(terminal.len(), 2);
    for event in &terminal {
        assert_eq!(
            event.outcome,
            TaskOutcome::Dead {
                reason: DeadReason::Undecodable
            }
        );
        assert_eq!(event.retried, 0);
    }
    for id in [garbage, unknown] {
        let task = h.broker.task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Archived);
        assert_eq!(task.retried, 0);
    }
    assert_eq!(h.hook.events().await.len(), 2);
    assert_eq!(h.documents.write_count(), 0);
}

#[tokio::test]
async fn test_skip_retry_error_archives_immediately() {
    let h = harness(fast_config(2));
    h.processor.start().await.unwrap();

    h.distributor
        .enqueue_delete_employer_application(
            PayloadDeleteApplication {
                doc_id: String::new(),
            },
            immediate(QueueName::Critical, 10),
        )
        .await
        .unwrap();

    let terminal = h.hook.wait_for_terminal(1, WAIT).await;
    h.processor.shutdown(Duration::from_secs(1)).await.unwrap();

    assert_eq!(
        terminal[0].outcome,
        TaskOutcome::Dead {
            reason: DeadReason::SkipRetry
        }
    );
    assert_eq!(h.hook.events().await.len(), 1);
    assert!(terminal[0].error.as_deref().unwrap().contains("doc_id"));
}

#[tokio::test]
async fn test_create_and_delete_for_same_id_end_in_either_state() {
    let h = harness(fast_config(2));
    h.processor.start().await.unwrap();

    h.distributor
        .enqueue(
            &create_candidate_application("5_7", "hi"),
            immediate(QueueName::Critical, 3),
        )
        .await
        .unwrap();
    h.distributor
        .enqueue_delete_candidate_application(
            PayloadDeleteApplication {
                doc_id: "5_7".to_string(),
            },
            immediate(QueueName::Critical, 3),
        )
        .await
        .unwrap();

    let terminal = h.hook.wait_for_terminal(2, WAIT).await;
    h.processor.shutdown(Duration::from_secs(1)).await.unwrap();

    assert!(terminal.iter().all(|e| e.outcome == TaskOutcome::Completed));
    // No ordering between the two tasks: the document exists only if the create ran last.
    let document = h.documents.document(CANDIDATE_APPLICATIONS_INDEX, "5_7").await;
    assert!(document.is_none() || document == Some(json!({"message": "hi"})));
}

#[tokio::test]
async fn test_concurrent_kinds_never_cross_payloads() {
    let h = harness(fast_config(6));
    h.processor.start().await.unwrap();

    for i in 0..50 {
        h.distributor
            .enqueue_create_candidate_application(
                create_application(&format!("c_{}", i), &format!("candidate {}", i)),
                immediate(QueueName::Critical, 3),
            )
            .await
            .unwrap();
        h.distributor
            .enqueue_create_employer_application(
                create_application(&format!("e_{}", i), &format!("employer {}", i)),
                immediate(QueueName::Default, 3),
            )
            .await
            .unwrap();
    }

    let terminal = h.hook.wait_for_terminal(100, WAIT).await;
    h.processor.shutdown(Duration::from_secs(1)).await.unwrap();

    assert_eq!(terminal.len(), 100);
    assert_eq!(h.documents.len(CANDIDATE_APPLICATIONS_INDEX).await, 50);
    assert_eq!(h.documents.len(EMPLOYER_APPLICATIONS_INDEX).await, 50);
    for i in 0..50 {
        assert_eq!(
            h.documents
                .document(CANDIDATE_APPLICATIONS_INDEX, &format!("c_{}", i))
                .await,
            Some(json!({"message": format!("candidate {}", i)}))
        );
        assert_eq!(
            h.documents
                .document(EMPLOYER_APPLICATIONS_INDEX, &format!("e_{}", i))
                .await,
            Some(json!({"message": format!("employer {}", i)}))
        );
    }
    for event in &terminal {
        let expected = if event.queue == QueueName::Critical {
            TaskKind::CreateCandidateApplication
        } else {
            TaskKind::CreateEmployerApplication
        };
        assert_eq!(event.kind, expected.as_str());
    }
}

#[tokio::test]
async fn test_thousand_tasks_all_reach_a_terminal_state() {
    let h = harness(fast_config(8));
    h.processor.start().await.unwrap();

    for i in 0..990 {
        let queue = if i % 3 == 0 {
            QueueName::Critical
        } else {
            QueueName::Default
        };
        h.distributor
            .enqueue(
                &create_candidate_application(&format!("{}_1", i), "load"),
                immediate(queue, 3),
            )
            .await
            .unwrap();
    }
    for _ in 0..10 {
        h.broker
            .insert_raw("task:create_candidate_app", b"{".to_vec(), QueueName::Default, 3)
            .await;
    }

    let terminal = h.hook.wait_for_terminal(1000, Duration::from_secs(60)).await;
    h.processor.shutdown(Duration::from_secs(1)).await.unwrap();

    assert_eq!(terminal.len(), 1000);
    let completed = terminal
        .iter()
        .filter(|e| e.outcome == TaskOutcome::Completed)
        .count();
    assert_eq!(completed, 990);
    assert_eq!(h.broker.completed().await.len(), 990);
    assert_eq!(h.broker.archived().await.len(), 10);
    assert_eq!(h.broker.outstanding().await, 0);
    assert_eq!(h.documents.len(CANDIDATE_APPLICATIONS_INDEX).await, 990);
}

struct SlowHandler {
    started: Arc<Notify>,
    finished: Arc<AtomicUsize>,
    delay: Duration,
}

#[async_trait]
impl TaskHandler for SlowHandler {
    async fn handle(&self, _ctx: &HandlerContext, _payload: TaskPayload) -> Result<(), TaskError> {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct CooperativeHandler {
    started: Arc<Notify>,
}

#[async_trait]
impl TaskHandler for CooperativeHandler {
    async fn handle(&self, ctx: &HandlerContext, _payload: TaskPayload) -> Result<(), TaskError> {
        self.started.notify_one();
        ctx.cancelled().await;
        Err(TaskError::retryable(anyhow::anyhow!("interrupted by shutdown")))
    }
}

fn processor_with(broker: &MemoryBroker, handler: Arc<dyn TaskHandler>, hook: &RecordingHook) -> TaskProcessor {
    TaskProcessor::new(Arc::new(broker.clone()), handler, fast_config(2))
        .with_event_hook(Arc::new(hook.clone()))
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_handler() {
    let broker = MemoryBroker::new();
    let hook = RecordingHook::default();
    let started = Arc::new(Notify::new());
    let finished = Arc::new(AtomicUsize::new(0));
    let processor = processor_with(
        &broker,
        Arc::new(SlowHandler {
            started: started.clone(),
            finished: finished.clone(),
            delay: Duration::from_millis(200),
        }),
        &hook,
    );
    processor.start().await.unwrap();
    TaskDistributor::new(Arc::new(broker.clone()))
        .enqueue(
            &create_candidate_application("5_7", "hi"),
            immediate(QueueName::Critical, 3),
        )
        .await
        .unwrap();

    tokio::time::timeout(WAIT, started.notified()).await.unwrap();
    processor.shutdown(Duration::from_secs(5)).await.unwrap();

    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(hook.events().await[0].outcome, TaskOutcome::Completed);
    assert_eq!(broker.completed().await.len(), 1);
}

#[tokio::test]
async fn test_grace_period_cancels_cooperative_handlers() {
    let broker = MemoryBroker::new();
    let hook = RecordingHook::default();
    let started = Arc::new(Notify::new());
    let processor = processor_with(
        &broker,
        Arc::new(CooperativeHandler {
            started: started.clone(),
        }),
        &hook,
    );
    processor.start().await.unwrap();
    let info = TaskDistributor::new(Arc::new(broker.clone()))
        .enqueue(
            &create_candidate_application("5_7", "hi"),
            immediate(QueueName::Critical, 3),
        )
        .await
        .unwrap();

    tokio::time::timeout(WAIT, started.notified()).await.unwrap();
    tokio::time::timeout(WAIT, processor.shutdown(Duration::from_millis(50)))
        .await
        .unwrap()
        .unwrap();

    let events = hook.events().await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0].outcome, TaskOutcome::Retried { .. }));
    let task = broker.task(info.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Retry);
    assert_eq!(task.retried, 1);
}

#[tokio::test]
async fn test_handler_timeout_counts_as_failure() {
    let broker = MemoryBroker::new();
    let hook = RecordingHook::default();
    let processor = TaskProcessor::new(
        Arc::new(broker.clone()),
        Arc::new(SlowHandler {
            started: Arc::new(Notify::new()),
            finished: Arc::new(AtomicUsize::new(0)),
            delay: Duration::from_secs(5),
        }),
        ProcessorConfig {
            task_timeout: Some(Duration::from_millis(20)),
            ..fast_config(2)
        },
    )
    .with_event_hook(Arc::new(hook.clone()));
    processor.start().await.unwrap();

    TaskDistributor::new(Arc::new(broker.clone()))
        .enqueue(
            &create_candidate_application("5_7", "hi"),
            TaskOptions::default().max_retry(0),
        )
        .await
        .unwrap();

    let terminal = hook.wait_for_terminal(1, WAIT).await;
    processor.shutdown(Duration::from_secs(1)).await.unwrap();

    assert_eq!(
        terminal[0].outcome,
        TaskOutcome::Dead {
            reason: DeadReason::Exhausted
        }
    );
    assert!(terminal[0].error.as_deref().unwrap().contains("timed out"));
}
