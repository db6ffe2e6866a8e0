mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use ptmr_core::models::{PayloadCreateApplication, TaskOptions, TaskPayload, TaskStatus};
use ptmr_core::{OutboxSource, WorkerConfig};
use ptmr_db::db::CreateApplicationParams;
use ptmr_db::{MemoryStore, Store, TxError};
use ptmr_services::{InMemoryDocumentStore, RecordingEmailSender, CANDIDATE_APPLICATIONS_INDEX};
use ptmr_worker::{
    MemoryBroker, OutboxRelay, RelayConfig, RelayError, SideEffectHandlers, TaskDistributor,
    TaskOutcome, TaskProcessor,
};

use common::{fast_config, RecordingHook};

fn application_params(candidate_id: i64, job_id: i64) -> CreateApplicationParams {
    CreateApplicationParams {
        candidate_id,
        employer_id: 42,
        job_id,
        message: Some("hi".to_string()),
    }
}

fn app_doc(message: &str) -> serde_json::Map<String, serde_json::Value> {
    let mut doc = serde_json::Map::new();
    doc.insert("message".to_string(), json!(message));
    doc
}

async fn create_application(
    store: &Store<MemoryStore>,
    candidate_id: i64,
    job_id: i64,
) -> Result<String, TxError> {
    let application = store
        .create_candidate_application_tx(
            application_params(candidate_id, job_id),
            app_doc("hi"),
            |doc_id, app_doc, staged| {
                staged.push(
                    &TaskPayload::CreateCandidateApplication(PayloadCreateApplication {
                        doc_id: doc_id.to_string(),
                        app_doc,
                    }),
                    TaskOptions::default(),
                )?;
                Ok(())
            },
        )
        .await?;
    Ok(application.elasticsearch_doc_id)
}

fn relay(memory: &MemoryStore, broker: &MemoryBroker) -> OutboxRelay {
    OutboxRelay::new(
        Arc::new(memory.clone()),
        TaskDistributor::new(Arc::new(broker.clone())),
        RelayConfig {
            poll_interval: Duration::from_millis(5),
            batch_size: 10,
        },
    )
}

#[tokio::test]
async fn test_relay_publishes_only_committed_entries() {
    let memory = MemoryStore::new();
    let store = Store::new(memory.clone());
    let broker = MemoryBroker::new();

    create_application(&store, 5, 7).await.unwrap();
    memory.fail_next_commit();
    assert!(create_application(&store, 5, 8).await.is_err());

    let published = relay(&memory, &broker).relay_once().await.unwrap();

    assert_eq!(published, 1);
    assert_eq!(memory.unpublished_count().await, 0);
    let tasks = broker.tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Pending);

    let outbox = memory.outbox_entries().await;
    assert_eq!(outbox.len(), 1);
    assert_eq!(memory.published_task_id(outbox[0].id).await, Some(tasks[0].id));
}

#[tokio::test]
async fn test_relay_keeps_entries_while_broker_is_down() {
    let memory = MemoryStore::new();
    let store = Store::new(memory.clone());
    let broker = MemoryBroker::new();
    for job_id in 1..=3 {
        create_application(&store, 5, job_id).await.unwrap();
    }
    let relay = relay(&memory, &broker);

    broker.set_available(false);
    let err = relay.relay_once().await.unwrap_err();
    match err {
        RelayError::Enqueue { error, .. } => assert!(error.is_unavailable()),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(memory.unpublished_count().await, 3);
    assert!(broker.tasks().await.is_empty());

    broker.set_available(true);
    assert_eq!(relay.relay_once().await.unwrap(), 3);
    assert_eq!(memory.unpublished_count().await, 0);

    // Published in outbox id order.
    let tasks = broker.tasks().await;
    let outbox = memory.outbox_entries().await;
    assert_eq!(tasks.len(), 3);
    for (entry, task) in outbox.iter().zip(tasks.iter()) {
        assert_eq!(memory.published_task_id(entry.id).await, Some(task.id));
        assert_eq!(entry.payload, task.payload);
    }
}

#[tokio::test]
async fn test_non_positive_batch_size_still_publishes() {
    let memory = MemoryStore::new();
    let store = Store::new(memory.clone());
    let broker = MemoryBroker::new();
    create_application(&store, 5, 7).await.unwrap();
    create_application(&store, 5, 8).await.unwrap();

    let config = WorkerConfig::from_lookup(|key| match key {
        "DATABASE_URL" => Some("postgres://localhost/ptmr".to_string()),
        "OUTBOX_BATCH_SIZE" => Some("0".to_string()),
        _ => None,
    })
    .unwrap();
    let from_env = OutboxRelay::new(
        Arc::new(memory.clone()),
        TaskDistributor::new(Arc::new(broker.clone())),
        RelayConfig::from(&config),
    );
    assert_eq!(from_env.relay_once().await.unwrap(), 2);

    create_application(&store, 5, 9).await.unwrap();
    let zero = OutboxRelay::new(
        Arc::new(memory.clone()),
        TaskDistributor::new(Arc::new(broker.clone())),
        RelayConfig {
            poll_interval: Duration::from_millis(5),
            batch_size: 0,
        },
    );
    assert_eq!(zero.relay_once().await.unwrap(), 1);
    assert_eq!(memory.unpublished_count().await, 0);
    assert_eq!(broker.tasks().await.len(), 3);
}

#[tokio::test]
async fn test_relay_once_with_empty_outbox_is_noop() {
    let memory = MemoryStore::new();
    let broker = MemoryBroker::new();

    assert_eq!(relay(&memory, &broker).relay_once().await.unwrap(), 0);
    assert!(memory.fetch_unpublished(10).await.unwrap().is_empty());
    assert!(broker.tasks().await.is_empty());
}

#[tokio::test]
async fn test_committed_application_reaches_the_search_index() {
    let memory = MemoryStore::new();
    let store = Store::new(memory.clone());
    let broker = MemoryBroker::new();
    let documents = InMemoryDocumentStore::new();
    let hook = RecordingHook::default();

    let handlers = SideEffectHandlers::new(
        Arc::new(documents.clone()),
        Arc::new(RecordingEmailSender::new()),
    );
    let processor = TaskProcessor::new(Arc::new(broker.clone()), Arc::new(handlers), fast_config(2))
        .with_event_hook(Arc::new(hook.clone()));
    processor.start().await.unwrap();
    let shutdown = CancellationToken::new();
    let relay_task = relay(&memory, &broker).spawn(shutdown.clone());

    let doc_id = create_application(&store, 5, 7).await.unwrap();

    let terminal = hook.wait_for_terminal(1, Duration::from_secs(10)).await;
    shutdown.cancel();
    relay_task.await.unwrap();
    processor.shutdown(Duration::from_secs(1)).await.unwrap();

    assert_eq!(doc_id, "5_7");
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].outcome, TaskOutcome::Completed);
    assert_eq!(
        documents.document(CANDIDATE_APPLICATIONS_INDEX, "5_7").await,
        Some(json!({"message": "hi"}))
    );
    assert_eq!(memory.unpublished_count().await, 0);
    assert_eq!(broker.outstanding().await, 0);
}
