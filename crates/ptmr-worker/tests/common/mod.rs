#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use ptmr_core::models::{PayloadCreateApplication, QueueName, TaskOptions, TaskPayload};
use ptmr_worker::{ProcessorConfig, TaskEvent, TaskEventHook, TaskOutcome};

/// Collects every event the processor reports.
#[derive(Clone, Default)]
pub struct RecordingHook {
    events: Arc<Mutex<Vec<TaskEvent>>>,
}

#[async_trait]
impl TaskEventHook for RecordingHook {
    async fn on_event(&self, event: &TaskEvent) {
        self.events.lock().await.push(event.clone());
    }
}

impl RecordingHook {
    pub async fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().await.clone()
    }

    /// Events whose outcome ends the task (completed or dead).
    pub async fn terminal(&self) -> Vec<TaskEvent> {
        self.events()
            .await
            .into_iter()
            .filter(|e| !matches!(e.outcome, TaskOutcome::Retried { .. }))
            .collect()
    }

    /// Wait until at least `count` terminal events were reported.
    pub async fn wait_for_terminal(&self, count: usize, timeout: Duration) -> Vec<TaskEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let terminal = self.terminal().await;
            if terminal.len() >= count || Instant::now() >= deadline {
                return terminal;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub fn fast_config(concurrency: usize) -> ProcessorConfig {
    ProcessorConfig {
        concurrency,
        poll_interval: Duration::from_millis(5),
        retry_base: Duration::from_millis(1),
        retry_max: Duration::from_millis(10),
        stale_reap_interval: None,
        ..Default::default()
    }
}

pub fn immediate(queue: QueueName, max_retry: i32) -> TaskOptions {
    TaskOptions::default().queue(queue).max_retry(max_retry)
}

pub fn create_application(doc_id: &str, message: &str) -> PayloadCreateApplication {
    let mut app_doc = serde_json::Map::new();
    app_doc.insert("message".to_string(), json!(message));
    PayloadCreateApplication {
        doc_id: doc_id.to_string(),
        app_doc,
    }
}

pub fn create_candidate_application(doc_id: &str, message: &str) -> TaskPayload {
    TaskPayload::CreateCandidateApplication(create_application(doc_id, message))
}
