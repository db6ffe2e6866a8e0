//! Task distributor (producer side)

use std::sync::Arc;

use ptmr_core::models::{
    NewTask, PayloadCandidate, PayloadCreateApplication, PayloadDeleteApplication,
    PayloadDeletePastExperience, PayloadPastExperience, PayloadSendVerifyEmail, TaskInfo,
    TaskKind, TaskOptions, TaskPayload,
};
use ptmr_core::{BrokerError, PayloadError, TaskBroker};

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("failed to encode {kind} payload: {source}")]
    Encode {
        kind: TaskKind,
        #[source]
        source: PayloadError,
    },

    #[error("failed to enqueue {kind} task: {source}")]
    Broker {
        kind: TaskKind,
        #[source]
        source: BrokerError,
    },
}

impl EnqueueError {
    pub fn kind(&self) -> TaskKind {
        match self {
            EnqueueError::Encode { kind, .. } | EnqueueError::Broker { kind, .. } => *kind,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, EnqueueError::Broker { source, .. } if source.is_unavailable())
    }
}

/// Hands encoded tasks to the broker. Cheap to clone; every clone shares the
/// same broker handle.
#[derive(Clone)]
pub struct TaskDistributor {
    broker: Arc<dyn TaskBroker>,
}

impl TaskDistributor {
    pub fn new(broker: Arc<dyn TaskBroker>) -> Self {
        Self { broker }
    }

    /// Encode `payload` and enqueue it under the kind the payload belongs to.
    pub async fn enqueue(
        &self,
        payload: &TaskPayload,
        options: TaskOptions,
    ) -> Result<TaskInfo, EnqueueError> {
        let kind = payload.kind();
        let bytes = payload
            .encode()
            .map_err(|source| EnqueueError::Encode { kind, source })?;
        self.enqueue_encoded(kind, bytes, options).await
    }

    /// Enqueue bytes that were already encoded, e.g. a staged outbox entry.
    #[tracing::instrument(skip(self, payload, options), fields(task.kind = %kind, queue = %options.queue, max_retry = options.max_retry))]
    pub async fn enqueue_encoded(
        &self,
        kind: TaskKind,
        payload: Vec<u8>,
        options: TaskOptions,
    ) -> Result<TaskInfo, EnqueueError> {
        let info = self
            .broker
            .enqueue(NewTask {
                kind,
                payload,
                options,
            })
            .await
            .map_err(|source| {
                tracing::error!(error = %source, "Failed to enqueue task");
                EnqueueError::Broker { kind, source }
            })?;

        tracing::info!(
            task.id = %info.id,
            process_at = %info.process_at,
            "Enqueued task"
        );
        Ok(info)
    }

    pub async fn enqueue_send_verify_email(
        &self,
        payload: PayloadSendVerifyEmail,
        options: TaskOptions,
    ) -> Result<TaskInfo, EnqueueError> {
        self.enqueue(&TaskPayload::SendVerifyEmail(payload), options)
            .await
    }

    pub async fn enqueue_create_candidate(
        &self,
        payload: PayloadCandidate,
        options: TaskOptions,
    ) -> Result<TaskInfo, EnqueueError> {
        self.enqueue(&TaskPayload::CreateCandidate(payload), options)
            .await
    }

    pub async fn enqueue_update_candidate(
        &self,
        payload: PayloadCandidate,
        options: TaskOptions,
    ) -> Result<TaskInfo, EnqueueError> {
        self.enqueue(&TaskPayload::UpdateCandidate(payload), options)
            .await
    }

    pub async fn enqueue_add_past_experience(
        &self,
        payload: PayloadPastExperience,
        options: TaskOptions,
    ) -> Result<TaskInfo, EnqueueError> {
        self.enqueue(&TaskPayload::AddPastExperience(payload), options)
            .await
    }

    pub async fn enqueue_update_past_experience(
        &self,
        payload: PayloadPastExperience,
        options: TaskOptions,
    ) -> Result<TaskInfo, EnqueueError> {
        self.enqueue(&TaskPayload::UpdatePastExperience(payload), options)
            .await
    }

    pub async fn enqueue_delete_past_experience(
        &self,
        payload: PayloadDeletePastExperience,
        options: TaskOptions,
    ) -> Result<TaskInfo, EnqueueError> {
        self.enqueue(&TaskPayload::DeletePastExperience(payload), options)
            .await
    }

    pub async fn enqueue_create_candidate_application(
        &self,
        payload: PayloadCreateApplication,
        options: TaskOptions,
    ) -> Result<TaskInfo, EnqueueError> {
        self.enqueue(&TaskPayload::CreateCandidateApplication(payload), options)
            .await
    }

    pub async fn enqueue_create_employer_application(
        &self,
        payload: PayloadCreateApplication,
        options: TaskOptions,
    ) -> Result<TaskInfo, EnqueueError> {
        self.enqueue(&TaskPayload::CreateEmployerApplication(payload), options)
            .await
    }

    pub async fn enqueue_delete_candidate_application(
        &self,
        payload: PayloadDeleteApplication,
        options: TaskOptions,
    ) -> Result<TaskInfo, EnqueueError> {
        self.enqueue(&TaskPayload::DeleteCandidateApplication(payload), options)
            .await
    }

    pub async fn enqueue_delete_employer_application(
        &self,
        payload: PayloadDeleteApplication,
        options: TaskOptions,
    ) -> Result<TaskInfo, EnqueueError> {
        self.enqueue(&TaskPayload::DeleteEmployerApplication(payload), options)
            .await
    }
}
