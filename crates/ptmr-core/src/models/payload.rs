//! Typed task payloads and their wire encoding.
//!
//! Payloads travel as a JSON envelope `{"v": 1, "kind": "task:...", "data": {...}}`.
//! The envelope names its own kind and version so a worker can reject bytes that
//! were produced for another kind or by an incompatible producer.

use serde::{Deserialize, Serialize};

use super::{Candidate, PastExperience, TaskKind};
use crate::error::PayloadError;

pub const PAYLOAD_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSendVerifyEmail {
    pub name: String,
    pub email: String,
    pub verification_link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadCandidate {
    pub candidate: Candidate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadPastExperience {
    pub past_experience: PastExperience,
    pub user_uid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDeletePastExperience {
    pub past_experience_id: String,
    pub user_uid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadCreateApplication {
    pub doc_id: String,
    pub app_doc: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDeleteApplication {
    pub doc_id: String,
}

/// A decoded payload. The variant determines the task kind, so a payload can
/// never be enqueued or dispatched under the wrong kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPayload {
    SendVerifyEmail(PayloadSendVerifyEmail),
    CreateCandidate(PayloadCandidate),
    UpdateCandidate(PayloadCandidate),
    AddPastExperience(PayloadPastExperience),
    UpdatePastExperience(PayloadPastExperience),
    DeletePastExperience(PayloadDeletePastExperience),
    CreateCandidateApplication(PayloadCreateApplication),
    CreateEmployerApplication(PayloadCreateApplication),
    DeleteCandidateApplication(PayloadDeleteApplication),
    DeleteEmployerApplication(PayloadDeleteApplication),
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    v: u16,
    kind: &'a str,
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    v: u16,
    kind: String,
    data: serde_json::Value,
}

fn encode_data<T: Serialize>(kind: TaskKind, data: &T) -> Result<Vec<u8>, PayloadError> {
    serde_json::to_vec(&EnvelopeRef {
        v: PAYLOAD_VERSION,
        kind: kind.as_str(),
        data,
    })
    .map_err(PayloadError::Encode)
}

fn decode_data<T: for<'de> Deserialize<'de>>(
    kind: TaskKind,
    data: serde_json::Value,
) -> Result<T, PayloadError> {
    serde_json::from_value(data).map_err(|source| PayloadError::Decode { kind, source })
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::SendVerifyEmail(_) => TaskKind::SendVerifyEmail,
            TaskPayload::CreateCandidate(_) => TaskKind::CreateCandidate,
            TaskPayload::UpdateCandidate(_) => TaskKind::UpdateCandidate,
            TaskPayload::AddPastExperience(_) => TaskKind::AddPastExperience,
            TaskPayload::UpdatePastExperience(_) => TaskKind::UpdatePastExperience,
            TaskPayload::DeletePastExperience(_) => TaskKind::DeletePastExperience,
            TaskPayload::CreateCandidateApplication(_) => TaskKind::CreateCandidateApplication,
            TaskPayload::CreateEmployerApplication(_) => TaskKind::CreateEmployerApplication,
            TaskPayload::DeleteCandidateApplication(_) => TaskKind::DeleteCandidateApplication,
            TaskPayload::DeleteEmployerApplication(_) => TaskKind::DeleteEmployerApplication,
        }
    }

    /// Identifier of the entity the side effect targets (document id, user uid or
    /// recipient), for logs.
    pub fn target_id(&self) -> &str {
        match self {
            TaskPayload::SendVerifyEmail(p) => &p.email,
            TaskPayload::CreateCandidate(p) | TaskPayload::UpdateCandidate(p) => {
                &p.candidate.user_uid
            }
            TaskPayload::AddPastExperience(p) | TaskPayload::UpdatePastExperience(p) => {
                &p.user_uid
            }
            TaskPayload::DeletePastExperience(p) => &p.user_uid,
            TaskPayload::CreateCandidateApplication(p)
            | TaskPayload::CreateEmployerApplication(p) => &p.doc_id,
            TaskPayload::DeleteCandidateApplication(p)
            | TaskPayload::DeleteEmployerApplication(p) => &p.doc_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        let kind = self.kind();
        match self {
            TaskPayload::SendVerifyEmail(p) => encode_data(kind, p),
            TaskPayload::CreateCandidate(p) | TaskPayload::UpdateCandidate(p) => {
                encode_data(kind, p)
            }
            TaskPayload::AddPastExperience(p) | TaskPayload::UpdatePastExperience(p) => {
                encode_data(kind, p)
            }
            TaskPayload::DeletePastExperience(p) => encode_data(kind, p),
            TaskPayload::CreateCandidateApplication(p)
            | TaskPayload::CreateEmployerApplication(p) => encode_data(kind, p),
            TaskPayload::DeleteCandidateApplication(p)
            | TaskPayload::DeleteEmployerApplication(p) => encode_data(kind, p),
        }
    }

    /// Decode bytes stored under `kind`. Every call allocates a fresh value.
    pub fn decode(kind: TaskKind, bytes: &[u8]) -> Result<TaskPayload, PayloadError> {
        let envelope: Envelope = serde_json::from_slice(bytes).map_err(PayloadError::Envelope)?;
        if envelope.v != PAYLOAD_VERSION {
            return Err(PayloadError::UnsupportedVersion(envelope.v));
        }
        if envelope.kind != kind.as_str() {
            return Err(PayloadError::KindMismatch {
                expected: kind,
                found: envelope.kind,
            });
        }

        let data = envelope.data;
        Ok(match kind {
            TaskKind::SendVerifyEmail => TaskPayload::SendVerifyEmail(decode_data(kind, data)?),
            TaskKind::CreateCandidate => TaskPayload::CreateCandidate(decode_data(kind, data)?),
            TaskKind::UpdateCandidate => TaskPayload::UpdateCandidate(decode_data(kind, data)?),
            TaskKind::AddPastExperience => {
                TaskPayload::AddPastExperience(decode_data(kind, data)?)
            }
            TaskKind::UpdatePastExperience => {
                TaskPayload::UpdatePastExperience(decode_data(kind, data)?)
            }
            TaskKind::DeletePastExperience => {
                TaskPayload::DeletePastExperience(decode_data(kind, data)?)
            }
            TaskKind::CreateCandidateApplication => {
                TaskPayload::CreateCandidateApplication(decode_data(kind, data)?)
            }
            TaskKind::CreateEmployerApplication => {
                TaskPayload::CreateEmployerApplication(decode_data(kind, data)?)
            }
            TaskKind::DeleteCandidateApplication => {
                TaskPayload::DeleteCandidateApplication(decode_data(kind, data)?)
            }
            TaskKind::DeleteEmployerApplication => {
                TaskPayload::DeleteEmployerApplication(decode_data(kind, data)?)
            }
        })
    }
}
