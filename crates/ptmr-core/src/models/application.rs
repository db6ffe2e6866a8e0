use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "application_status", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Rejected,
}

impl Display for ApplicationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ApplicationStatus::Pending => write!(f, "pending"),
            ApplicationStatus::Accepted => write!(f, "accepted"),
            ApplicationStatus::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "swipe", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum Swipe {
    Accept,
    Reject,
}

impl Swipe {
    /// Only a decided application produces a swipe.
    pub fn from_status(status: ApplicationStatus) -> Option<Swipe> {
        match status {
            ApplicationStatus::Accepted => Some(Swipe::Accept),
            ApplicationStatus::Rejected => Some(Swipe::Reject),
            ApplicationStatus::Pending => None,
        }
    }
}

/// Search document id shared by the relational row and the applications index.
pub fn application_doc_id(candidate_id: i64, job_id: i64) -> String {
    format!("{}_{}", candidate_id, job_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CandidateApplication {
    pub id: i64,
    pub candidate_id: i64,
    pub employer_id: i64,
    pub job_id: i64,
    pub message: Option<String>,
    pub status: ApplicationStatus,
    pub elasticsearch_doc_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct EmployerApplication {
    pub id: i64,
    pub employer_id: i64,
    pub candidate_id: i64,
    pub job_id: i64,
    pub message: Option<String>,
    pub status: ApplicationStatus,
    pub elasticsearch_doc_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CandidateSwipe {
    pub candidate_id: i64,
    pub job_id: String,
    pub swipe: Swipe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct EmployerSwipe {
    pub employer_id: i64,
    pub candidate_id: i64,
    pub swipe: Swipe,
}
