//! Typed relational operations available inside an open transaction.

use async_trait::async_trait;
use chrono::NaiveDate;

use ptmr_core::models::{
    ApplicationStatus, Candidate, CandidateApplication, CandidateSwipe, EmployerApplication,
    EmployerSwipe, PastExperience,
};
use ptmr_core::NewOutboxEntry;

use super::error::DbError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCandidateParams {
    pub user_uid: String,
    pub full_name: String,
    pub email: String,
    pub education: Option<String>,
    pub about_me: Option<String>,
}

/// Updates the profile of the candidate owned by `user_uid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCandidateParams {
    pub user_uid: String,
    pub full_name: String,
    pub education: Option<String>,
    pub about_me: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePastExperienceParams {
    pub candidate_id: i64,
    pub industry: String,
    pub job_title: String,
    pub employer: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub present: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePastExperienceParams {
    pub id: i64,
    pub candidate_id: i64,
    pub industry: String,
    pub job_title: String,
    pub employer: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub present: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletePastExperienceParams {
    pub id: i64,
    pub candidate_id: i64,
}

/// Identifiers of a removed past experience row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletedPastExperience {
    pub candidate_id: i64,
    pub past_experience_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateApplicationParams {
    pub candidate_id: i64,
    pub employer_id: i64,
    pub job_id: i64,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteApplicationParams {
    pub is_employer: bool,
    pub doc_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateApplicationStatusParams {
    pub doc_id: String,
    pub status: ApplicationStatus,
}

#[async_trait]
pub trait Queries: Send {
    async fn create_candidate(
        &mut self,
        params: CreateCandidateParams,
    ) -> Result<Candidate, DbError>;

    async fn update_candidate(
        &mut self,
        params: UpdateCandidateParams,
    ) -> Result<Candidate, DbError>;

    async fn create_past_experience(
        &mut self,
        params: CreatePastExperienceParams,
    ) -> Result<PastExperience, DbError>;

    async fn update_past_experience(
        &mut self,
        params: UpdatePastExperienceParams,
    ) -> Result<PastExperience, DbError>;

    async fn delete_past_experience(
        &mut self,
        params: DeletePastExperienceParams,
    ) -> Result<(), DbError>;

    async fn create_candidate_application(
        &mut self,
        params: CreateApplicationParams,
    ) -> Result<CandidateApplication, DbError>;

    async fn create_employer_application(
        &mut self,
        params: CreateApplicationParams,
    ) -> Result<EmployerApplication, DbError>;

    async fn delete_candidate_application(&mut self, doc_id: &str) -> Result<(), DbError>;

    async fn delete_employer_application(&mut self, doc_id: &str) -> Result<(), DbError>;

    async fn update_candidate_application_status(
        &mut self,
        doc_id: &str,
        status: ApplicationStatus,
    ) -> Result<CandidateApplication, DbError>;

    async fn update_employer_application_status(
        &mut self,
        doc_id: &str,
        status: ApplicationStatus,
    ) -> Result<EmployerApplication, DbError>;

    async fn create_candidate_swipe(&mut self, swipe: &CandidateSwipe) -> Result<(), DbError>;

    async fn create_employer_swipe(&mut self, swipe: &EmployerSwipe) -> Result<(), DbError>;
}

/// Write side of the task outbox. Staged rows share the fate of the transaction.
#[async_trait]
pub trait OutboxWriter: Send {
    async fn stage(&mut self, entry: NewOutboxEntry) -> Result<i64, DbError>;
}
