//! In-memory transaction executor
//!
//! Transactions are serialized by a single lock and operate on a copy of the
//! tables; commit swaps the copy in, rollback drops it. Used by tests and local
//! runs without Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use ptmr_core::models::{
    application_doc_id, ApplicationStatus, Candidate, CandidateApplication, CandidateSwipe,
    EmployerApplication, EmployerSwipe, PastExperience, TaskId,
};
use ptmr_core::{NewOutboxEntry, OutboxEntry, OutboxSource};

use super::error::DbError;
use super::queries::{
    CreateApplicationParams, CreateCandidateParams, CreatePastExperienceParams,
    DeletePastExperienceParams, OutboxWriter, Queries, UpdateCandidateParams,
    UpdatePastExperienceParams,
};
use super::transaction::TransactionExecutor;

#[derive(Debug, Clone)]
struct OutboxRow {
    entry: OutboxEntry,
    published_at: Option<DateTime<Utc>>,
    task_id: Option<TaskId>,
}

#[derive(Debug, Clone, Default)]
struct MemoryTables {
    next_id: i64,
    candidates: BTreeMap<i64, Candidate>,
    past_experiences: BTreeMap<i64, PastExperience>,
    candidate_applications: BTreeMap<i64, CandidateApplication>,
    employer_applications: BTreeMap<i64, EmployerApplication>,
    candidate_swipes: Vec<CandidateSwipe>,
    employer_swipes: Vec<EmployerSwipe>,
    outbox: BTreeMap<i64, OutboxRow>,
}

impl MemoryTables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<MemoryTables>>,
    fail_next_commit: Arc<AtomicBool>,
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryTables>,
    working: MemoryTables,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail after every statement of the transaction succeeded.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub async fn candidates(&self) -> Vec<Candidate> {
        self.tables.lock().await.candidates.values().cloned().collect()
    }

    pub async fn past_experiences(&self) -> Vec<PastExperience> {
        self.tables
            .lock()
            .await
            .past_experiences
            .values()
            .cloned()
            .collect()
    }

    pub async fn candidate_application(&self, doc_id: &str) -> Option<CandidateApplication> {
        self.tables
            .lock()
            .await
            .candidate_applications
            .values()
            .find(|a| a.elasticsearch_doc_id == doc_id)
            .cloned()
    }

    pub async fn employer_application(&self, doc_id: &str) -> Option<EmployerApplication> {
        self.tables
            .lock()
            .await
            .employer_applications
            .values()
            .find(|a| a.elasticsearch_doc_id == doc_id)
            .cloned()
    }

    pub async fn candidate_swipes(&self) -> Vec<CandidateSwipe> {
        self.tables.lock().await.candidate_swipes.clone()
    }

    pub async fn employer_swipes(&self) -> Vec<EmployerSwipe> {
        self.tables.lock().await.employer_swipes.clone()
    }

    /// Every committed outbox entry, published or not, in id order.
    pub async fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.tables
            .lock()
            .await
            .outbox
            .values()
            .map(|row| row.entry.clone())
            .collect()
    }

    pub async fn published_task_id(&self, outbox_id: i64) -> Option<TaskId> {
        self.tables
            .lock()
            .await
            .outbox
            .get(&outbox_id)
            .and_then(|row| row.task_id)
    }

    pub async fn unpublished_count(&self) -> usize {
        self.tables
            .lock()
            .await
            .outbox
            .values()
            .filter(|row| row.published_at.is_none())
            .count()
    }
}

#[async_trait]
impl TransactionExecutor for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, DbError> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTx { guard, working })
    }

    async fn commit(&self, tx: MemoryTx) -> Result<(), DbError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(DbError::Unavailable(
                "connection lost during commit".to_string(),
            ));
        }
        let MemoryTx { mut guard, working } = tx;
        *guard = working;
        Ok(())
    }

    async fn rollback(&self, _tx: MemoryTx) -> Result<(), DbError> {
        Ok(())
    }
}

fn find_candidate_application<'a>(
    tables: &'a mut MemoryTables,
    doc_id: &str,
) -> Option<&'a mut CandidateApplication> {
    tables
        .candidate_applications
        .values_mut()
        .find(|a| a.elasticsearch_doc_id == doc_id)
}

fn find_employer_application<'a>(
    tables: &'a mut MemoryTables,
    doc_id: &str,
) -> Option<&'a mut EmployerApplication> {
    tables
        .employer_applications
        .values_mut()
        .find(|a| a.elasticsearch_doc_id == doc_id)
}

#[async_trait]
impl Queries for MemoryTx {
    async fn create_candidate(
        &mut self,
        params: CreateCandidateParams,
    ) -> Result<Candidate, DbError> {
        let tables = &mut self.working;
        if tables
            .candidates
            .values()
            .any(|c| c.user_uid == params.user_uid)
        {
            return Err(DbError::Conflict("candidate"));
        }
        let now = Utc::now();
        let candidate = Candidate {
            id: tables.next_id(),
            user_uid: params.user_uid,
            full_name: params.full_name,
            email: params.email,
            education: params.education,
            about_me: params.about_me,
            created_at: now,
            updated_at: now,
        };
        tables.candidates.insert(candidate.id, candidate.clone());
        Ok(candidate)
    }

    async fn update_candidate(
        &mut self,
        params: UpdateCandidateParams,
    ) -> Result<Candidate, DbError> {
        let candidate = self
            .working
            .candidates
            .values_mut()
            .find(|c| c.user_uid == params.user_uid)
            .ok_or(DbError::NotFound("candidate"))?;
        candidate.full_name = params.full_name;
        candidate.education = params.education;
        candidate.about_me = params.about_me;
        candidate.updated_at = Utc::now();
        Ok(candidate.clone())
    }

    async fn create_past_experience(
        &mut self,
        params: CreatePastExperienceParams,
    ) -> Result<PastExperience, DbError> {
        let tables = &mut self.working;
        if !tables.candidates.contains_key(&params.candidate_id) {
            return Err(DbError::NotFound("candidate"));
        }
        let experience = PastExperience {
            id: tables.next_id(),
            candidate_id: params.candidate_id,
            industry: params.industry,
            job_title: params.job_title,
            employer: params.employer,
            start_date: params.start_date,
            end_date: params.end_date,
            present: params.present,
            description: params.description,
            created_at: Utc::now(),
        };
        tables
            .past_experiences
            .insert(experience.id, experience.clone());
        Ok(experience)
    }

    async fn update_past_experience(
        &mut self,
        params: UpdatePastExperienceParams,
    ) -> Result<PastExperience, DbError> {
        let experience = self
            .working
            .past_experiences
            .get_mut(&params.id)
            .filter(|e| e.candidate_id == params.candidate_id)
            .ok_or(DbError::NotFound("past experience"))?;
        experience.industry = params.industry;
        experience.job_title = params.job_title;
        experience.employer = params.employer;
        experience.start_date = params.start_date;
        experience.end_date = params.end_date;
        experience.present = params.present;
        experience.description = params.description;
        Ok(experience.clone())
    }

    async fn delete_past_experience(
        &mut self,
        params: DeletePastExperienceParams,
    ) -> Result<(), DbError> {
        let owned = self
            .working
            .past_experiences
            .get(&params.id)
            .is_some_and(|e| e.candidate_id == params.candidate_id);
        if !owned {
            return Err(DbError::NotFound("past experience"));
        }
        self.working.past_experiences.remove(&params.id);
        Ok(())
    }

    async fn create_candidate_application(
        &mut self,
        params: CreateApplicationParams,
    ) -> Result<CandidateApplication, DbError> {
        let tables = &mut self.working;
        let doc_id = application_doc_id(params.candidate_id, params.job_id);
        if find_candidate_application(tables, &doc_id).is_some() {
            return Err(DbError::Conflict("candidate application"));
        }
        let application = CandidateApplication {
            id: tables.next_id(),
            candidate_id: params.candidate_id,
            employer_id: params.employer_id,
            job_id: params.job_id,
            message: params.message,
            status: ApplicationStatus::Pending,
            elasticsearch_doc_id: doc_id,
            created_at: Utc::now(),
        };
        tables
            .candidate_applications
            .insert(application.id, application.clone());
        Ok(application)
    }

    async fn create_employer_application(
        &mut self,
        params: CreateApplicationParams,
    ) -> Result<EmployerApplication, DbError> {
        let tables = &mut self.working;
        let doc_id = application_doc_id(params.candidate_id, params.job_id);
        if find_employer_application(tables, &doc_id).is_some() {
            return Err(DbError::Conflict("employer application"));
        }
        let application = EmployerApplication {
            id: tables.next_id(),
            employer_id: params.employer_id,
            candidate_id: params.candidate_id,
            job_id: params.job_id,
            message: params.message,
            status: ApplicationStatus::Pending,
            elasticsearch_doc_id: doc_id,
            created_at: Utc::now(),
        };
        tables
            .employer_applications
            .insert(application.id, application.clone());
        Ok(application)
    }

    async fn delete_candidate_application(&mut self, doc_id: &str) -> Result<(), DbError> {
        let id = find_candidate_application(&mut self.working, doc_id)
            .map(|a| a.id)
            .ok_or(DbError::NotFound("candidate application"))?;
        self.working.candidate_applications.remove(&id);
        Ok(())
    }

    async fn delete_employer_application(&mut self, doc_id: &str) -> Result<(), DbError> {
        let id = find_employer_application(&mut self.working, doc_id)
            .map(|a| a.id)
            .ok_or(DbError::NotFound("employer application"))?;
        self.working.employer_applications.remove(&id);
        Ok(())
    }

    async fn update_candidate_application_status(
        &mut self,
        doc_id: &str,
        status: ApplicationStatus,
    ) -> Result<CandidateApplication, DbError> {
        let application = find_candidate_application(&mut self.working, doc_id)
            .ok_or(DbError::NotFound("candidate application"))?;
        application.status = status;
        Ok(application.clone())
    }

    async fn update_employer_application_status(
        &mut self,
        doc_id: &str,
        status: ApplicationStatus,
    ) -> Result<EmployerApplication, DbError> {
        let application = find_employer_application(&mut self.working, doc_id)
            .ok_or(DbError::NotFound("employer application"))?;
        application.status = status;
        Ok(application.clone())
    }

    async fn create_candidate_swipe(&mut self, swipe: &CandidateSwipe) -> Result<(), DbError> {
        self.working.candidate_swipes.push(swipe.clone());
        Ok(())
    }

    async fn create_employer_swipe(&mut self, swipe: &EmployerSwipe) -> Result<(), DbError> {
        self.working.employer_swipes.push(swipe.clone());
        Ok(())
    }
}

#[async_trait]
impl OutboxWriter for MemoryTx {
    async fn stage(&mut self, entry: NewOutboxEntry) -> Result<i64, DbError> {
        let id = self.working.next_id();
        self.working.outbox.insert(
            id,
            OutboxRow {
                entry: OutboxEntry {
                    id,
                    kind: entry.kind,
                    payload: entry.payload,
                    options: entry.options,
                    created_at: Utc::now(),
                },
                published_at: None,
                task_id: None,
            },
        );
        Ok(id)
    }
}

#[async_trait]
impl OutboxSource for MemoryStore {
    async fn fetch_unpublished(&self, limit: i64) -> anyhow::Result<Vec<OutboxEntry>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .tables
            .lock()
            .await
            .outbox
            .values()
            .filter(|row| row.published_at.is_none())
            .take(limit)
            .map(|row| row.entry.clone())
            .collect())
    }

    async fn mark_published(&self, id: i64, task_id: TaskId) -> anyhow::Result<()> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .outbox
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("outbox entry {} not found", id))?;
        row.published_at = Some(Utc::now());
        row.task_id = Some(task_id);
        Ok(())
    }
}
