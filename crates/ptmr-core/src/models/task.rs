use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

pub type TaskId = Uuid;

/// Every kind of deferred work the worker knows how to perform.
///
/// The wire names (`task:...`) are what the broker stores in its `kind` column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    SendVerifyEmail,
    CreateCandidate,
    UpdateCandidate,
    AddPastExperience,
    UpdatePastExperience,
    DeletePastExperience,
    CreateCandidateApplication,
    CreateEmployerApplication,
    DeleteCandidateApplication,
    DeleteEmployerApplication,
}

impl TaskKind {
    pub const ALL: [TaskKind; 10] = [
        TaskKind::SendVerifyEmail,
        TaskKind::CreateCandidate,
        TaskKind::UpdateCandidate,
        TaskKind::AddPastExperience,
        TaskKind::UpdatePastExperience,
        TaskKind::DeletePastExperience,
        TaskKind::CreateCandidateApplication,
        TaskKind::CreateEmployerApplication,
        TaskKind::DeleteCandidateApplication,
        TaskKind::DeleteEmployerApplication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::SendVerifyEmail => "task:send_verify_email",
            TaskKind::CreateCandidate => "task:create_candidate",
            TaskKind::UpdateCandidate => "task:update_candidate",
            TaskKind::AddPastExperience => "task:add_past_experience",
            TaskKind::UpdatePastExperience => "task:update_past_experience",
            TaskKind::DeletePastExperience => "task:delete_past_experience",
            TaskKind::CreateCandidateApplication => "task:create_candidate_app",
            TaskKind::CreateEmployerApplication => "task:create_employer_app",
            TaskKind::DeleteCandidateApplication => "task:delete_candidate_app",
            TaskKind::DeleteEmployerApplication => "task:delete_employer_app",
        }
    }
}

impl Display for TaskKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Invalid task kind: {}", s))
    }
}

/// Named delivery queues. Each queue gets a share of the worker pool
/// proportional to its weight.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Critical,
    #[default]
    Default,
}

impl QueueName {
    pub const ALL: [QueueName; 2] = [QueueName::Critical, QueueName::Default];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Critical => "critical",
            QueueName::Default => "default",
        }
    }

    pub fn default_weight(&self) -> u32 {
        match self {
            QueueName::Critical => 10,
            QueueName::Default => 5,
        }
    }
}

impl Display for QueueName {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(QueueName::Critical),
            "default" => Ok(QueueName::Default),
            _ => Err(anyhow::anyhow!("Invalid queue name: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Active,
    Retry,
    Archived,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Active => write!(f, "active"),
            TaskStatus::Retry => write!(f, "retry"),
            TaskStatus::Archived => write!(f, "archived"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "active" => Ok(TaskStatus::Active),
            "retry" => Ok(TaskStatus::Retry),
            "archived" => Ok(TaskStatus::Archived),
            _ => Err(anyhow::anyhow!("Invalid task status: {}", s)),
        }
    }
}

pub const DEFAULT_MAX_RETRY: i32 = 3;

/// Delivery policy chosen by the producer at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    pub queue: QueueName,
    pub max_retry: i32,
    pub delay: Duration,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            queue: QueueName::Default,
            max_retry: DEFAULT_MAX_RETRY,
            delay: Duration::ZERO,
        }
    }
}

impl TaskOptions {
    /// Policy for user-visible, consistency-sensitive work (index/delete documents,
    /// verification emails).
    pub fn critical() -> Self {
        Self {
            queue: QueueName::Critical,
            max_retry: 10,
            delay: Duration::from_secs(10),
        }
    }

    /// Policy for lightweight background updates.
    pub fn background() -> Self {
        Self {
            queue: QueueName::Default,
            max_retry: 5,
            delay: Duration::from_secs(5),
        }
    }

    pub fn queue(mut self, queue: QueueName) -> Self {
        self.queue = queue;
        self
    }

    pub fn max_retry(mut self, max_retry: i32) -> Self {
        self.max_retry = max_retry.max(0);
        self
    }

    pub fn process_in(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// First instant at which the task may be delivered.
    pub fn process_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.delay).unwrap_or(chrono::Duration::zero())
    }
}

/// A task as handed to the broker by the distributor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub kind: TaskKind,
    pub payload: Vec<u8>,
    pub options: TaskOptions,
}

/// What the broker reports back after accepting a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub kind: TaskKind,
    pub queue: QueueName,
    pub max_retry: i32,
    pub process_at: DateTime<Utc>,
}

/// A task as stored by the broker.
///
/// `kind` stays the raw wire string: a row written by a newer producer may carry a
/// kind this worker does not know, which the processor treats as a permanent failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub kind: String,
    pub payload: Vec<u8>,
    pub queue: QueueName,
    pub status: TaskStatus,
    pub retried: i32,
    pub max_retry: i32,
    pub process_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Task {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Task {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            payload: row.try_get("payload")?,
            queue: row.try_get::<String, _>("queue")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse queue: {}", e).into())
            })?,
            status: row.try_get::<String, _>("status")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse task status: {}", e).into())
            })?,
            retried: row.try_get("retried")?,
            max_retry: row.try_get("max_retry")?,
            process_at: row.try_get("process_at")?,
            last_error: row.try_get("last_error")?,
            started_at: row.try_get("started_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl Task {
    pub fn is_ready_to_run(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Retry) && self.process_at <= now
    }

    pub fn can_retry(&self) -> bool {
        self.retried < self.max_retry
    }
}
