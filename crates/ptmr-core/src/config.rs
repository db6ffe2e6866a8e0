//! Configuration module
//!
//! Worker configuration is read from the environment (after loading `.env` when
//! present). Unparseable numbers fall back to their defaults; only `DATABASE_URL`
//! is mandatory.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::models::QueueName;

const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const ELASTICSEARCH_URL: &str = "http://localhost:9200";
const SMTP_PORT: u16 = 587;
const TASK_CONCURRENCY: usize = 10;
const TASK_POLL_INTERVAL_MS: u64 = 1000;
const TASK_RETRY_BASE_MS: u64 = 1000;
const TASK_RETRY_MAX_SECS: u64 = 300;
const STALE_TASK_REAP_INTERVAL_SECS: u64 = 60;
const STALE_TASK_LEASE_SECS: u64 = 600;
const OUTBOX_POLL_INTERVAL_MS: u64 = 500;
const OUTBOX_BATCH_SIZE: i64 = 100;
const SHUTDOWN_GRACE_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub tls: bool,
    pub sender_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub database_url: String,
    pub broker_database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub elasticsearch_url: String,
    /// `None` when `SMTP_HOST` is unset; verification emails then fail permanently.
    pub smtp: Option<SmtpConfig>,
    pub email_asset_dir: Option<PathBuf>,
    pub task_concurrency: usize,
    pub queue_weights: Vec<(QueueName, u32)>,
    pub task_poll_interval: Duration,
    pub task_retry_base: Duration,
    pub task_retry_max: Duration,
    /// Per-task handler timeout. `None` = no timeout.
    pub task_timeout: Option<Duration>,
    /// `None` disables the stale task reaper.
    pub stale_task_reap_interval: Option<Duration>,
    pub stale_task_lease: Duration,
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: i64,
    pub shutdown_grace: Duration,
    pub log_json: bool,
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Like [`parse_or`], but zero and negative values also fall back to `default`.
fn parse_positive_or(value: Option<String>, default: i64) -> i64 {
    Some(parse_or(value, default))
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = non_empty(lookup("DATABASE_URL"))
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;
        let broker_database_url =
            non_empty(lookup("BROKER_DATABASE_URL")).unwrap_or_else(|| database_url.clone());

        let smtp = non_empty(lookup("SMTP_HOST")).map(|host| SmtpConfig {
            host,
            port: parse_or(lookup("SMTP_PORT"), SMTP_PORT),
            user: non_empty(lookup("SMTP_USER")),
            password: non_empty(lookup("SMTP_PASSWORD")),
            from: non_empty(lookup("SMTP_FROM"))
                .unwrap_or_else(|| "noreply@localhost".to_string()),
            tls: parse_or(lookup("SMTP_TLS"), true),
            sender_name: non_empty(lookup("EMAIL_SENDER_NAME")),
        });

        let queue_weights = vec![
            (
                QueueName::Critical,
                parse_or(
                    lookup("QUEUE_CRITICAL_WEIGHT"),
                    QueueName::Critical.default_weight(),
                ),
            ),
            (
                QueueName::Default,
                parse_or(
                    lookup("QUEUE_DEFAULT_WEIGHT"),
                    QueueName::Default.default_weight(),
                ),
            ),
        ];

        let task_timeout_secs: u64 = parse_or(lookup("TASK_TIMEOUT_SECS"), 0);
        let reap_interval_secs: u64 = parse_or(
            lookup("STALE_TASK_REAP_INTERVAL_SECS"),
            STALE_TASK_REAP_INTERVAL_SECS,
        );

        Ok(Self {
            database_url,
            broker_database_url,
            db_max_connections: parse_or(lookup("DB_MAX_CONNECTIONS"), MAX_CONNECTIONS),
            db_timeout_seconds: parse_or(lookup("DB_TIMEOUT_SECONDS"), CONNECTION_TIMEOUT_SECS),
            elasticsearch_url: non_empty(lookup("ELASTICSEARCH_URL"))
                .unwrap_or_else(|| ELASTICSEARCH_URL.to_string()),
            smtp,
            email_asset_dir: non_empty(lookup("EMAIL_ASSET_DIR")).map(PathBuf::from),
            task_concurrency: parse_or(lookup("TASK_CONCURRENCY"), TASK_CONCURRENCY),
            queue_weights,
            task_poll_interval: Duration::from_millis(parse_or(
                lookup("TASK_POLL_INTERVAL_MS"),
                TASK_POLL_INTERVAL_MS,
            )),
            task_retry_base: Duration::from_millis(parse_or(
                lookup("TASK_RETRY_BASE_MS"),
                TASK_RETRY_BASE_MS,
            )),
            task_retry_max: Duration::from_secs(parse_or(
                lookup("TASK_RETRY_MAX_SECS"),
                TASK_RETRY_MAX_SECS,
            )),
            task_timeout: (task_timeout_secs > 0).then(|| Duration::from_secs(task_timeout_secs)),
            stale_task_reap_interval: (reap_interval_secs > 0)
                .then(|| Duration::from_secs(reap_interval_secs)),
            stale_task_lease: Duration::from_secs(parse_or(
                lookup("STALE_TASK_LEASE_SECS"),
                STALE_TASK_LEASE_SECS,
            )),
            outbox_poll_interval: Duration::from_millis(parse_or(
                lookup("OUTBOX_POLL_INTERVAL_MS"),
                OUTBOX_POLL_INTERVAL_MS,
            )),
            outbox_batch_size: parse_positive_or(lookup("OUTBOX_BATCH_SIZE"), OUTBOX_BATCH_SIZE),
            shutdown_grace: Duration::from_secs(parse_or(
                lookup("SHUTDOWN_GRACE_SECS"),
                SHUTDOWN_GRACE_SECS,
            )),
            log_json: lookup("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}
