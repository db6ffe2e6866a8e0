use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use ptmr_core::WorkerConfig;
use ptmr_db::{PgStore, PgTaskBroker};
use ptmr_services::{DisabledEmailSender, ElasticsearchClient, EmailSender, SmtpEmailSender};
use ptmr_worker::telemetry::init_telemetry;
use ptmr_worker::{
    OutboxRelay, ProcessorConfig, RelayConfig, SideEffectHandlers, TaskDistributor,
    TaskProcessor,
};

async fn connect(url: &str, config: &WorkerConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(url)
        .await?;
    Ok(pool)
}

async fn shutdown_signal() -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = ctrl_c => {
                result.context("Failed to listen for Ctrl+C")?;
                tracing::info!("Received Ctrl+C signal");
            }
            _ = terminate.recv() => {
                tracing::info!("Received terminate signal");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.context("Failed to listen for Ctrl+C")?;
        tracing::info!("Received Ctrl+C signal");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = WorkerConfig::from_env().context("Failed to load configuration")?;
    init_telemetry(config.log_json)?;

    tracing::info!("Connecting to database...");
    let db_pool = connect(&config.database_url, &config)
        .await
        .context("Failed to connect to database")?;
    let store = PgStore::new(db_pool);
    store.migrate().await.context("Failed to run database migrations")?;
    tracing::info!(
        max_connections = config.db_max_connections,
        "Database connected, migrations applied"
    );

    let broker_pool = if config.broker_database_url == config.database_url {
        store.pool().clone()
    } else {
        let pool = connect(&config.broker_database_url, &config)
            .await
            .context("Failed to connect to broker database")?;
        PgStore::new(pool.clone())
            .migrate()
            .await
            .context("Failed to run broker database migrations")?;
        pool
    };
    let broker = Arc::new(PgTaskBroker::new(broker_pool));

    let documents = Arc::new(
        ElasticsearchClient::new(&config.elasticsearch_url)
            .context("Invalid ELASTICSEARCH_URL")?,
    );
    let mailer: Arc<dyn EmailSender> = match &config.smtp {
        Some(smtp) => Arc::new(
            SmtpEmailSender::from_config(smtp).context("Failed to configure SMTP sender")?,
        ),
        None => {
            tracing::warn!("SMTP_HOST not set, verification emails will be archived");
            Arc::new(DisabledEmailSender)
        }
    };
    let mut handlers = SideEffectHandlers::new(documents, mailer);
    if let Some(dir) = &config.email_asset_dir {
        handlers = handlers.with_email_asset_dir(dir);
    }

    let processor = TaskProcessor::new(
        broker.clone(),
        Arc::new(handlers),
        ProcessorConfig::from(&config),
    );
    processor.start().await.context("Failed to start task processor")?;

    let relay_shutdown = CancellationToken::new();
    let relay = OutboxRelay::new(
        Arc::new(store),
        TaskDistributor::new(broker),
        RelayConfig::from(&config),
    )
    .spawn(relay_shutdown.clone());

    shutdown_signal().await?;
    tracing::info!("Shutting down gracefully...");

    relay_shutdown.cancel();
    if let Err(e) = relay.await {
        tracing::error!(error = %e, "Outbox relay exited abnormally");
    }
    processor
        .shutdown(config.shutdown_grace)
        .await
        .context("Failed to shut down task processor")?;

    Ok(())
}
