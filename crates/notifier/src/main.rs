use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use herald_common::config::AppConfig;
use herald_common::db;
use herald_notifier::coordinator::{CoordinatorConfig, DeliveryCoordinator};
use herald_notifier::queue::RedisStreamQueue;
use herald_notifier::sender::{LogSender, Sender, WebhookSender};
use herald_notifier::store::{PgRecordStore, RecordStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_notifier=info,herald_common=info".into()),
        )
        .json()
        .init();

    tracing::info!("Herald notifier starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    if config.run_migrations {
        sqlx::migrate!("../../migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");
    }
    db::verify_schema(&pool).await?;

    let store: Arc<dyn RecordStore> = Arc::new(PgRecordStore::new(pool));

    let sender: Arc<dyn Sender> = match &config.webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Delivering notifications via webhook");
            Arc::new(WebhookSender::new(
                url.clone(),
                Duration::from_millis(config.webhook_timeout_ms),
            )?)
        }
        None => {
            tracing::info!("No WEBHOOK_URL set, simulating delivery");
            Arc::new(LogSender)
        }
    };

    let settings = CoordinatorConfig::from(&config);

    // One queue connection per worker; blocking reads must not share a connection
    let mut workers = JoinSet::new();
    for n in 1..=config.worker_concurrency {
        let consumer = format!("{}-{}", config.consumer_name, n);
        let queue = RedisStreamQueue::connect(
            &config.redis_url,
            &config.queue_stream,
            &config.queue_group,
            &consumer,
            config.queue_block_ms,
        )
        .await?
        .with_claim_idle(Duration::from_millis(config.queue_claim_idle_ms));

        let coordinator =
            DeliveryCoordinator::new(Arc::new(queue), store.clone(), sender.clone(), settings.clone());
        workers.spawn(async move { coordinator.run().await });
    }

    tracing::info!(
        workers = config.worker_concurrency,
        consumer = %config.consumer_name,
        stream = %config.queue_stream,
        group = %config.queue_group,
        "Consuming notification jobs"
    );

    // Run until Ctrl+C; unacknowledged jobs are redelivered on the next start
    tokio::select! {
        joined = workers.join_next() => {
            if let Some(Err(e)) = joined {
                tracing::error!(error = %e, "Worker task aborted");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    workers.abort_all();
    tracing::info!("Herald notifier stopped.");
    Ok(())
}
