use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create the PostgreSQL pool backing the notification record store.
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Check that the record table exists and is readable.
///
/// Run before consuming so a worker never takes jobs it could not resolve.
pub async fn verify_schema(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("SELECT 1 FROM notifications LIMIT 1")
        .fetch_optional(pool)
        .await
        .map_err(|e| anyhow::anyhow!("notifications table is not available: {}", e))?;
    Ok(())
}
