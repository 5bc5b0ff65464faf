use redis::Client;
use redis::aio::ConnectionManager;

/// Open a dedicated Redis connection for one queue client.
///
/// Consumers issue blocking stream reads, so every worker gets its own
/// manager instead of sharing a multiplexed connection. The connection is
/// verified with `PING` before it is handed out.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(redis_url)?;
    let mut manager = ConnectionManager::new(client).await?;

    let pong: String = redis::cmd("PING").query_async(&mut manager).await?;
    if pong != "PONG" {
        anyhow::bail!("unexpected PING reply from Redis: {}", pong);
    }

    tracing::debug!("Connected to Redis");
    Ok(manager)
}
