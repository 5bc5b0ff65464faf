//! Job queue seam and its Redis Streams implementation.
//!
//! The queue is durable and at-least-once: a delivered message stays pending
//! for its consumer until acknowledged, and is redelivered to that consumer
//! on restart if it never was.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, RedisResult};
use tokio::time::Instant;

use herald_common::error::{AppError, AppResult};
use herald_common::redis_pool::create_redis_pool;

/// Broker token that removes a delivered message from redelivery once acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckHandle(String);

impl AckHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub payload: Vec<u8>,
    pub ack: AckHandle,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Durably append a payload.
    async fn publish(&self, payload: &[u8]) -> AppResult<()>;

    /// Wait a bounded time for the next message. `None` means nothing arrived.
    async fn next(&self) -> AppResult<Option<Delivery>>;

    async fn acknowledge(&self, handle: &AckHandle) -> AppResult<()>;
}

/// Redis Streams queue read through a consumer group.
///
/// - Publish: `XADD <stream> * payload <bytes>`
/// - Consume: `XREADGROUP GROUP <group> <consumer> COUNT 1 BLOCK <ms> STREAMS <stream> >`
/// - Acknowledge: `XACK <stream> <group> <id>`
///
/// On start the consumer first walks its own pending entries (delivered
/// before a crash, never acknowledged) and only then reads new ones. After
/// that it periodically claims entries any consumer in the group has left
/// pending longer than `claim_idle` (`XPENDING` + `XCLAIM`), which covers
/// failed acks, failed requeues and consumers that never come back.
///
/// `claim_idle` must exceed the longest time a job can take to process,
/// otherwise a slow job can be claimed while its owner still holds it.
pub struct RedisStreamQueue {
    conn: ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
    block_ms: u64,
    /// Last pending id read while replaying; `None` once replay is done.
    backlog_cursor: Mutex<Option<String>>,
    claim_idle: Duration,
    next_claim_at: Mutex<Instant>,
}

/// Pending entries inspected per claim scan.
const CLAIM_SCAN: usize = 10;

pub const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(300);

impl RedisStreamQueue {
    /// Open a dedicated connection and make sure the consumer group exists.
    pub async fn connect(
        redis_url: &str,
        stream: &str,
        group: &str,
        consumer: &str,
        block_ms: u64,
    ) -> anyhow::Result<Self> {
        let conn = create_redis_pool(redis_url).await?;
        let queue = Self {
            conn,
            stream: stream.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            block_ms,
            backlog_cursor: Mutex::new(Some("0".to_string())),
            claim_idle: DEFAULT_CLAIM_IDLE,
            next_claim_at: Mutex::new(Instant::now()),
        };
        queue.ensure_group().await?;

        tracing::info!(stream, group, consumer, "Queue consumer ready");
        Ok(queue)
    }

    /// Minimum idle time before another consumer's pending entry is claimed.
    pub fn with_claim_idle(mut self, claim_idle: Duration) -> Self {
        self.claim_idle = claim_idle;
        self
    }

    /// Create the consumer group (and the stream) if missing. Idempotent.
    pub async fn ensure_group(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let created: RedisResult<String> = conn
            .xgroup_create_mkstream(&self.stream, &self.group, "0")
            .await;

        match created {
            Ok(_) => {
                tracing::info!(stream = %self.stream, group = %self.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn backlog_cursor(&self) -> AppResult<Option<String>> {
        self.backlog_cursor
            .lock()
            .map(|cursor| cursor.clone())
            .map_err(|_| AppError::Internal("backlog cursor lock poisoned".to_string()))
    }

    fn set_backlog_cursor(&self, value: Option<String>) {
        if let Ok(mut cursor) = self.backlog_cursor.lock() {
            *cursor = value;
        }
    }

    fn claim_due(&self) -> bool {
        self.next_claim_at
            .lock()
            .map(|at| Instant::now() >= *at)
            .unwrap_or(true)
    }

    fn defer_claim(&self) {
        if let Ok(mut at) = self.next_claim_at.lock() {
            *at = Instant::now() + self.claim_idle;
        }
    }

    /// Take over one entry left pending past `claim_idle`, if there is one.
    async fn claim_stale(&self) -> AppResult<Option<Delivery>> {
        let idle_ms = u64::try_from(self.claim_idle.as_millis()).unwrap_or(u64::MAX);

        let mut conn = self.conn.clone();
        let pending: StreamPendingCountReply = conn
            .xpending_count(&self.stream, &self.group, "-", "+", CLAIM_SCAN)
            .await?;

        let Some(stale) = pending
            .ids
            .iter()
            .find(|p| p.last_delivered_ms as u64 >= idle_ms)
        else {
            return Ok(None);
        };

        // XCLAIM re-checks the idle time, so a concurrent claimer wins cleanly
        let claimed: StreamClaimReply = conn
            .xclaim(&self.stream, &self.group, &self.consumer, idle_ms, &[&stale.id])
            .await?;
        let Some(entry) = claimed.ids.into_iter().next() else {
            return Ok(None);
        };

        tracing::warn!(
            entry_id = %entry.id,
            previous_consumer = %stale.consumer,
            times_delivered = stale.times_delivered,
            "Claimed stale pending job"
        );
        Ok(Some(into_delivery(entry)))
    }
}

// A trimmed entry replays with no fields; it decodes as malformed and is acked.
fn into_delivery(entry: StreamId) -> Delivery {
    let payload: Vec<u8> = entry.get("payload").unwrap_or_default();
    Delivery {
        payload,
        ack: AckHandle::new(entry.id),
    }
}

#[async_trait]
impl JobQueue for RedisStreamQueue {
    async fn publish(&self, payload: &[u8]) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(&self.stream, "*", &[("payload", payload)])
            .await?;

        tracing::debug!(stream = %self.stream, entry_id = %id, "Published job");
        Ok(())
    }

    async fn next(&self) -> AppResult<Option<Delivery>> {
        let backlog = self.backlog_cursor()?;

        if backlog.is_none() && self.claim_due() {
            if let Some(delivery) = self.claim_stale().await? {
                return Ok(Some(delivery));
            }
            self.defer_claim();
        }

        let start_id = backlog.clone().unwrap_or_else(|| ">".to_string());

        let mut options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1);
        if backlog.is_none() {
            options = options.block(self.block_ms as usize);
        }

        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream], &[&start_id], &options)
            .await?;

        let entry = reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|key| key.ids.into_iter().next());

        let Some(entry) = entry else {
            if backlog.is_some() {
                tracing::info!(consumer = %self.consumer, "Pending backlog replayed");
                self.set_backlog_cursor(None);
            }
            return Ok(None);
        };

        if backlog.is_some() {
            tracing::info!(entry_id = %entry.id, "Redelivering unacknowledged job");
            self.set_backlog_cursor(Some(entry.id.clone()));
        }

        Ok(Some(into_delivery(entry)))
    }

    async fn acknowledge(&self, handle: &AckHandle) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let acked: i64 = conn
            .xack(&self.stream, &self.group, &[handle.as_str()])
            .await?;

        if acked == 0 {
            tracing::warn!(entry_id = %handle, "Acknowledged an entry that was not pending");
        }
        Ok(())
    }
}
