//! Record store seam and its PostgreSQL implementation.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use herald_common::error::AppResult;
use herald_common::types::{DeliveryStatus, NewNotification, NotificationRecord};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// `None` when no record with this id is visible (yet).
    async fn find_by_id(&self, id: &str) -> AppResult<Option<NotificationRecord>>;

    /// Write a status and bump `updated_at`. Returns the number of rows changed;
    /// a `sent` record never moves to another status and yields 0.
    async fn update_status(&self, id: &str, status: DeliveryStatus) -> AppResult<u64>;

    /// Persist a new `pending` record with a generated id.
    async fn insert(&self, new: &NewNotification) -> AppResult<NotificationRecord>;
}

/// PostgreSQL implementation of `RecordStore` over the `notifications` table.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A user's most recent notifications, newest first.
    pub async fn list_by_user(&self, user_id: i64, limit: i64) -> AppResult<Vec<NotificationRecord>> {
        let records = sqlx::query_as::<_, NotificationRecord>(
            r#"
            SELECT id, user_id, channel, message, status, created_at, updated_at
            FROM notifications
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<NotificationRecord>> {
        let record = sqlx::query_as::<_, NotificationRecord>(
            r#"
            SELECT id, user_id, channel, message, status, created_at, updated_at
            FROM notifications
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn update_status(&self, id: &str, status: DeliveryStatus) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND (status <> 'sent' OR $2 = 'sent')
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert(&self, new: &NewNotification) -> AppResult<NotificationRecord> {
        let record = sqlx::query_as::<_, NotificationRecord>(
            r#"
            INSERT INTO notifications (id, user_id, channel, message, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            RETURNING id, user_id, channel, message, status, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(new.user_id)
        .bind(new.channel.to_string())
        .bind(&new.message)
        .bind(DeliveryStatus::Pending.to_string())
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(notification_id = %record.id, user_id = record.user_id, "Inserted notification");
        Ok(record)
    }
}
