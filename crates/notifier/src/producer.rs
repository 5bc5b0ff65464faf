//! Producer side of the pipeline: persist first, then enqueue.

use std::sync::Arc;

use herald_common::error::AppResult;
use herald_common::types::{NewNotification, NotificationRecord};

use crate::job::NotificationJob;
use crate::queue::JobQueue;
use crate::store::RecordStore;

pub struct NotificationProducer {
    store: Arc<dyn RecordStore>,
    queue: Arc<dyn JobQueue>,
}

impl NotificationProducer {
    pub fn new(store: Arc<dyn RecordStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Store a `pending` record and publish a job referencing it.
    ///
    /// The record is written before the job exists, so a consumer never sees
    /// a job for a record that was never created. If publishing fails the
    /// record stays `pending` and the error is returned for resubmission.
    pub async fn submit(&self, new: NewNotification) -> AppResult<NotificationRecord> {
        let record = self.store.insert(&new).await?;
        let payload = NotificationJob::new(record.id.clone()).encode()?;

        if let Err(e) = self.queue.publish(&payload).await {
            tracing::error!(
                notification_id = %record.id,
                error = %e,
                "Failed to publish notification job"
            );
            return Err(e);
        }

        tracing::info!(
            notification_id = %record.id,
            user_id = record.user_id,
            channel = %record.channel,
            "Queued notification"
        );
        Ok(record)
    }

    /// Re-enqueue an existing record, e.g. one left `failed` or `pending`.
    pub async fn resubmit(&self, notification_id: &str) -> AppResult<()> {
        let payload = NotificationJob::new(notification_id).encode()?;
        self.queue.publish(&payload).await?;
        tracing::info!(notification_id = %notification_id, "Resubmitted notification");
        Ok(())
    }
}
