//! Delivery coordinator: the consumer loop.
//!
//! Per job:
//! 1. Decode the payload (malformed → ack and drop)
//! 2. Resolve the record (not found → ack and drop, no status write)
//! 3. Attempt delivery (via `DeliveryAttempter`)
//! 4. Commit `sent` or `failed`, then acknowledge
//!
//! Anything that fails with an error rather than an outcome is a processing
//! fault and goes through the configured `FaultPolicy`.

use std::sync::Arc;
use std::time::Duration;

use herald_common::config::{AppConfig, FaultPolicy};
use herald_common::error::{AppError, AppResult};
use herald_common::types::DeliveryStatus;

use crate::attempter::{DeliveryAttempter, DeliveryOutcome};
use crate::backoff::{Backoff, RetryPolicy};
use crate::job::NotificationJob;
use crate::queue::{Delivery, JobQueue};
use crate::resolver::{RecordResolver, Resolution};
use crate::sender::Sender;
use crate::store::RecordStore;

/// Terminal state of one handled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Payload could not be decoded.
    Malformed,
    /// No record visible within the lookup bound.
    NotFound,
    /// Delivered and committed as `sent`.
    Sent,
    /// Record was already `sent`; nothing re-sent.
    AlreadySent,
    /// Delivery exhausted and committed as `failed`.
    Failed,
    /// Faulted and re-published carrying this attempt count.
    Requeued { attempt_count: u32 },
    /// Faulted past the outer retry bound.
    Dropped,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub lookup: RetryPolicy,
    pub delivery: RetryPolicy,
    pub processing: RetryPolicy,
    pub fault_policy: FaultPolicy,
    /// Pause after a queue read or ack error before polling again.
    pub poll_error_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lookup: RetryPolicy::lookup_default(),
            delivery: RetryPolicy::exponential_default(),
            processing: RetryPolicy::exponential_default(),
            fault_policy: FaultPolicy::Requeue,
            poll_error_delay: Duration::from_secs(1),
        }
    }
}

impl From<&AppConfig> for CoordinatorConfig {
    fn from(config: &AppConfig) -> Self {
        let lookup_delay = Duration::from_millis(config.lookup_delay_ms);
        let capped = |backoff: Backoff| match config.backoff_max_delay_ms {
            0 => backoff,
            ms => backoff.with_max_delay(Duration::from_millis(ms)),
        };
        Self {
            lookup: RetryPolicy::new(config.lookup_max_attempts, Backoff::fixed(lookup_delay)),
            delivery: RetryPolicy::new(
                config.delivery_max_attempts,
                capped(Backoff::exponential(
                    Duration::from_millis(config.delivery_backoff_ms),
                    config.delivery_backoff_base,
                )),
            ),
            processing: RetryPolicy::new(
                config.processing_max_attempts,
                capped(Backoff::exponential(
                    Duration::from_millis(config.processing_backoff_ms),
                    2,
                )),
            ),
            fault_policy: config.fault_policy,
            poll_error_delay: lookup_delay,
        }
    }
}

pub struct DeliveryCoordinator {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn RecordStore>,
    resolver: RecordResolver,
    attempter: DeliveryAttempter,
    processing: RetryPolicy,
    fault_policy: FaultPolicy,
    poll_error_delay: Duration,
}

impl DeliveryCoordinator {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn RecordStore>,
        sender: Arc<dyn Sender>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            resolver: RecordResolver::new(store.clone(), config.lookup),
            attempter: DeliveryAttempter::new(sender, config.delivery),
            queue,
            store,
            processing: config.processing,
            fault_policy: config.fault_policy,
            poll_error_delay: config.poll_error_delay,
        }
    }

    /// Consume jobs until the task is cancelled. Errors never end the loop.
    pub async fn run(&self) {
        tracing::info!(fault_policy = ?self.fault_policy, "Delivery coordinator started");
        loop {
            if let Err(e) = self.poll_once().await {
                tracing::error!(error = %e, "Queue interaction failed, pausing before next poll");
                tokio::time::sleep(self.poll_error_delay).await;
            }
        }
    }

    /// Handle at most one message. `Ok(None)` when the queue had nothing.
    pub async fn poll_once(&self) -> AppResult<Option<JobOutcome>> {
        match self.queue.next().await? {
            Some(delivery) => self.handle(delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// Take one message to a terminal outcome and acknowledge it.
    ///
    /// Returns an error only when the message must stay unacknowledged: the
    /// acknowledgment itself failed, or a requeue could not be published.
    pub async fn handle(&self, delivery: Delivery) -> AppResult<JobOutcome> {
        let job = match NotificationJob::decode(&delivery.payload) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(entry_id = %delivery.ack, error = %e, "Dropping malformed job");
                self.queue.acknowledge(&delivery.ack).await?;
                return Ok(JobOutcome::Malformed);
            }
        };

        tracing::debug!(
            notification_id = %job.notification_id,
            attempt_count = job.attempt_count,
            "Received job"
        );

        let outcome = match self.fault_policy {
            FaultPolicy::InPlace => self.process_in_place(&job).await,
            FaultPolicy::Requeue => match self.process(&job).await {
                Ok(outcome) => outcome,
                Err(e) => self.requeue(&job, e).await?,
            },
        };

        self.queue.acknowledge(&delivery.ack).await?;
        Ok(outcome)
    }

    /// Retry the whole job in this process while the message stays unacknowledged.
    async fn process_in_place(&self, job: &NotificationJob) -> JobOutcome {
        let mut attempt = 1;
        loop {
            let err = match self.process(job).await {
                Ok(outcome) => return outcome,
                Err(e) => e,
            };

            if !self.processing.should_retry(attempt) {
                tracing::error!(
                    notification_id = %job.notification_id,
                    attempts = attempt,
                    error = %err,
                    "Dropping job after repeated processing faults"
                );
                return JobOutcome::Dropped;
            }

            let delay = self.processing.delay(attempt);
            tracing::warn!(
                notification_id = %job.notification_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Processing fault, retrying job"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Publish a copy with the next attempt count, or drop once the bound is hit.
    async fn requeue(&self, job: &NotificationJob, err: AppError) -> AppResult<JobOutcome> {
        if job.attempt_count >= self.processing.max_attempts() {
            tracing::error!(
                notification_id = %job.notification_id,
                attempt_count = job.attempt_count,
                error = %err,
                "Dropping job: requeue limit reached"
            );
            return Ok(JobOutcome::Dropped);
        }

        let next = job.requeued();
        let delay = self.processing.delay(next.attempt_count);
        tracing::warn!(
            notification_id = %job.notification_id,
            attempt_count = next.attempt_count,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Processing fault, requeueing job"
        );
        tokio::time::sleep(delay).await;

        self.queue.publish(&next.encode()?).await?;
        Ok(JobOutcome::Requeued {
            attempt_count: next.attempt_count,
        })
    }

    /// Resolve, deliver and commit. Errors here are processing faults.
    async fn process(&self, job: &NotificationJob) -> AppResult<JobOutcome> {
        let id = job.notification_id.as_str();

        let record = match self.resolver.resolve(id).await? {
            Resolution::Resolved(record) => record,
            Resolution::NotFound { attempts } => {
                tracing::error!(
                    notification_id = %id,
                    attempts,
                    "Notification not found after retries, dropping job"
                );
                return Ok(JobOutcome::NotFound);
            }
        };

        if record.status == DeliveryStatus::Sent {
            tracing::info!(notification_id = %id, "Notification already sent, skipping");
            return Ok(JobOutcome::AlreadySent);
        }

        match self.attempter.attempt_delivery(&record).await {
            DeliveryOutcome::Delivered { .. } => {
                self.commit(id, DeliveryStatus::Sent).await?;
                Ok(JobOutcome::Sent)
            }
            DeliveryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                tracing::error!(
                    notification_id = %id,
                    attempts,
                    error = %last_error,
                    "Delivery exhausted, marking notification failed"
                );
                self.commit(id, DeliveryStatus::Failed).await?;
                Ok(JobOutcome::Failed)
            }
        }
    }

    async fn commit(&self, id: &str, status: DeliveryStatus) -> AppResult<()> {
        let affected = self.store.update_status(id, status).await?;
        if affected == 0 {
            tracing::warn!(notification_id = %id, status = %status, "Status write changed no record");
        } else {
            tracing::info!(notification_id = %id, status = %status, "Notification status updated");
        }
        Ok(())
    }
}
