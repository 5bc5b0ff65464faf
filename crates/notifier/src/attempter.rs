//! Bounded, locally retried delivery of one resolved record.
//!
//! Send failures are logged and swallowed; callers only see the terminal
//! outcome. This retry is independent from the coordinator's fault retry.

use std::sync::Arc;

use herald_common::types::NotificationRecord;

use crate::backoff::RetryPolicy;
use crate::sender::Sender;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Exhausted { attempts: u32, last_error: String },
}

pub struct DeliveryAttempter {
    sender: Arc<dyn Sender>,
    policy: RetryPolicy,
}

impl DeliveryAttempter {
    pub fn new(sender: Arc<dyn Sender>, policy: RetryPolicy) -> Self {
        Self { sender, policy }
    }

    pub async fn attempt_delivery(&self, record: &NotificationRecord) -> DeliveryOutcome {
        let mut attempt = 1;
        loop {
            match self.sender.send(record).await {
                Ok(()) => {
                    tracing::info!(
                        notification_id = %record.id,
                        channel = %record.channel,
                        sender = self.sender.name(),
                        attempt,
                        "Notification delivered"
                    );
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Err(e) => {
                    tracing::warn!(
                        notification_id = %record.id,
                        sender = self.sender.name(),
                        attempt,
                        max_attempts = self.policy.max_attempts(),
                        error = %e,
                        "Delivery attempt failed"
                    );

                    if !self.policy.should_retry(attempt) {
                        return DeliveryOutcome::Exhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        };
                    }
                }
            }

            let delay = self.policy.delay(attempt);
            tracing::debug!(
                notification_id = %record.id,
                delay_ms = delay.as_millis() as u64,
                "Backing off before next delivery attempt"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
