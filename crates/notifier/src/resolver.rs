//! Record lookup that tolerates replication lag.
//!
//! A job can arrive before the producer's write is visible to this reader.
//! The resolver retries on a fixed schedule and reports `NotFound` as a normal
//! result once the bound is exhausted. Store errors are faults and propagate.

use std::sync::Arc;

use herald_common::error::AppResult;
use herald_common::types::NotificationRecord;

use crate::backoff::RetryPolicy;
use crate::store::RecordStore;

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(NotificationRecord),
    NotFound { attempts: u32 },
}

pub struct RecordResolver {
    store: Arc<dyn RecordStore>,
    policy: RetryPolicy,
}

impl RecordResolver {
    pub fn new(store: Arc<dyn RecordStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn resolve(&self, id: &str) -> AppResult<Resolution> {
        let mut attempt = 1;
        loop {
            if let Some(record) = self.store.find_by_id(id).await? {
                if attempt > 1 {
                    tracing::debug!(notification_id = %id, attempt, "Record became visible");
                }
                return Ok(Resolution::Resolved(record));
            }

            if !self.policy.should_retry(attempt) {
                return Ok(Resolution::NotFound { attempts: attempt });
            }

            let delay = self.policy.delay(attempt);
            tracing::debug!(
                notification_id = %id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Record not visible yet, retrying lookup"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
