//! In-process queue, store and sender.
//!
//! They honour the same contracts as the Redis and PostgreSQL adapters and add
//! knobs for what those make hard to reproduce: replication lag, store and
//! broker outages, flaky sends, consumer crashes.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use uuid::Uuid;

use herald_common::error::{AppError, AppResult};
use herald_common::types::{DeliveryStatus, NewNotification, NotificationRecord};

use crate::queue::{AckHandle, Delivery, JobQueue};
use crate::sender::{SendError, Sender};
use crate::store::RecordStore;

/// Consume a counter of injected failures; true while any remain.
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Default)]
struct QueueState {
    next_id: u64,
    ready: VecDeque<(AckHandle, Vec<u8>)>,
    in_flight: HashMap<AckHandle, Vec<u8>>,
    published: Vec<Vec<u8>>,
    acked: Vec<AckHandle>,
}

/// FIFO queue with explicit acknowledgment.
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    arrivals: Notify,
    wait: Duration,
    publish_failures: AtomicU32,
    ack_failures: AtomicU32,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl InMemoryQueue {
    /// `wait` bounds how long `next` blocks on an empty queue.
    pub fn new(wait: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            arrivals: Notify::new(),
            wait,
            publish_failures: AtomicU32::new(0),
            ack_failures: AtomicU32::new(0),
        }
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("queue state lock poisoned".to_string()))
    }

    /// Make the next `n` publishes fail.
    pub fn fail_next_publishes(&self, n: u32) {
        self.publish_failures.store(n, Ordering::Release);
    }

    /// Make the next `n` acknowledgments fail.
    pub fn fail_next_acks(&self, n: u32) {
        self.ack_failures.store(n, Ordering::Release);
    }

    /// Every payload ever published, in order.
    pub fn published(&self) -> Vec<Vec<u8>> {
        self.lock().map(|s| s.published.clone()).unwrap_or_default()
    }

    pub fn acked_count(&self) -> usize {
        self.lock().map(|s| s.acked.len()).unwrap_or_default()
    }

    /// Messages waiting to be delivered.
    pub fn ready_count(&self) -> usize {
        self.lock().map(|s| s.ready.len()).unwrap_or_default()
    }

    /// Messages delivered but not yet acknowledged.
    pub fn in_flight_count(&self) -> usize {
        self.lock().map(|s| s.in_flight.len()).unwrap_or_default()
    }

    /// Simulate a consumer crash: unacknowledged messages go back to the front.
    pub fn redeliver_in_flight(&self) {
        if let Ok(mut state) = self.lock() {
            let mut returned: Vec<_> = state.in_flight.drain().collect();
            returned.sort_by(|a, b| b.0.as_str().cmp(a.0.as_str()));
            for entry in returned {
                state.ready.push_front(entry);
            }
        }
        self.arrivals.notify_one();
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn publish(&self, payload: &[u8]) -> AppResult<()> {
        if take_failure(&self.publish_failures) {
            return Err(AppError::Queue("simulated broker outage".to_string()));
        }
        {
            let mut state = self.lock()?;
            state.next_id += 1;
            let handle = AckHandle::new(format!("{:020}", state.next_id));
            state.ready.push_back((handle, payload.to_vec()));
            state.published.push(payload.to_vec());
        }
        self.arrivals.notify_one();
        Ok(())
    }

    async fn next(&self) -> AppResult<Option<Delivery>> {
        for _ in 0..2 {
            {
                let mut state = self.lock()?;
                if let Some((ack, payload)) = state.ready.pop_front() {
                    state.in_flight.insert(ack.clone(), payload.clone());
                    return Ok(Some(Delivery { payload, ack }));
                }
            }
            if tokio::time::timeout(self.wait, self.arrivals.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
        Ok(None)
    }

    async fn acknowledge(&self, handle: &AckHandle) -> AppResult<()> {
        if take_failure(&self.ack_failures) {
            return Err(AppError::Queue("simulated ack failure".to_string()));
        }
        let mut state = self.lock()?;
        if state.in_flight.remove(handle).is_none() {
            return Err(AppError::Queue(format!("{} is not in flight", handle)));
        }
        state.acked.push(handle.clone());
        Ok(())
    }
}

/// Record store with simulated replication lag and outages.
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<String, NotificationRecord>>,
    /// Lookups of an id that still miss before the record becomes visible.
    lag: Mutex<HashMap<String, u32>>,
    writes: Mutex<Vec<(String, DeliveryStatus)>>,
    lookups: AtomicU32,
    read_failures: AtomicU32,
    write_failures: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a `pending` record under a known id.
    pub fn seed(&self, id: &str, new: NewNotification) -> NotificationRecord {
        let now = Utc::now();
        let record = NotificationRecord {
            id: id.to_string(),
            user_id: new.user_id,
            channel: new.channel,
            message: new.message,
            status: DeliveryStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        if let Ok(mut records) = self.records.lock() {
            records.insert(id.to_string(), record.clone());
        }
        record
    }

    /// The next `lookups` reads of `id` behave as if the record were absent.
    pub fn hide_for(&self, id: &str, lookups: u32) {
        if let Ok(mut lag) = self.lag.lock() {
            lag.insert(id.to_string(), lookups);
        }
    }

    pub fn fail_next_reads(&self, n: u32) {
        self.read_failures.store(n, Ordering::Release);
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.write_failures.store(n, Ordering::Release);
    }

    pub fn get(&self, id: &str) -> Option<NotificationRecord> {
        self.records.lock().ok().and_then(|r| r.get(id).cloned())
    }

    pub fn status(&self, id: &str) -> Option<DeliveryStatus> {
        self.get(id).map(|r| r.status)
    }

    /// Every status write requested, applied or not.
    pub fn status_writes(&self) -> Vec<(String, DeliveryStatus)> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Total `find_by_id` calls that reached the store.
    pub fn lookups(&self) -> u32 {
        self.lookups.load(Ordering::Acquire)
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<NotificationRecord>> {
        if take_failure(&self.read_failures) {
            return Err(AppError::Internal("simulated store outage".to_string()));
        }
        self.lookups.fetch_add(1, Ordering::AcqRel);

        {
            let mut lag = self
                .lag
                .lock()
                .map_err(|_| AppError::Internal("lag lock poisoned".to_string()))?;
            if let Some(remaining) = lag.get_mut(id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Ok(None);
                }
            }
        }

        Ok(self.get(id))
    }

    async fn update_status(&self, id: &str, status: DeliveryStatus) -> AppResult<u64> {
        if take_failure(&self.write_failures) {
            return Err(AppError::Internal("simulated store outage".to_string()));
        }
        if let Ok(mut writes) = self.writes.lock() {
            writes.push((id.to_string(), status));
        }

        let mut records = self
            .records
            .lock()
            .map_err(|_| AppError::Internal("records lock poisoned".to_string()))?;
        match records.get_mut(id) {
            Some(record) if record.status.can_transition_to(status) => {
                record.status = status;
                record.updated_at = Utc::now();
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn insert(&self, new: &NewNotification) -> AppResult<NotificationRecord> {
        let id = Uuid::new_v4().to_string();
        Ok(self.seed(&id, new.clone()))
    }
}

/// Sender that fails a scripted number of times before succeeding.
pub struct ScriptedSender {
    failures_left: AtomicU32,
    calls: AtomicU32,
}

impl ScriptedSender {
    /// Fails the first `n` sends, then succeeds.
    pub fn failing(n: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(n),
            calls: AtomicU32::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::failing(0)
    }

    pub fn always_failing() -> Self {
        Self::failing(u32::MAX)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Sender for ScriptedSender {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn send(&self, record: &NotificationRecord) -> Result<(), SendError> {
        let call = self.calls.fetch_add(1, Ordering::AcqRel) + 1;
        if take_failure(&self.failures_left) {
            return Err(SendError::Transient(format!(
                "scripted failure #{} for {}",
                call, record.id
            )));
        }
        Ok(())
    }
}
