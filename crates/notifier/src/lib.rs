//! Herald notification delivery pipeline.
//!
//! Workers consume jobs from a durable queue and drive each notification
//! record through `pending → sent | failed`:
//! - `resolver` waits out replication lag between producer write and job arrival
//! - `attempter` retries transient send failures with exponential backoff
//! - `coordinator` ties them together and owns acknowledgment and fault retry

pub mod attempter;
pub mod backoff;
pub mod coordinator;
pub mod job;
mod literal;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod producer;
pub mod queue;
pub mod resolver;
pub mod sender;
pub mod store;
