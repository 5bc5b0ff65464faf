use std::str::FromStr;

use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// How the consumer handles an unexpected fault while processing a job.
///
/// A deployment uses exactly one of these; the two keep their attempt
/// counter in different places (broker-held vs. payload-carried).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// Retry the whole job in this process, holding the acknowledgment.
    InPlace,
    /// Publish a copy with `retries + 1` and acknowledge the original.
    Requeue,
}

impl FromStr for FaultPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in_place" | "in-place" => Ok(FaultPolicy::InPlace),
            "requeue" => Ok(FaultPolicy::Requeue),
            other => Err(AppError::Config(format!(
                "FAULT_POLICY must be `in_place` or `requeue`, got `{}`",
                other
            ))),
        }
    }
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string
    pub redis_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Apply pending migrations at startup (default: true)
    pub run_migrations: bool,

    /// Redis stream carrying notification jobs
    pub queue_stream: String,

    /// Consumer group shared by all notifier processes
    pub queue_group: String,

    /// Consumer name prefix; each worker task appends `-{n}`.
    /// Must be unique per process; defaults to `notifier-<random>`.
    pub consumer_name: String,

    /// How long a stream read blocks waiting for a message
    pub queue_block_ms: u64,

    /// Idle time after which another consumer's pending job is claimed (default: 300000)
    pub queue_claim_idle_ms: u64,

    /// Number of independent consumer tasks per process
    pub worker_concurrency: usize,

    /// Record lookups before a job is declared not found (default: 5)
    pub lookup_max_attempts: u32,

    /// Fixed delay between record lookups
    pub lookup_delay_ms: u64,

    /// Send attempts per job (default: 3)
    pub delivery_max_attempts: u32,

    /// First delivery backoff step; later steps multiply by the base
    pub delivery_backoff_ms: u64,

    /// Exponential base for delivery backoff (default: 2)
    pub delivery_backoff_base: u32,

    /// Outer retry bound for processing faults (default: 3)
    pub processing_max_attempts: u32,

    /// First outer-retry backoff step
    pub processing_backoff_ms: u64,

    /// Ceiling for delivery and outer-retry backoff; 0 leaves them uncapped (default: 0)
    pub backoff_max_delay_ms: u64,

    pub fault_policy: FaultPolicy,

    /// Delivery webhook; when unset, sends are simulated and logged
    pub webhook_url: Option<String>,

    pub webhook_timeout_ms: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 20)?,
            run_migrations: env_or("RUN_MIGRATIONS", true)?,
            queue_stream: std::env::var("QUEUE_STREAM")
                .unwrap_or_else(|_| "notifications".to_string()),
            queue_group: std::env::var("QUEUE_GROUP").unwrap_or_else(|_| "notifier".to_string()),
            consumer_name: std::env::var("CONSUMER_NAME")
                .ok()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(default_consumer_name),
            queue_block_ms: env_or("QUEUE_BLOCK_MS", 5000)?,
            queue_claim_idle_ms: env_or("QUEUE_CLAIM_IDLE_MS", 300_000)?,
            worker_concurrency: env_or("WORKER_CONCURRENCY", 1)?,
            lookup_max_attempts: env_or("LOOKUP_MAX_ATTEMPTS", 5)?,
            lookup_delay_ms: env_or("LOOKUP_DELAY_MS", 1000)?,
            delivery_max_attempts: env_or("DELIVERY_MAX_ATTEMPTS", 3)?,
            delivery_backoff_ms: env_or("DELIVERY_BACKOFF_MS", 1000)?,
            delivery_backoff_base: env_or("DELIVERY_BACKOFF_BASE", 2)?,
            processing_max_attempts: env_or("PROCESSING_MAX_ATTEMPTS", 3)?,
            processing_backoff_ms: env_or("PROCESSING_BACKOFF_MS", 1000)?,
            backoff_max_delay_ms: env_or("BACKOFF_MAX_DELAY_MS", 0)?,
            fault_policy: std::env::var("FAULT_POLICY")
                .unwrap_or_else(|_| "requeue".to_string())
                .parse()?,
            webhook_url: std::env::var("WEBHOOK_URL").ok().filter(|u| !u.is_empty()),
            webhook_timeout_ms: env_or("WEBHOOK_TIMEOUT_MS", 10_000)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a retry loop unbounded or empty.
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: &str| Err(AppError::Config(msg.to_string()));

        if self.worker_concurrency == 0 {
            return invalid("WORKER_CONCURRENCY must be at least 1");
        }
        if self.lookup_max_attempts == 0
            || self.delivery_max_attempts == 0
            || self.processing_max_attempts == 0
        {
            return invalid("retry attempt bounds must be at least 1");
        }
        if self.queue_claim_idle_ms == 0 {
            return invalid("QUEUE_CLAIM_IDLE_MS must be at least 1");
        }
        if self.delivery_backoff_base == 0 {
            return invalid("DELIVERY_BACKOFF_BASE must be at least 1");
        }
        Ok(())
    }
}

/// A consumer name no other process will pick, so restarts never replay
/// another live process's pending jobs.
fn default_consumer_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("notifier-{}", &id[..8])
}

/// Read `key` and parse it, falling back to `default` when unset.
fn env_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: `{}`", key, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/herald".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            db_max_connections: 20,
            run_migrations: true,
            queue_stream: "notifications".to_string(),
            queue_group: "notifier".to_string(),
            consumer_name: "notifier".to_string(),
            queue_block_ms: 5000,
            queue_claim_idle_ms: 300_000,
            worker_concurrency: 1,
            lookup_max_attempts: 5,
            lookup_delay_ms: 1000,
            delivery_max_attempts: 3,
            delivery_backoff_ms: 1000,
            delivery_backoff_base: 2,
            processing_max_attempts: 3,
            processing_backoff_ms: 1000,
            backoff_max_delay_ms: 0,
            fault_policy: FaultPolicy::Requeue,
            webhook_url: None,
            webhook_timeout_ms: 10_000,
        }
    }

    #[test]
    fn test_fault_policy_parse() {
        assert_eq!("requeue".parse::<FaultPolicy>().unwrap(), FaultPolicy::Requeue);
        assert_eq!("IN_PLACE".parse::<FaultPolicy>().unwrap(), FaultPolicy::InPlace);
        assert_eq!("in-place".parse::<FaultPolicy>().unwrap(), FaultPolicy::InPlace);
        assert!(matches!(
            "forever".parse::<FaultPolicy>(),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let mut config = sample();
        config.lookup_max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.worker_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.delivery_backoff_base = 0;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.queue_claim_idle_ms = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_default_consumer_names_are_unique() {
        let a = default_consumer_name();
        let b = default_consumer_name();
        assert!(a.starts_with("notifier-"));
        assert_eq!(a.len(), "notifier-".len() + 8);
        assert_ne!(a, b);
    }
}
