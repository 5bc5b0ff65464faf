//! Backoff policies shared by every retry layer of the pipeline.
//!
//! A [`Backoff`] maps an attempt number to a wait; a [`RetryPolicy`] bounds how
//! many attempts a loop may make. Attempt numbers are 1-based.

use std::time::Duration;

/// Delay schedule between consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every attempt.
    Fixed { delay: Duration },
    /// `unit * base^(attempt - 1)`, clamped to `max_delay` when set.
    Exponential {
        unit: Duration,
        base: u32,
        max_delay: Option<Duration>,
    },
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed { delay }
    }

    pub fn exponential(unit: Duration, base: u32) -> Self {
        Backoff::Exponential {
            unit,
            base,
            max_delay: None,
        }
    }

    /// Cap the exponential delay. No effect on a fixed schedule.
    pub fn with_max_delay(self, cap: Duration) -> Self {
        match self {
            Backoff::Exponential { unit, base, .. } => Backoff::Exponential {
                unit,
                base,
                max_delay: Some(cap),
            },
            fixed => fixed,
        }
    }

    /// Wait after the `attempt`-th try. Attempt 0 is treated as 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay } => delay,
            Backoff::Exponential {
                unit,
                base,
                max_delay,
            } => {
                let exponent = attempt.max(1) - 1;
                let factor = base.max(1).saturating_pow(exponent);
                let delay = unit.saturating_mul(factor);
                match max_delay {
                    Some(cap) => delay.min(cap),
                    None => delay,
                }
            }
        }
    }
}

/// A bounded retry loop: at most `max_attempts` tries with `backoff` between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// `max_attempts` below 1 is raised to 1; a loop always tries once.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Record lookups: 5 attempts, 1 second apart.
    pub fn lookup_default() -> Self {
        Self::new(5, Backoff::fixed(Duration::from_secs(1)))
    }

    /// Delivery and processing retries: 3 attempts at 1s, 2s, 4s.
    pub fn exponential_default() -> Self {
        Self::new(3, Backoff::exponential(Duration::from_secs(1), 2))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Whether another attempt is allowed after `attempt` tries.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
