//! Pool configuration types

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Order in which idle connections are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum QueueStrategy {
    /// Oldest idle connection first; spreads use across the pool.
    #[default]
    Fifo,
    /// Most recently returned first; lets surplus connections idle out.
    Lifo,
}

/// How re-validation retries during `acquire` relate to the caller's wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ValidationBudget {
    /// Time spent validating and retrying counts toward the caller's timeout.
    #[default]
    Shared,
    /// Each failed validation extends the deadline by the time it took.
    Extended,
}

/// Configuration for the connection pool.
///
/// Consumed once by [`Pool::new`](crate::Pool::new) and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Name used in errors, logs and events
    pub name: String,
    /// Number of connections maintenance keeps available
    pub min_idle: usize,
    /// Maximum number of live connections (idle + borrowed + validating)
    pub max_size: usize,
    /// Default wait for `acquire()`
    pub acquire_timeout: Duration,
    /// Idle connections unused for longer than this are destroyed
    pub idle_timeout: Duration,
    /// Connections older than this are destroyed instead of recycled
    pub max_lifetime: Duration,
    /// Connections idle for longer than this are validated before hand-out
    pub validation_interval: Duration,
    /// Upper bound passed to `ConnectionFactory::validate`
    pub validation_timeout: Duration,
    /// Maximum number of dead connections `acquire` skips before giving up
    pub max_validation_retries: u32,
    /// How validation retries are charged against the caller's wait
    pub validation_budget: ValidationBudget,
    /// How long a returning connection waits for a borrower to show up
    /// before it is parked idle
    pub handoff_timeout: Duration,
    /// Interval of the background maintenance task; `None` disables it
    pub maintenance_interval: Option<Duration>,
    /// Idle connection ordering
    pub strategy: QueueStrategy,
    /// Auto-commit mode restored on every returned connection
    pub default_auto_commit: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "reservoir".to_string(),
            min_idle: 0,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            validation_interval: Duration::from_millis(500),
            validation_timeout: Duration::from_secs(3),
            max_validation_retries: 3,
            validation_budget: ValidationBudget::Shared,
            handoff_timeout: Duration::ZERO,
            maintenance_interval: Some(Duration::from_secs(30)),
            strategy: QueueStrategy::Fifo,
            default_auto_commit: true,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with the given maximum size.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            ..Default::default()
        }
    }

    /// Validate pool configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::configuration("max_size must be greater than 0"));
        }
        if self.min_idle > self.max_size {
            return Err(Error::configuration(format!(
                "min_idle ({}) must not exceed max_size ({})",
                self.min_idle, self.max_size
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(Error::configuration(
                "acquire_timeout must be greater than zero",
            ));
        }
        if self.validation_timeout.is_zero() {
            return Err(Error::configuration(
                "validation_timeout must be greater than zero",
            ));
        }
        if self.maintenance_interval.is_some_and(|d| d.is_zero()) {
            return Err(Error::configuration(
                "maintenance_interval must be greater than zero when set",
            ));
        }
        Ok(())
    }
}
