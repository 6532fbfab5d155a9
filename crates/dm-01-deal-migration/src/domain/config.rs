//! # Migration Configuration
//!
//! Tunables for the migration coordinator and its lazy mounts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::errors::ConfigError;

/// Retry policy for per-deal resolution (location lookup and availability
/// probe).
///
/// The default performs a single attempt; failed deals are picked up again
/// by the next migration invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per operation, including the first.
    pub max_attempts: u32,
    /// Pause between attempts in milliseconds.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }
}

impl RetryPolicy {
    /// No in-call retries.
    pub fn none() -> Self {
        Self::default()
    }

    /// Retry up to `max_attempts` total attempts.
    pub fn attempts(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff_ms: backoff.as_millis() as u64,
        }
    }

    /// Pause between attempts.
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Migration coordinator configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Deals resolved and registered concurrently within one run.
    pub max_parallel_deals: usize,
    /// Unseal operations allowed in flight across all lazy mounts.
    pub max_concurrent_unseals: usize,
    /// Retry policy for location lookup and availability probe.
    pub retry: RetryPolicy,
    /// Ask the index whether a shard exists before registering it.
    pub reconcile_existing_shards: bool,
    /// Submit errored shards for recovery at the end of each run.
    pub recover_errored_shards: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            max_parallel_deals: 8,
            max_concurrent_unseals: 4,
            retry: RetryPolicy::default(),
            reconcile_existing_shards: true,
            recover_errored_shards: false,
        }
    }
}

impl MigrationConfig {
    /// Create config for testing.
    pub fn for_testing() -> Self {
        Self {
            max_parallel_deals: 4,
            max_concurrent_unseals: 2,
            retry: RetryPolicy::none(),
            reconcile_existing_shards: true,
            recover_errored_shards: false,
        }
    }

    /// Reject configurations the coordinator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel_deals == 0 {
            return Err(ConfigError::InvalidField {
                field: "max_parallel_deals",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_concurrent_unseals == 0 {
            return Err(ConfigError::InvalidField {
                field: "max_concurrent_unseals",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidField {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
