//! Outbound transport call policy

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Concurrency gate and retry policy for chat-platform calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Calls allowed in flight at once
    pub max_in_flight: usize,
    /// Attempts per call before giving up
    pub max_attempts: u32,
    /// Wait used when a rate limit carries no retry-after hint
    pub default_retry_after_ms: u64,
    /// First backoff delay for non rate-limit failures
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 5,
            max_attempts: 5,
            default_retry_after_ms: 5000,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30000,
        }
    }
}

impl TransportSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(anyhow!("Transport max in flight must be greater than 0"));
        }
        if self.max_attempts == 0 {
            return Err(anyhow!("Transport max attempts must be greater than 0"));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(anyhow!("Initial backoff cannot exceed max backoff"));
        }
        Ok(())
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_millis(self.default_retry_after_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}
