//! Capped exponential backoff for startup retries.

use std::time::Duration;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// Maximum number of retries; `0` retries forever.
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_retries: 0,
        }
    }
}

/// Retry state: doubles the delay after every wait, capped at `max_backoff`.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    retries: u32,
    next_delay: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            next_delay: config.min_backoff.min(config.max_backoff),
            config,
            retries: 0,
        }
    }

    /// Whether another retry is allowed.
    pub fn ongoing(&self) -> bool {
        self.config.max_retries == 0 || self.retries < self.config.max_retries
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Consume one retry and return how long to wait before it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next_delay;
        self.retries = self.retries.saturating_add(1);
        self.next_delay = (delay * 2).min(self.config.max_backoff);
        delay
    }
}
