//! Executor configuration.

use std::time::Duration;

/// Timeout/retry policy for remote confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationConfig {
    /// Upper bound for a single remote attempt.
    pub remote_timeout: Duration,
    /// Extra attempts after a transient failure or timeout.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_backoff: Duration,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

impl MutationConfig {
    /// Defaults overridden by `TRADEFLOW_REMOTE_TIMEOUT_MS`,
    /// `TRADEFLOW_REMOTE_MAX_RETRIES` and `TRADEFLOW_REMOTE_RETRY_BACKOFF_MS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_u64("TRADEFLOW_REMOTE_TIMEOUT_MS") {
            config.remote_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_u64("TRADEFLOW_REMOTE_MAX_RETRIES") {
            config.max_retries = n.min(u32::MAX as u64) as u32;
        }
        if let Some(ms) = env_u64("TRADEFLOW_REMOTE_RETRY_BACKOFF_MS") {
            config.retry_backoff = Duration::from_millis(ms);
        }
        config
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("{name}={raw:?} is not a non-negative integer; using default");
            None
        }
    }
}
