//! Sync engine configuration.

use std::time::Duration;

/// Bounds for a reconciliation pass and the scheduler that drives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Upper bound for each provider fetch/push.
    pub transport_timeout: Duration,
    /// How far back from "now" records are reconciled.
    pub window_past: chrono::Duration,
    /// How far ahead of "now" records are reconciled.
    pub window_future: chrono::Duration,
    /// Scheduler tick.
    pub schedule_interval: Duration,
    /// Resolved conflicts older than this are pruned after a pass.
    pub resolved_conflict_retention: chrono::Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            transport_timeout: Duration::from_secs(30),
            window_past: chrono::Duration::days(30),
            window_future: chrono::Duration::days(180),
            schedule_interval: Duration::from_secs(300),
            resolved_conflict_retention: chrono::Duration::days(7),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `TRADEFLOW_SYNC_TIMEOUT_MS`,
    /// `TRADEFLOW_SYNC_WINDOW_PAST_DAYS`, `TRADEFLOW_SYNC_WINDOW_FUTURE_DAYS`
    /// and `TRADEFLOW_SYNC_INTERVAL_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_u64("TRADEFLOW_SYNC_TIMEOUT_MS") {
            config.transport_timeout = Duration::from_millis(ms);
        }
        if let Some(days) = env_u64("TRADEFLOW_SYNC_WINDOW_PAST_DAYS") {
            config.window_past = chrono::Duration::days(days.min(36_500) as i64);
        }
        if let Some(days) = env_u64("TRADEFLOW_SYNC_WINDOW_FUTURE_DAYS") {
            config.window_future = chrono::Duration::days(days.min(36_500) as i64);
        }
        if let Some(secs) = env_u64("TRADEFLOW_SYNC_INTERVAL_SECS") {
            config.schedule_interval = Duration::from_secs(secs.max(1));
        }
        config
    }

    pub fn with_transport_timeout(mut self, timeout: Duration) -> Self {
        self.transport_timeout = timeout;
        self
    }

    pub fn with_window(mut self, past: chrono::Duration, future: chrono::Duration) -> Self {
        self.window_past = past;
        self.window_future = future;
        self
    }

    pub fn with_schedule_interval(mut self, interval: Duration) -> Self {
        self.schedule_interval = interval;
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
