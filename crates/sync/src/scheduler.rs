//! Background worker running periodic passes over every enabled provider.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tradeflow_core::ProviderId;

use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::types::SyncReport;

pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    shutdown: Arc<Notify>,
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the current tick to finish.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.join.await {
            tracing::error!("sync scheduler task failed: {err:?}");
        }
    }
}

impl SyncScheduler {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// One pass over every enabled provider, in registration order.
    ///
    /// Failures are logged and left for the next tick.
    pub async fn run_once(&self) -> Vec<(ProviderId, Result<SyncReport, SyncError>)> {
        let provider_ids = self.engine.registry().enabled_provider_ids().await;
        if provider_ids.is_empty() {
            tracing::debug!("no enabled sync providers");
            return Vec::new();
        }

        let mut results = Vec::with_capacity(provider_ids.len());
        for provider_id in provider_ids {
            let result = self.engine.sync(provider_id).await;
            match &result {
                Ok(report) if report.conflicts_open > 0 => {
                    tracing::info!(
                        provider_id = %provider_id,
                        conflicts_open = report.conflicts_open,
                        "provider has conflicts awaiting resolution"
                    );
                }
                Ok(_) => {}
                Err(err) if err.is_transient() => {
                    tracing::warn!(provider_id = %provider_id, "sync failed, will retry: {err}");
                }
                // Disabled between listing and running.
                Err(SyncError::ProviderDisabled(_)) => {}
                Err(err) => {
                    tracing::error!(provider_id = %provider_id, "sync failed: {err}");
                }
            }
            results.push((provider_id, result));
        }
        results
    }

    /// Spawn the periodic loop. The first tick runs immediately.
    pub fn start(self) -> SchedulerHandle {
        let shutdown = self.shutdown.clone();
        let interval = self.engine.config().schedule_interval;

        let join = tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "sync scheduler started");

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = self.shutdown.notified() => {
                        tracing::info!("sync scheduler received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }

            tracing::info!("sync scheduler stopped");
        });

        SchedulerHandle { shutdown, join }
    }
}
