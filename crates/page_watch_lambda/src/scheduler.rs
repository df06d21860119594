//! Local stand-in for the external scheduler.
//!
//! Emits one poll tick per interval for a single account. A tick that fails
//! is logged and dropped; the next interval is the retry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use page_watch_core::contract::{PollTick, TickReport};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::adapters::invoke::MonitorInvoker;
use crate::adapters::state_store::StateStore;
use crate::config::RunSettings;
use crate::error::OrchestratorError;
use crate::handlers::handle_tick;

pub struct SchedulerWorker {
    account_id: String,
    store: Arc<dyn StateStore>,
    monitor: Arc<dyn MonitorInvoker>,
    settings: RunSettings,
}

impl SchedulerWorker {
    pub fn new(
        account_id: impl Into<String>,
        store: Arc<dyn StateStore>,
        monitor: Arc<dyn MonitorInvoker>,
        settings: RunSettings,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            store,
            monitor,
            settings,
        }
    }

    /// Fires ticks until shutdown is signaled. Missed intervals are skipped,
    /// never replayed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.settings.interval.period();
        info!(
            component = "scheduler",
            event = "scheduler_started",
            account_id = %self.account_id,
            interval_secs = period.as_secs(),
            "starting scheduler"
        );

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let _ = self.fire_once(Utc::now()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(
                            component = "scheduler",
                            event = "scheduler_stopped",
                            account_id = %self.account_id,
                            "scheduler shutting down"
                        );
                        break;
                    }
                }
            }
        }
    }

    pub async fn fire_once(&self, fired_at: DateTime<Utc>) -> Result<TickReport, OrchestratorError> {
        let tick = PollTick {
            account_id: self.account_id.clone(),
            fired_at: Some(fired_at),
        };
        let result = handle_tick(
            tick,
            self.store.as_ref(),
            self.monitor.as_ref(),
            &self.settings,
        )
        .await;
        if let Err(error) = &result {
            error!(
                component = "scheduler",
                event = "tick_failed",
                account_id = %self.account_id,
                error = %error,
                "tick failed; waiting for next interval"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use page_watch_core::contract::{MonitorReport, MonitorRequest};

    use crate::adapters::state_store::InMemoryStateStore;
    use crate::error::InvokeError;

    use super::*;

    #[derive(Default)]
    struct CountingMonitor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MonitorInvoker for CountingMonitor {
        async fn invoke_monitor(
            &self,
            request: &MonitorRequest,
        ) -> Result<MonitorReport, InvokeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(MonitorReport {
                source_id: request.source_id.clone(),
                ..MonitorReport::default()
            })
        }
    }

    fn worker(monitor: Arc<CountingMonitor>) -> SchedulerWorker {
        let store = InMemoryStateStore::new();
        store.register("A1", "S1");
        SchedulerWorker::new("A1", Arc::new(store), monitor, RunSettings::default())
    }

    #[tokio::test]
    async fn fire_once_runs_a_full_tick() {
        let monitor = Arc::new(CountingMonitor::default());
        let report = worker(monitor.clone())
            .fire_once(Utc::now())
            .await
            .expect("tick succeeds");

        assert_eq!(report.sources_planned, 1);
        assert_eq!(monitor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_interval_until_shutdown() {
        let monitor = Arc::new(CountingMonitor::default());
        let worker = Arc::new(worker(monitor.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let running = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(shutdown_rx).await }
        });

        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown_tx.send(true).expect("worker listening");
        running.await.expect("worker exits");

        assert_eq!(monitor.calls.load(Ordering::SeqCst), 3);
    }
}
