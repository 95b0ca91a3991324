//! Scheduler worker.
//!
//! A single periodic driver: every polling tick it walks the enabled
//! schedules, dispatches the ones that are due and records the outcome.
//! A failed dispatch (including a run lease held elsewhere) is logged and
//! the schedule simply becomes due again on a later tick; there is no
//! backoff and no queueing.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::engine::SyncEngine;
use crate::schedule::ScheduleRepository;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often to poll the schedules.
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            // Reference deployment polls every 5 minutes.
            poll_interval: Duration::from_secs(300),
        }
    }
}

/// Polls schedules and dispatches reconciliation runs.
pub struct SchedulerWorker {
    engine: Arc<SyncEngine>,
    schedules: Arc<dyn ScheduleRepository>,
    config: SchedulerConfig,
    shutdown: Arc<AtomicBool>,
}

impl SchedulerWorker {
    /// Create a new worker.
    #[must_use]
    pub fn new(
        engine: Arc<SyncEngine>,
        schedules: Arc<dyn ScheduleRepository>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            engine,
            schedules,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for requesting shutdown from another task.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Request the worker to stop after the current tick.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Run the polling loop until shutdown is requested.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Scheduler worker started"
        );

        let mut ticker = interval(self.config.poll_interval);

        loop {
            ticker.tick().await;

            if self.shutdown.load(Ordering::SeqCst) {
                info!("Scheduler worker stopping");
                break;
            }

            self.poll_once().await;
        }
    }

    /// One polling pass over all enabled schedules.
    pub async fn poll_once(&self) {
        let schedules = match self.schedules.list_enabled().await {
            Ok(schedules) => schedules,
            Err(e) => {
                warn!(error = %e, "Failed to load schedules");
                return;
            }
        };

        let now = Utc::now();

        for schedule in schedules {
            if !schedule.is_due(now) {
                continue;
            }

            debug!(
                tenant_id = %schedule.tenant_id,
                entity = %schedule.entity,
                environment = %schedule.environment,
                "Schedule due; dispatching"
            );

            if let Err(e) = self.schedules.mark_scheduled(schedule.id, now).await {
                warn!(schedule_id = %schedule.id, error = %e, "Failed to mark schedule dispatched");
                continue;
            }

            match self
                .engine
                .run(schedule.entity, schedule.tenant_id, schedule.environment)
                .await
            {
                Ok(counts) => {
                    if let Err(e) = self.schedules.mark_completed(schedule.id, Utc::now()).await {
                        warn!(schedule_id = %schedule.id, error = %e, "Failed to mark schedule completed");
                    }
                    info!(
                        tenant_id = %schedule.tenant_id,
                        entity = %schedule.entity,
                        environment = %schedule.environment,
                        processed = counts.processed,
                        failed = counts.failed,
                        "Scheduled run completed"
                    );
                }
                Err(e) => {
                    // The schedule stays eligible; a later qualifying tick
                    // retries it.
                    warn!(
                        tenant_id = %schedule.tenant_id,
                        entity = %schedule.entity,
                        environment = %schedule.environment,
                        error = %e,
                        "Scheduled run failed to dispatch"
                    );
                }
            }
        }
    }
}
