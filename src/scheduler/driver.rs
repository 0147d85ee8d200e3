//! Periodic trigger loop for due schedules

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::Scheduler;
use crate::errors::AppResult;
use crate::jobs::JobManager;
use crate::models::Schedule;
use crate::utils::SharedClock;

/// Outcome of one driver tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub due: usize,
    pub jobs_created: usize,
    /// Slots that already had a job from an interrupted earlier tick
    pub already_fired: usize,
    pub failed: usize,
}

/// Runs the due, create job, mark executed unit for each due schedule.
///
/// `mark_executed` is always the last step, so a crash before it leaves the
/// schedule due; the unique `(schedule_id, scheduled_for)` job slot keeps the
/// retried unit from creating a second job.
pub struct SchedulerDriver {
    scheduler: Scheduler,
    jobs: JobManager,
    clock: SharedClock,
    tick: Duration,
}

impl SchedulerDriver {
    pub fn new(scheduler: Scheduler, jobs: JobManager, clock: SharedClock) -> Self {
        let tick = Duration::from_secs(scheduler.config().tick_interval_secs.max(1));
        Self {
            scheduler,
            jobs,
            clock,
            tick,
        }
    }

    pub async fn run(&self, cancellation_token: CancellationToken) {
        info!("Starting scheduler driver (tick every {:?})", self.tick);
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) if report.due > 0 => info!(
                            "Scheduler tick: {} due, {} jobs created, {} already fired, {} failed",
                            report.due, report.jobs_created, report.already_fired, report.failed
                        ),
                        Ok(_) => debug!("Scheduler tick: nothing due"),
                        Err(e) => error!("Scheduler tick failed: {}", e),
                    }
                }
                _ = cancellation_token.cancelled() => {
                    info!("Scheduler driver received cancellation signal, shutting down");
                    break;
                }
            }
        }

        info!("Scheduler driver stopped");
    }

    /// Process every schedule due at the current time
    pub async fn run_once(&self) -> AppResult<TickReport> {
        let now = self.clock.now();
        let due = self.scheduler.list_due(now).await?;
        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };

        for schedule in &due {
            match self.fire(schedule, now).await {
                Ok(true) => report.jobs_created += 1,
                Ok(false) => report.already_fired += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        "Failed to trigger schedule {} for spider {}: {}",
                        schedule.id, schedule.spider_id, e
                    );
                }
            }
        }

        Ok(report)
    }

    /// Returns whether a new job was created for the due slot
    async fn fire(&self, schedule: &Schedule, now: DateTime<Utc>) -> AppResult<bool> {
        let slot = schedule.next_run_at.unwrap_or(now);
        let created = self
            .jobs
            .create_scheduled_job(schedule.spider_id, schedule.id, slot)
            .await?;

        match &created {
            Some(job) => info!(
                "Schedule {} fired for slot {}: created job {}",
                schedule.id, slot, job.id
            ),
            None => debug!(
                "Schedule {} slot {} already produced a job, finishing trigger",
                schedule.id, slot
            ),
        }

        self.scheduler.mark_executed(schedule.id, now).await?;
        Ok(created.is_some())
    }
}
