//! Cron schedules for periodic job creation
//!
//! The [`Scheduler`] only classifies schedules as due and advances them; the
//! [`SchedulerDriver`] owns the trigger unit (due, create job, mark executed).

pub mod cron;
mod driver;

pub use self::cron::{CronError, CronSchedule};
pub use driver::{SchedulerDriver, TickReport};

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::info;

use crate::config::SchedulerConfig;
use crate::database::schedules::InsertSchedule;
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{NewSchedule, Page, PageRequest, Schedule, ScheduleFilter, ScheduleUpdate};
use crate::utils::SharedClock;

pub fn parse_timezone(name: &str) -> AppResult<Tz> {
    name.parse::<Tz>()
        .map_err(|_| AppError::validation(format!("unknown timezone '{name}'")))
}

/// Next fire instant of `cron_expr` in `timezone` strictly after `after`
pub fn next_fire(cron_expr: &str, timezone: &str, after: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
    let cron = CronSchedule::parse(cron_expr)
        .map_err(|e| AppError::validation(format!("invalid cron expression '{cron_expr}': {e}")))?;
    let tz = parse_timezone(timezone)?;
    cron.next_after(after, &tz).ok_or_else(|| {
        AppError::validation(format!("cron expression '{cron_expr}' never fires"))
    })
}

#[derive(Clone)]
pub struct Scheduler {
    database: Database,
    config: SchedulerConfig,
    clock: SharedClock,
}

impl Scheduler {
    pub fn new(database: Database, config: SchedulerConfig, clock: SharedClock) -> Self {
        Self {
            database,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Validate and store a schedule. An enabled schedule gets its first
    /// `next_run_at` from the creation time.
    pub async fn create(&self, schedule: NewSchedule) -> AppResult<Schedule> {
        let timezone = schedule
            .timezone
            .clone()
            .unwrap_or_else(|| self.config.default_timezone.clone());
        let now = self.clock.now();
        let first_run = next_fire(&schedule.cron_expr, &timezone, now)?;

        if self.database.get_spider(schedule.spider_id).await?.is_none() {
            return Err(AppError::validation(format!(
                "unknown spider {}",
                schedule.spider_id
            )));
        }

        let created = self
            .database
            .create_schedule(
                &InsertSchedule {
                    spider_id: schedule.spider_id,
                    cron_expr: schedule.cron_expr.trim(),
                    timezone: &timezone,
                    enabled: schedule.enabled,
                    next_run_at: schedule.enabled.then_some(first_run),
                },
                now,
            )
            .await?;

        info!(
            "Created schedule {} for spider {} ('{}' in {}), next run {:?}",
            created.id, created.spider_id, created.cron_expr, created.timezone, created.next_run_at
        );
        Ok(created)
    }

    pub async fn get(&self, id: i64) -> AppResult<Schedule> {
        self.database
            .get_schedule(id)
            .await?
            .ok_or_else(|| AppError::not_found("schedule", id))
    }

    pub async fn list(&self, filter: &ScheduleFilter, page: &PageRequest) -> AppResult<Page<Schedule>> {
        self.database.list_schedules(filter, page).await
    }

    /// Change the cron definition. An enabled schedule is re-planned from
    /// now; a disabled one is re-planned when it is enabled again.
    pub async fn update(&self, id: i64, update: &ScheduleUpdate) -> AppResult<Schedule> {
        let current = self.get(id).await?;
        let cron_expr = update
            .cron_expr
            .as_deref()
            .map(str::trim)
            .unwrap_or(&current.cron_expr);
        let timezone = update.timezone.as_deref().unwrap_or(&current.timezone);

        let now = self.clock.now();
        let next = next_fire(cron_expr, timezone, now)?;
        let next_run_at = if current.enabled {
            Some(next)
        } else {
            current.next_run_at
        };

        let updated = self
            .database
            .update_schedule_definition(id, cron_expr, timezone, next_run_at, now)
            .await?
            .ok_or_else(|| AppError::not_found("schedule", id))?;
        info!(
            "Updated schedule {} to '{}' in {}",
            id, updated.cron_expr, updated.timezone
        );
        Ok(updated)
    }

    pub async fn delete(&self, id: i64) -> AppResult<()> {
        if !self.database.delete_schedule(id).await? {
            return Err(AppError::not_found("schedule", id));
        }
        info!("Deleted schedule {}", id);
        Ok(())
    }

    /// Enable and re-plan from now. A stale pre-disable `next_run_at` is
    /// never resurrected, so re-enabling causes no burst of overdue fires.
    pub async fn enable(&self, id: i64) -> AppResult<Schedule> {
        let current = self.get(id).await?;
        if current.enabled {
            return Ok(current);
        }

        let now = self.clock.now();
        let next = next_fire(&current.cron_expr, &current.timezone, now)?;
        match self.database.enable_schedule(id, Some(next), now).await? {
            Some(enabled) => {
                info!("Enabled schedule {}, next run {}", id, next);
                Ok(enabled)
            }
            // enabled concurrently
            None => self.get(id).await,
        }
    }

    /// Disable; `next_run_at` is left as is and never consulted while
    /// disabled
    pub async fn disable(&self, id: i64) -> AppResult<Schedule> {
        let disabled = self
            .database
            .disable_schedule(id, self.clock.now())
            .await?
            .ok_or_else(|| AppError::not_found("schedule", id))?;
        info!("Disabled schedule {}", id);
        Ok(disabled)
    }

    /// Enabled schedules with `next_run_at <= now`, earliest first
    pub async fn list_due(&self, now: DateTime<Utc>) -> AppResult<Vec<Schedule>> {
        self.database.list_due_schedules(now).await
    }

    /// Enabled schedules with `now < next_run_at <= now + horizon`
    pub async fn list_upcoming(
        &self,
        now: DateTime<Utc>,
        horizon: Duration,
    ) -> AppResult<Vec<Schedule>> {
        if horizon < Duration::zero() {
            return Err(AppError::validation("horizon must not be negative"));
        }
        self.database
            .list_upcoming_schedules(now, now + horizon)
            .await
    }

    /// Advance `next_run_at` to the first fire time strictly after `now`.
    /// Calling it late never re-fires a slot that has already passed.
    pub async fn mark_executed(&self, id: i64, now: DateTime<Utc>) -> AppResult<Schedule> {
        let current = self.get(id).await?;
        if !current.enabled {
            return Err(AppError::invalid_state(format!(
                "schedule {id} is disabled"
            )));
        }

        let next = next_fire(&current.cron_expr, &current.timezone, now)?;
        match self
            .database
            .record_schedule_execution(id, next, now)
            .await?
        {
            Some(updated) => {
                info!("Schedule {} executed, next run {}", id, next);
                Ok(updated)
            }
            None => {
                self.get(id).await?;
                Err(AppError::invalid_state(format!(
                    "schedule {id} was disabled concurrently"
                )))
            }
        }
    }
}
