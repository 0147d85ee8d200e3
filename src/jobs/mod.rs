//! Job lifecycle
//!
//! A job's status is never stored incrementally: every recompute derives it
//! from the current multiset of its request statuses under the job's write
//! lock, which keeps concurrent recomputes idempotent.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::{Config, JobsConfig, QueueConfig};
use crate::database::jobs::InsertJob;
use crate::database::{Database, InsertRequest};
use crate::errors::{AppError, AppResult};
use crate::models::{
    Job, JobFilter, JobProgress, JobStatus, JobUpdate, Page, PageRequest, RequestStatusCounts,
    Spider,
};
use crate::utils::urls::validate_target_url;
use crate::utils::SharedClock;

/// Job status as a pure function of its progress.
///
/// Cancellation is sticky `failed`. A job without requests is a completed
/// no-op. Once every request is terminal the job is `failed` if any of them
/// is `error`, otherwise `completed`. Before that it is `running` as soon
/// as any request has left `pending`.
pub fn derive_status(progress: &JobProgress) -> JobStatus {
    if progress.cancelled {
        return JobStatus::Failed;
    }

    let counts = &progress.counts;
    if counts.total() == 0 {
        return JobStatus::Completed;
    }
    if counts.all_terminal() {
        return if counts.error > 0 {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
    }

    let left_pending = counts.in_progress + counts.done + counts.error > 0;
    if progress.started || left_pending {
        JobStatus::Running
    } else {
        JobStatus::Pending
    }
}

#[derive(Clone)]
pub struct JobManager {
    database: Database,
    queue: QueueConfig,
    jobs: JobsConfig,
    clock: SharedClock,
}

impl JobManager {
    pub fn new(database: Database, config: &Config, clock: SharedClock) -> Self {
        Self {
            database,
            queue: config.queue.clone(),
            jobs: config.jobs.clone(),
            clock,
        }
    }

    /// Snapshot the spider's start URLs and settings into a new pending job
    /// with one seed request per start URL
    pub async fn create_job(&self, spider_id: i64) -> AppResult<Job> {
        self.create(spider_id, None)
            .await?
            .ok_or_else(|| AppError::internal("job creation without a schedule slot was skipped"))
    }

    /// Create the job for one fire slot of a schedule. Returns `None` when
    /// that slot already produced a job.
    pub async fn create_scheduled_job(
        &self,
        spider_id: i64,
        schedule_id: i64,
        scheduled_for: DateTime<Utc>,
    ) -> AppResult<Option<Job>> {
        self.create(spider_id, Some((schedule_id, scheduled_for)))
            .await
    }

    async fn create(
        &self,
        spider_id: i64,
        schedule_slot: Option<(i64, DateTime<Utc>)>,
    ) -> AppResult<Option<Job>> {
        let spider = self
            .database
            .get_spider(spider_id)
            .await?
            .ok_or_else(|| AppError::validation(format!("unknown spider {spider_id}")))?;

        let now = self.clock.now();
        let (priority, max_retries) = self.seed_policy(&spider)?;
        let seeds = spider
            .start_urls
            .iter()
            .map(|url| -> AppResult<InsertRequest<'_>> {
                validate_target_url(url).map_err(AppError::validation)?;
                Ok(InsertRequest {
                    url: url.as_str(),
                    method: spider.settings.method,
                    priority,
                    max_retries,
                    scheduled_at: now,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        let insert = InsertJob {
            spider_id,
            settings: &spider.settings,
            concurrency_limit: spider
                .settings
                .concurrency
                .unwrap_or(self.jobs.default_concurrency),
            schedule_slot,
        };

        let created = self
            .database
            .create_job_with_seeds(&insert, &seeds, now)
            .await?;
        match &created {
            Some(job) if seeds.is_empty() => info!(
                "Created job {} for spider {} with no start URLs; completed immediately",
                job.id, spider_id
            ),
            Some(job) => info!(
                "Created job {} for spider {} with {} seed requests",
                job.id,
                spider_id,
                seeds.len()
            ),
            None => debug!(
                "Schedule slot {:?} already produced a job for spider {}",
                schedule_slot, spider_id
            ),
        }
        Ok(created)
    }

    fn seed_policy(&self, spider: &Spider) -> AppResult<(i32, u32)> {
        let priority = spider.settings.default_priority.unwrap_or(0);
        if priority < self.queue.min_priority || priority > self.queue.max_priority {
            return Err(AppError::validation(format!(
                "spider {} default priority {priority} outside [{}, {}]",
                spider.id, self.queue.min_priority, self.queue.max_priority
            )));
        }

        let max_retries = spider
            .settings
            .max_retries
            .unwrap_or(self.queue.default_max_retries);
        if max_retries > self.queue.max_retries_cap {
            return Err(AppError::validation(format!(
                "spider {} max_retries {max_retries} exceeds cap {}",
                spider.id, self.queue.max_retries_cap
            )));
        }

        Ok((priority, max_retries))
    }

    /// Re-derive the job's status from its requests. Safe to call
    /// redundantly and concurrently.
    pub async fn recompute_status(&self, job_id: i64) -> AppResult<Job> {
        let (previous, job) = self
            .database
            .recompute_job_status(job_id, self.clock.now(), derive_status)
            .await?
            .ok_or_else(|| AppError::not_found("job", job_id))?;

        if previous != job.status {
            info!("Job {} {} -> {}", job.id, previous, job.status);
        }
        Ok(job)
    }

    /// Cancel a pending or running job. Its unterminated requests become
    /// cancelled errors and the job is `failed` for good.
    pub async fn cancel(&self, job_id: i64) -> AppResult<Job> {
        let (job, cancelled) = self
            .database
            .cancel_job(job_id, self.clock.now())
            .await?
            .ok_or_else(|| AppError::not_found("job", job_id))?;

        info!("Cancelled job {} ({} requests cancelled)", job.id, cancelled);
        Ok(job)
    }

    pub async fn get(&self, job_id: i64) -> AppResult<Job> {
        self.database
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::not_found("job", job_id))
    }

    /// Per-status request counts for one job
    pub async fn progress(&self, job_id: i64) -> AppResult<RequestStatusCounts> {
        self.get(job_id).await?;
        self.database.count_requests_for_job(job_id).await
    }

    pub async fn list(&self, filter: &JobFilter, page: &PageRequest) -> AppResult<Page<Job>> {
        self.database.list_jobs(filter, page).await
    }

    pub async fn update(&self, job_id: i64, update: &JobUpdate) -> AppResult<Job> {
        self.database
            .update_job_notes(job_id, update.notes.as_deref(), self.clock.now())
            .await?
            .ok_or_else(|| AppError::not_found("job", job_id))
    }

    /// Refused while the job still owns pending or in-progress requests
    pub async fn delete(&self, job_id: i64) -> AppResult<()> {
        if !self.database.delete_job(job_id).await? {
            return Err(AppError::not_found("job", job_id));
        }
        info!("Deleted job {}", job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestStatusCounts;
    use proptest::prelude::*;

    fn progress(pending: u64, in_progress: u64, done: u64, error: u64) -> JobProgress {
        JobProgress {
            counts: RequestStatusCounts {
                pending,
                in_progress,
                done,
                error,
            },
            started: false,
            cancelled: false,
        }
    }

    #[test]
    fn test_fresh_job_is_pending() {
        assert_eq!(derive_status(&progress(3, 0, 0, 0)), JobStatus::Pending);
    }

    #[test]
    fn test_running_once_a_request_left_pending() {
        assert_eq!(derive_status(&progress(2, 1, 0, 0)), JobStatus::Running);
        assert_eq!(derive_status(&progress(2, 0, 1, 0)), JobStatus::Running);

        // a re-queued request does not send a started job back to pending
        let mut requeued = progress(3, 0, 0, 0);
        requeued.started = true;
        assert_eq!(derive_status(&requeued), JobStatus::Running);
    }

    #[test]
    fn test_terminal_outcomes() {
        assert_eq!(derive_status(&progress(0, 0, 3, 0)), JobStatus::Completed);
        assert_eq!(derive_status(&progress(0, 0, 2, 1)), JobStatus::Failed);
        assert_eq!(derive_status(&progress(0, 0, 0, 0)), JobStatus::Completed);
    }

    #[test]
    fn test_cancellation_is_sticky() {
        let mut cancelled = progress(0, 0, 3, 0);
        cancelled.cancelled = true;
        assert_eq!(derive_status(&cancelled), JobStatus::Failed);
    }

    proptest! {
        #[test]
        fn prop_status_follows_request_multiset(
            pending in 0u64..5,
            in_progress in 0u64..5,
            done in 0u64..5,
            error in 0u64..5,
            started in any::<bool>(),
        ) {
            let mut p = progress(pending, in_progress, done, error);
            p.started = started;
            let status = derive_status(&p);
            let total = pending + in_progress + done + error;
            let all_terminal = pending == 0 && in_progress == 0;

            prop_assert_eq!(
                status == JobStatus::Completed,
                total == 0 || (all_terminal && error == 0)
            );
            prop_assert_eq!(status == JobStatus::Failed, total > 0 && all_terminal && error > 0);
        }
    }
}
