use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::requests::{cancel_job_requests, count_job_requests, insert_request, InsertRequest};
use super::{decode_json, Database};
use crate::errors::{AppError, AppResult, RepositoryError};
use crate::models::{
    Job, JobFilter, JobProgress, JobStatus, Page, PageRequest, SpiderSettings,
};
use crate::utils::DateTimeParser;

const JOB_COLUMNS: &str = "id, spider_id, status, settings, concurrency_limit, requires_browser, \
     cancelled, notes, schedule_id, scheduled_for, started_at, finished_at, created_at, updated_at";

/// Job row to insert together with its seed requests
#[derive(Debug, Clone)]
pub struct InsertJob<'a> {
    pub spider_id: i64,
    pub settings: &'a SpiderSettings,
    /// Resolved per-job in-flight limit, 0 for unlimited
    pub concurrency_limit: u32,
    /// `(schedule_id, scheduled_for)` when created by the scheduler driver
    pub schedule_slot: Option<(i64, DateTime<Utc>)>,
}

fn job_from_row(row: &SqliteRow) -> AppResult<Job> {
    let status: String = row.try_get("status")?;
    let settings: String = row.try_get("settings")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let started_at =
        DateTimeParser::parse_optional_column("jobs", "started_at", row.try_get("started_at")?)?;
    let finished_at =
        DateTimeParser::parse_optional_column("jobs", "finished_at", row.try_get("finished_at")?)?;

    let duration_ms = match (started_at, finished_at) {
        (Some(started), Some(finished)) => Some((finished - started).num_milliseconds()),
        _ => None,
    };

    Ok(Job {
        id: row.try_get("id")?,
        spider_id: row.try_get("spider_id")?,
        status: status
            .parse()
            .map_err(|e: String| RepositoryError::decode("jobs", "status", e))?,
        settings: decode_json("jobs", "settings", &settings)?,
        cancelled: row.try_get("cancelled")?,
        notes: row.try_get("notes")?,
        schedule_id: row.try_get("schedule_id")?,
        scheduled_for: DateTimeParser::parse_optional_column(
            "jobs",
            "scheduled_for",
            row.try_get("scheduled_for")?,
        )?,
        started_at,
        finished_at,
        duration_ms,
        created_at: DateTimeParser::parse_column("jobs", "created_at", &created_at)?,
        updated_at: DateTimeParser::parse_column("jobs", "updated_at", &updated_at)?,
    })
}

async fn fetch_job(conn: &mut SqliteConnection, id: i64) -> AppResult<Option<Job>> {
    let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Take the write lock on a job row. SQLite locks the whole database for
/// the rest of the transaction, which serializes every other writer that
/// could change the job's request multiset.
async fn lock_job(conn: &mut SqliteConnection, id: i64) -> AppResult<bool> {
    let result = sqlx::query("UPDATE jobs SET status = status WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

impl Database {
    /// Insert a job and its seed requests atomically.
    ///
    /// A job without seeds is finished on the spot as `completed`. Returns
    /// `None` when `schedule_slot` has already produced a job.
    pub async fn create_job_with_seeds(
        &self,
        job: &InsertJob<'_>,
        seeds: &[InsertRequest<'_>],
        now: DateTime<Utc>,
    ) -> AppResult<Option<Job>> {
        let timestamp = DateTimeParser::format_for_storage(&now);
        let (status, finished) = if seeds.is_empty() {
            (JobStatus::Completed, Some(timestamp.clone()))
        } else {
            (JobStatus::Pending, None)
        };

        let mut tx = self.pool.begin().await?;
        let job_id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (spider_id, status, settings, concurrency_limit, requires_browser,
                              schedule_id, scheduled_for, started_at, finished_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(job.spider_id)
        .bind(status.as_str())
        .bind(serde_json::to_string(job.settings)?)
        .bind(i64::from(job.concurrency_limit))
        .bind(job.settings.browser)
        .bind(job.schedule_slot.map(|(schedule_id, _)| schedule_id))
        .bind(
            job.schedule_slot
                .map(|(_, slot)| DateTimeParser::format_for_storage(&slot)),
        )
        .bind(&finished)
        .bind(&finished)
        .bind(&timestamp)
        .bind(&timestamp)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job_id) = job_id else {
            tx.rollback().await?;
            return Ok(None);
        };

        for seed in seeds {
            insert_request(&mut *tx, job_id, seed, now).await?;
        }

        let created = fetch_job(&mut *tx, job_id)
            .await?
            .ok_or_else(|| AppError::internal(format!("job {job_id} vanished during creation")))?;
        tx.commit().await?;
        Ok(Some(created))
    }

    pub async fn get_job(&self, id: i64) -> AppResult<Option<Job>> {
        let mut conn = self.pool.acquire().await?;
        fetch_job(&mut *conn, id).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter, page: &PageRequest) -> AppResult<Page<Job>> {
        const WHERE: &str = "WHERE (? IS NULL OR status = ?) AND (? IS NULL OR spider_id = ?)";
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM jobs {WHERE}"))
            .bind(status)
            .bind(status)
            .bind(filter.spider_id)
            .bind(filter.spider_id)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs {WHERE} ORDER BY id DESC LIMIT ? OFFSET ?"
        ))
        .bind(status)
        .bind(status)
        .bind(filter.spider_id)
        .bind(filter.spider_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let items = rows.iter().map(job_from_row).collect::<AppResult<Vec<_>>>()?;
        Ok(Page::new(items, total as u64, *page))
    }

    pub async fn update_job_notes(
        &self,
        id: i64,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Job>> {
        let row = sqlx::query(&format!(
            "UPDATE jobs SET notes = ?, updated_at = ? WHERE id = ? RETURNING {JOB_COLUMNS}"
        ))
        .bind(notes)
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    /// Delete a job and its requests, refusing while any request is
    /// unterminated. Returns false for an unknown job.
    pub async fn delete_job(&self, id: i64) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;
        if !lock_job(&mut *tx, id).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        let counts = count_job_requests(&mut *tx, id).await?;
        if !counts.all_terminal() {
            tx.rollback().await?;
            return Err(AppError::invalid_state(format!(
                "job {id} still owns {} unterminated requests",
                counts.pending + counts.in_progress
            )));
        }

        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Recompute a job's status from its current request multiset.
    ///
    /// Runs under the job's write lock, so concurrent recomputes serialize
    /// and the last one always reflects the latest multiset. Returns the
    /// previous status alongside the updated job.
    pub async fn recompute_job_status<F>(
        &self,
        id: i64,
        now: DateTime<Utc>,
        derive: F,
    ) -> AppResult<Option<(JobStatus, Job)>>
    where
        F: FnOnce(&JobProgress) -> JobStatus,
    {
        let mut tx = self.pool.begin().await?;
        if !lock_job(&mut *tx, id).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        let current = fetch_job(&mut *tx, id)
            .await?
            .ok_or_else(|| AppError::not_found("job", id))?;
        let progress = JobProgress {
            counts: count_job_requests(&mut *tx, id).await?,
            started: current.started_at.is_some(),
            cancelled: current.cancelled,
        };
        let status = derive(&progress);
        let timestamp = DateTimeParser::format_for_storage(&now);

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?,
                started_at = CASE WHEN ? THEN COALESCE(started_at, ?) ELSE started_at END,
                finished_at = CASE WHEN ? THEN COALESCE(finished_at, ?) ELSE NULL END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(status != JobStatus::Pending)
        .bind(&timestamp)
        .bind(status.is_terminal())
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let updated = fetch_job(&mut *tx, id)
            .await?
            .ok_or_else(|| AppError::not_found("job", id))?;
        tx.commit().await?;
        Ok(Some((current.status, updated)))
    }

    /// Cancel a pending or running job and every request it still owns.
    /// Returns the failed job and the number of requests cancelled.
    pub async fn cancel_job(&self, id: i64, now: DateTime<Utc>) -> AppResult<Option<(Job, u64)>> {
        let mut tx = self.pool.begin().await?;
        if !lock_job(&mut *tx, id).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        let current = fetch_job(&mut *tx, id)
            .await?
            .ok_or_else(|| AppError::not_found("job", id))?;
        if current.status.is_terminal() {
            tx.rollback().await?;
            return Err(AppError::invalid_state(format!(
                "job {id} is already {}",
                current.status
            )));
        }

        let cancelled = cancel_job_requests(&mut *tx, id, now).await?;
        let timestamp = DateTimeParser::format_for_storage(&now);
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', cancelled = 1,
                finished_at = COALESCE(finished_at, ?), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let updated = fetch_job(&mut *tx, id)
            .await?
            .ok_or_else(|| AppError::not_found("job", id))?;
        tx.commit().await?;
        Ok(Some((updated, cancelled)))
    }
}

