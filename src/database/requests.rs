use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use super::{decode_unsigned, responses::insert_response, Database};
use crate::errors::{AppResult, RepositoryError};
use crate::models::{
    HttpMethod, Page, PageRequest, Request, RequestFilter, RequestStatus, RequestStatusCounts,
    ResponseRecord, WorkerCapabilities,
};
use crate::utils::DateTimeParser;

const REQUEST_COLUMNS: &str = "id, job_id, url, method, priority, retries, max_retries, status, \
     scheduled_at, claimed_by, claimed_at, proxy_id, session_id, cancelled, last_error, \
     created_at, updated_at";

/// Fully resolved request ready for insertion
#[derive(Debug, Clone)]
pub struct InsertRequest<'a> {
    pub url: &'a str,
    pub method: HttpMethod,
    pub priority: i32,
    pub max_retries: u32,
    pub scheduled_at: DateTime<Utc>,
}

/// The `(status, retries)` pair a compare-and-swap update expects to find
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedRequest {
    pub id: i64,
    pub status: RequestStatus,
    pub retries: u32,
}

impl From<&Request> for ObservedRequest {
    fn from(request: &Request) -> Self {
        Self {
            id: request.id,
            status: request.status,
            retries: request.retries,
        }
    }
}

fn request_from_row(row: &SqliteRow) -> AppResult<Request> {
    let method: String = row.try_get("method")?;
    let status: String = row.try_get("status")?;
    let scheduled_at: String = row.try_get("scheduled_at")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Request {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        url: row.try_get("url")?,
        method: method
            .parse()
            .map_err(|e: String| RepositoryError::decode("requests", "method", e))?,
        priority: row.try_get("priority")?,
        retries: decode_unsigned("requests", "retries", row.try_get("retries")?)?,
        max_retries: decode_unsigned("requests", "max_retries", row.try_get("max_retries")?)?,
        status: status
            .parse()
            .map_err(|e: String| RepositoryError::decode("requests", "status", e))?,
        scheduled_at: DateTimeParser::parse_column("requests", "scheduled_at", &scheduled_at)?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: DateTimeParser::parse_optional_column(
            "requests",
            "claimed_at",
            row.try_get("claimed_at")?,
        )?,
        proxy_id: row.try_get("proxy_id")?,
        session_id: row.try_get("session_id")?,
        cancelled: row.try_get("cancelled")?,
        last_error: row.try_get("last_error")?,
        created_at: DateTimeParser::parse_column("requests", "created_at", &created_at)?,
        updated_at: DateTimeParser::parse_column("requests", "updated_at", &updated_at)?,
    })
}

/// Insert one pending request inside the caller's transaction
pub(crate) async fn insert_request(
    conn: &mut SqliteConnection,
    job_id: i64,
    request: &InsertRequest<'_>,
    now: DateTime<Utc>,
) -> AppResult<Request> {
    let timestamp = DateTimeParser::format_for_storage(&now);
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO requests (job_id, url, method, priority, retries, max_retries, status,
                              scheduled_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, 0, ?, 'pending', ?, ?, ?)
        RETURNING {REQUEST_COLUMNS}
        "#
    ))
    .bind(job_id)
    .bind(request.url)
    .bind(request.method.as_str())
    .bind(request.priority)
    .bind(i64::from(request.max_retries))
    .bind(DateTimeParser::format_for_storage(&request.scheduled_at))
    .bind(&timestamp)
    .bind(&timestamp)
    .fetch_one(&mut *conn)
    .await?;

    request_from_row(&row)
}

/// Multiset of request statuses for a job
pub(crate) async fn count_job_requests(
    conn: &mut SqliteConnection,
    job_id: i64,
) -> AppResult<RequestStatusCounts> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM requests WHERE job_id = ? GROUP BY status")
        .bind(job_id)
        .fetch_all(&mut *conn)
        .await?;

    let mut counts = RequestStatusCounts::default();
    for row in rows {
        let status: String = row.try_get("status")?;
        let n: i64 = row.try_get("n")?;
        let status: RequestStatus = status
            .parse()
            .map_err(|e: String| RepositoryError::decode("requests", "status", e))?;
        counts.add(status, n as u64);
    }
    Ok(counts)
}

/// Terminate every unterminated request of a job without touching retry
/// budgets. Returns the number of requests cancelled.
pub(crate) async fn cancel_job_requests(
    conn: &mut SqliteConnection,
    job_id: i64,
    now: DateTime<Utc>,
) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE requests
        SET status = 'error', cancelled = 1, last_error = 'cancelled', updated_at = ?
        WHERE job_id = ? AND status IN ('pending', 'in_progress')
        "#,
    )
    .bind(DateTimeParser::format_for_storage(&now))
    .bind(job_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

impl Database {
    pub async fn insert_request(
        &self,
        job_id: i64,
        request: &InsertRequest<'_>,
        now: DateTime<Utc>,
    ) -> AppResult<Request> {
        let mut conn = self.pool.acquire().await?;
        insert_request(&mut *conn, job_id, request, now).await
    }

    pub async fn get_request(&self, id: i64) -> AppResult<Option<Request>> {
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(request_from_row).transpose()
    }

    pub async fn list_requests(
        &self,
        filter: &RequestFilter,
        page: &PageRequest,
    ) -> AppResult<Page<Request>> {
        const WHERE: &str = r#"
            WHERE (? IS NULL OR status = ?)
              AND (? IS NULL OR job_id = ?)
              AND (? IS NULL OR job_id IN (SELECT id FROM jobs WHERE spider_id = ?))
        "#;
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM requests {WHERE}"))
            .bind(status)
            .bind(status)
            .bind(filter.job_id)
            .bind(filter.job_id)
            .bind(filter.spider_id)
            .bind(filter.spider_id)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests {WHERE} ORDER BY id LIMIT ? OFFSET ?"
        ))
        .bind(status)
        .bind(status)
        .bind(filter.job_id)
        .bind(filter.job_id)
        .bind(filter.spider_id)
        .bind(filter.spider_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(request_from_row)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Page::new(items, total as u64, *page))
    }

    /// Atomically move the best dispatchable request to `in_progress`.
    ///
    /// Selection and transition happen in one statement; the outer
    /// `status = 'pending'` guard makes the claim a compare-and-swap, so a
    /// request is handed to at most one caller.
    pub async fn claim_request(
        &self,
        capabilities: &WorkerCapabilities,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Request>> {
        if matches!(&capabilities.spider_ids, Some(ids) if ids.is_empty()) {
            return Ok(None);
        }

        let timestamp = DateTimeParser::format_for_storage(&now);
        let mut query_builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE requests SET status = 'in_progress', claimed_by = ");
        query_builder
            .push_bind(capabilities.worker_id.clone())
            .push(", claimed_at = ")
            .push_bind(timestamp.clone())
            .push(", updated_at = ")
            .push_bind(timestamp.clone())
            .push(
                " WHERE id = (SELECT r.id FROM requests r JOIN jobs j ON j.id = r.job_id \
                 WHERE r.status = 'pending' AND r.scheduled_at <= ",
            )
            .push_bind(timestamp)
            .push(" AND j.cancelled = 0 AND (j.requires_browser = 0 OR ")
            .push_bind(capabilities.supports_browser)
            .push(
                " = 1) AND (j.concurrency_limit = 0 OR (SELECT COUNT(*) FROM requests busy \
                 WHERE busy.job_id = r.job_id AND busy.status = 'in_progress') < j.concurrency_limit)",
            );

        if let Some(spider_ids) = &capabilities.spider_ids {
            query_builder.push(" AND j.spider_id IN (");
            let mut separated = query_builder.separated(", ");
            for spider_id in spider_ids {
                separated.push_bind(*spider_id);
            }
            separated.push_unseparated(")");
        }

        query_builder
            .push(
                " ORDER BY r.priority DESC, r.scheduled_at ASC, r.id ASC LIMIT 1) \
                 AND status = 'pending' RETURNING ",
            )
            .push(REQUEST_COLUMNS);

        let row = query_builder.build().fetch_optional(&self.pool).await?;
        row.as_ref().map(request_from_row).transpose()
    }

    /// Claim a specific pending request regardless of its `scheduled_at`
    pub async fn mark_request_in_progress(
        &self,
        id: i64,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Request>> {
        let timestamp = DateTimeParser::format_for_storage(&now);
        let row = sqlx::query(&format!(
            r#"
            UPDATE requests
            SET status = 'in_progress', claimed_by = ?, claimed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
              AND job_id IN (SELECT id FROM jobs WHERE cancelled = 0)
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(request_from_row).transpose()
    }

    /// Move a request to `done` or `error`, storing the response attempt in
    /// the same transaction. Returns false if the request no longer matches
    /// `observed`.
    pub async fn finish_request(
        &self,
        observed: ObservedRequest,
        status: RequestStatus,
        last_error: Option<&str>,
        response: Option<&ResponseRecord>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE requests
            SET status = ?, last_error = ?, updated_at = ?
            WHERE id = ? AND status = ? AND retries = ?
            "#,
        )
        .bind(status.as_str())
        .bind(last_error)
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(observed.id)
        .bind(observed.status.as_str())
        .bind(i64::from(observed.retries))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(response) = response {
            insert_response(&mut *tx, observed.id, response, now).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Put a failed request back to `pending` with a consumed retry and a
    /// delayed `scheduled_at`
    pub async fn requeue_request(
        &self,
        observed: ObservedRequest,
        retries: u32,
        scheduled_at: DateTime<Utc>,
        last_error: Option<&str>,
        response: Option<&ResponseRecord>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE requests
            SET status = 'pending', retries = ?, scheduled_at = ?, last_error = ?,
                claimed_by = NULL, claimed_at = NULL, proxy_id = NULL, session_id = NULL,
                updated_at = ?
            WHERE id = ? AND status = ? AND retries = ?
            "#,
        )
        .bind(i64::from(retries))
        .bind(DateTimeParser::format_for_storage(&scheduled_at))
        .bind(last_error)
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(observed.id)
        .bind(observed.status.as_str())
        .bind(i64::from(observed.retries))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(response) = response {
            insert_response(&mut *tx, observed.id, response, now).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Manual retry: back to `pending`, dispatchable now, retry count kept
    pub async fn reopen_request(
        &self,
        observed: ObservedRequest,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let timestamp = DateTimeParser::format_for_storage(&now);
        let result = sqlx::query(
            r#"
            UPDATE requests
            SET status = 'pending', scheduled_at = ?, cancelled = 0, last_error = NULL,
                claimed_by = NULL, claimed_at = NULL, proxy_id = NULL, session_id = NULL,
                updated_at = ?
            WHERE id = ? AND status = ? AND retries = ?
            "#,
        )
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(observed.id)
        .bind(observed.status.as_str())
        .bind(i64::from(observed.retries))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Hand an in-progress request back to the queue untouched
    pub async fn release_request(&self, id: i64, now: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE requests
            SET status = 'pending', claimed_by = NULL, claimed_at = NULL,
                proxy_id = NULL, session_id = NULL, updated_at = ?
            WHERE id = ? AND status = 'in_progress'
            "#,
        )
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record which proxy and session a dispatched request uses
    pub async fn bind_request_resources(
        &self,
        id: i64,
        proxy_id: Option<i64>,
        session_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Request>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE requests
            SET proxy_id = ?, session_id = ?, updated_at = ?
            WHERE id = ? AND status = 'in_progress'
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(proxy_id)
        .bind(session_id)
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(request_from_row).transpose()
    }

    pub async fn update_request_priority(
        &self,
        id: i64,
        priority: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Request>> {
        let row = sqlx::query(&format!(
            "UPDATE requests SET priority = ?, updated_at = ? WHERE id = ? RETURNING {REQUEST_COLUMNS}"
        ))
        .bind(priority)
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(request_from_row).transpose()
    }

    pub async fn cancel_requests_for_job(&self, job_id: i64, now: DateTime<Utc>) -> AppResult<u64> {
        let mut conn = self.pool.acquire().await?;
        cancel_job_requests(&mut *conn, job_id, now).await
    }

    pub async fn count_requests_for_job(&self, job_id: i64) -> AppResult<RequestStatusCounts> {
        let mut conn = self.pool.acquire().await?;
        count_job_requests(&mut *conn, job_id).await
    }
}
