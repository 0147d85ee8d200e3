use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{decode_unsigned, is_unique_violation, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{HealthFilter, NewProxy, Page, PageRequest, Proxy, ProxyFilter};
use crate::utils::DateTimeParser;

/// Health is derived at read time from the configured threshold, bound as
/// the first parameter of every select.
const PROXY_SELECT: &str = "SELECT id, uri, is_active, fail_count, success_rate, total_successes, \
     total_failures, last_ok_at, last_failure_at, last_failure_reason, created_at, updated_at, \
     (fail_count < ?) AS is_healthy FROM proxies";

fn proxy_from_row(row: &SqliteRow) -> AppResult<Proxy> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Proxy {
        id: row.try_get("id")?,
        uri: row.try_get("uri")?,
        is_active: row.try_get("is_active")?,
        fail_count: decode_unsigned("proxies", "fail_count", row.try_get("fail_count")?)?,
        success_rate: row.try_get("success_rate")?,
        total_successes: decode_unsigned(
            "proxies",
            "total_successes",
            row.try_get("total_successes")?,
        )?,
        total_failures: decode_unsigned("proxies", "total_failures", row.try_get("total_failures")?)?,
        last_ok_at: DateTimeParser::parse_optional_column(
            "proxies",
            "last_ok_at",
            row.try_get("last_ok_at")?,
        )?,
        last_failure_at: DateTimeParser::parse_optional_column(
            "proxies",
            "last_failure_at",
            row.try_get("last_failure_at")?,
        )?,
        last_failure_reason: row.try_get("last_failure_reason")?,
        is_healthy: row.try_get("is_healthy")?,
        created_at: DateTimeParser::parse_column("proxies", "created_at", &created_at)?,
        updated_at: DateTimeParser::parse_column("proxies", "updated_at", &updated_at)?,
    })
}

impl Database {
    pub async fn create_proxy(
        &self,
        proxy: &NewProxy,
        health_threshold: u32,
        now: DateTime<Utc>,
    ) -> AppResult<Proxy> {
        let timestamp = DateTimeParser::format_for_storage(&now);
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO proxies (uri, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&proxy.uri)
        .bind(proxy.is_active)
        .bind(&timestamp)
        .bind(&timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::validation("proxy is already registered")
            } else {
                e.into()
            }
        })?;

        self.get_proxy(id, health_threshold)
            .await?
            .ok_or_else(|| AppError::internal(format!("proxy {id} vanished after insert")))
    }

    pub async fn get_proxy(&self, id: i64, health_threshold: u32) -> AppResult<Option<Proxy>> {
        let row = sqlx::query(&format!("{PROXY_SELECT} WHERE id = ?"))
            .bind(i64::from(health_threshold))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(proxy_from_row).transpose()
    }

    pub async fn list_proxies(
        &self,
        filter: &ProxyFilter,
        health_threshold: u32,
        page: &PageRequest,
    ) -> AppResult<Page<Proxy>> {
        const WHERE: &str =
            "WHERE (? IS NULL OR is_active = ?) AND (? IS NULL OR (fail_count < ?) = ?)";
        let healthy = filter.health.map(|h| h == HealthFilter::Healthy);
        let threshold = i64::from(health_threshold);

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM proxies {WHERE}"))
            .bind(filter.active)
            .bind(filter.active)
            .bind(healthy)
            .bind(threshold)
            .bind(healthy)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!("{PROXY_SELECT} {WHERE} ORDER BY id LIMIT ? OFFSET ?"))
            .bind(threshold)
            .bind(filter.active)
            .bind(filter.active)
            .bind(healthy)
            .bind(threshold)
            .bind(healthy)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let items = rows.iter().map(proxy_from_row).collect::<AppResult<Vec<_>>>()?;
        Ok(Page::new(items, total as u64, *page))
    }

    /// Active proxies below the failure threshold
    pub async fn eligible_proxies(&self, health_threshold: u32) -> AppResult<Vec<Proxy>> {
        let rows = sqlx::query(&format!(
            "{PROXY_SELECT} WHERE is_active = 1 AND fail_count < ? ORDER BY id"
        ))
        .bind(i64::from(health_threshold))
        .bind(i64::from(health_threshold))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(proxy_from_row).collect()
    }

    /// Reset the consecutive-failure streak and pull the success rate toward
    /// 100 by `alpha`. A single statement, so concurrent recordings never
    /// lose an update.
    pub async fn record_proxy_success(
        &self,
        id: i64,
        alpha: f64,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let timestamp = DateTimeParser::format_for_storage(&now);
        let result = sqlx::query(
            r#"
            UPDATE proxies
            SET fail_count = 0,
                success_rate = success_rate + ? * (100.0 - success_rate),
                total_successes = total_successes + 1,
                last_ok_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(alpha)
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Extend the failure streak and decay the success rate by `alpha`.
    /// `last_ok_at` is left alone.
    pub async fn record_proxy_failure(
        &self,
        id: i64,
        alpha: f64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let timestamp = DateTimeParser::format_for_storage(&now);
        let result = sqlx::query(
            r#"
            UPDATE proxies
            SET fail_count = fail_count + 1,
                success_rate = success_rate * (1.0 - ?),
                total_failures = total_failures + 1,
                last_failure_at = ?,
                last_failure_reason = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(alpha)
        .bind(&timestamp)
        .bind(reason)
        .bind(&timestamp)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn reset_proxy_stats(&self, id: i64, now: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE proxies
            SET fail_count = 0, success_rate = 100.0, total_successes = 0, total_failures = 0,
                last_failure_at = NULL, last_failure_reason = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_proxy_active(
        &self,
        id: i64,
        active: bool,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query("UPDATE proxies SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(DateTimeParser::format_for_storage(&now))
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Hard delete, refused while an in-progress request is routed through
    /// the proxy. The guard and the delete are one statement.
    pub async fn delete_proxy(&self, id: i64) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM proxies
            WHERE id = ?
              AND NOT EXISTS (
                  SELECT 1 FROM requests WHERE proxy_id = ? AND status = 'in_progress'
              )
            "#,
        )
        .bind(id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM proxies WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        if exists > 0 {
            return Err(AppError::invalid_state(format!(
                "proxy {id} is bound to in-flight requests; deactivate it instead"
            )));
        }
        Ok(false)
    }
}
