use chrono::{DateTime, Utc};
use sqlx::Row;

use super::Database;
use crate::errors::{AppResult, RepositoryError};
use crate::models::{JobStatus, RequestStatus, RequestStatusCounts};
use crate::stats::{JobStats, ProxyStats, ResponseStats, ScheduleStats, SessionStats};
use crate::utils::DateTimeParser;

impl Database {
    pub async fn job_stats(&self) -> AppResult<JobStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            let n = n as u64;
            match status
                .parse::<JobStatus>()
                .map_err(|e| RepositoryError::decode("jobs", "status", e))?
            {
                JobStatus::Pending => stats.pending = n,
                JobStatus::Running => stats.running = n,
                JobStatus::Completed => stats.completed = n,
                JobStatus::Failed => stats.failed = n,
            }
            stats.total += n;
        }
        Ok(stats)
    }

    pub async fn request_stats(&self) -> AppResult<RequestStatusCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM requests GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = RequestStatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            let status = status
                .parse::<RequestStatus>()
                .map_err(|e| RepositoryError::decode("requests", "status", e))?;
            counts.add(status, n as u64);
        }
        Ok(counts)
    }

    pub async fn proxy_stats(&self, health_threshold: u32) -> AppResult<ProxyStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(is_active), 0) AS active,
                   COALESCE(SUM(CASE WHEN is_active = 1 AND fail_count < ? THEN 1 ELSE 0 END), 0) AS healthy,
                   AVG(success_rate) AS avg_success_rate
            FROM proxies
            "#,
        )
        .bind(i64::from(health_threshold))
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let active: i64 = row.try_get("active")?;
        let healthy: i64 = row.try_get("healthy")?;
        let avg_success_rate: Option<f64> = row.try_get("avg_success_rate")?;

        Ok(ProxyStats {
            total: total as u64,
            active: active as u64,
            healthy_active: healthy as u64,
            health_percentage: percentage(healthy, active),
            average_success_rate: avg_success_rate.unwrap_or(0.0),
        })
    }

    /// Aggregates over the current response of every request
    pub async fn response_stats(&self) -> AppResult<ResponseStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN status_code < 400 THEN 1 ELSE 0 END), 0) AS successes,
                   COALESCE(SUM(from_cache), 0) AS cache_hits,
                   AVG(latency_ms) AS avg_latency
            FROM responses
            WHERE is_current = 1
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let successes: i64 = row.try_get("successes")?;
        let cache_hits: i64 = row.try_get("cache_hits")?;
        let avg_latency: Option<f64> = row.try_get("avg_latency")?;

        Ok(ResponseStats {
            total: total as u64,
            successes: successes as u64,
            errors: (total - successes) as u64,
            success_rate: percentage(successes, total),
            error_rate: percentage(total - successes, total),
            average_latency_ms: avg_latency.unwrap_or(0.0),
            cache_hits: cache_hits as u64,
            cache_hit_rate: percentage(cache_hits, total),
        })
    }

    pub async fn session_stats(&self, now: DateTime<Utc>) -> AppResult<SessionStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN valid_until < ? THEN 1 ELSE 0 END), 0) AS expired
            FROM sessions
            "#,
        )
        .bind(DateTimeParser::format_for_storage(&now))
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let expired: i64 = row.try_get("expired")?;
        Ok(SessionStats {
            total: total as u64,
            expired: expired as u64,
        })
    }

    pub async fn schedule_stats(&self, now: DateTime<Utc>) -> AppResult<ScheduleStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(enabled), 0) AS enabled,
                   COALESCE(SUM(CASE WHEN enabled = 1 AND next_run_at <= ? THEN 1 ELSE 0 END), 0) AS due
            FROM schedules
            "#,
        )
        .bind(DateTimeParser::format_for_storage(&now))
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let enabled: i64 = row.try_get("enabled")?;
        let due: i64 = row.try_get("due")?;
        Ok(ScheduleStats {
            total: total as u64,
            enabled: enabled as u64,
            due: due as u64,
        })
    }
}

fn percentage(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}
