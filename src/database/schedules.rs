use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{is_foreign_key_violation, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{Page, PageRequest, Schedule, ScheduleFilter};
use crate::utils::DateTimeParser;

const SCHEDULE_COLUMNS: &str =
    "id, spider_id, cron_expr, timezone, enabled, next_run_at, last_run_at, created_at, updated_at";

fn schedule_from_row(row: &SqliteRow) -> AppResult<Schedule> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Schedule {
        id: row.try_get("id")?,
        spider_id: row.try_get("spider_id")?,
        cron_expr: row.try_get("cron_expr")?,
        timezone: row.try_get("timezone")?,
        enabled: row.try_get("enabled")?,
        next_run_at: DateTimeParser::parse_optional_column(
            "schedules",
            "next_run_at",
            row.try_get("next_run_at")?,
        )?,
        last_run_at: DateTimeParser::parse_optional_column(
            "schedules",
            "last_run_at",
            row.try_get("last_run_at")?,
        )?,
        created_at: DateTimeParser::parse_column("schedules", "created_at", &created_at)?,
        updated_at: DateTimeParser::parse_column("schedules", "updated_at", &updated_at)?,
    })
}

/// Validated schedule definition ready for insertion
#[derive(Debug, Clone)]
pub struct InsertSchedule<'a> {
    pub spider_id: i64,
    pub cron_expr: &'a str,
    pub timezone: &'a str,
    pub enabled: bool,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl Database {
    pub async fn create_schedule(
        &self,
        schedule: &InsertSchedule<'_>,
        now: DateTime<Utc>,
    ) -> AppResult<Schedule> {
        let timestamp = DateTimeParser::format_for_storage(&now);
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO schedules (spider_id, cron_expr, timezone, enabled, next_run_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(schedule.spider_id)
        .bind(schedule.cron_expr)
        .bind(schedule.timezone)
        .bind(schedule.enabled)
        .bind(schedule.next_run_at.map(|at| DateTimeParser::format_for_storage(&at)))
        .bind(&timestamp)
        .bind(&timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::validation(format!("unknown spider {}", schedule.spider_id))
            } else {
                e.into()
            }
        })?;

        schedule_from_row(&row)
    }

    pub async fn get_schedule(&self, id: i64) -> AppResult<Option<Schedule>> {
        let row = sqlx::query(&format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(schedule_from_row).transpose()
    }

    pub async fn list_schedules(
        &self,
        filter: &ScheduleFilter,
        page: &PageRequest,
    ) -> AppResult<Page<Schedule>> {
        const WHERE: &str = "WHERE (? IS NULL OR spider_id = ?) AND (? IS NULL OR enabled = ?)";

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM schedules {WHERE}"))
            .bind(filter.spider_id)
            .bind(filter.spider_id)
            .bind(filter.enabled)
            .bind(filter.enabled)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules {WHERE} ORDER BY id LIMIT ? OFFSET ?"
        ))
        .bind(filter.spider_id)
        .bind(filter.spider_id)
        .bind(filter.enabled)
        .bind(filter.enabled)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(schedule_from_row)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Page::new(items, total as u64, *page))
    }

    /// Enabled schedules whose next fire time has passed, earliest first
    pub async fn list_due_schedules(&self, now: DateTime<Utc>) -> AppResult<Vec<Schedule>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SCHEDULE_COLUMNS} FROM schedules
            WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?
            ORDER BY next_run_at ASC, id ASC
            "#
        ))
        .bind(DateTimeParser::format_for_storage(&now))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(schedule_from_row).collect()
    }

    /// Enabled schedules firing in `(now, until]`, earliest first
    pub async fn list_upcoming_schedules(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> AppResult<Vec<Schedule>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SCHEDULE_COLUMNS} FROM schedules
            WHERE enabled = 1 AND next_run_at > ? AND next_run_at <= ?
            ORDER BY next_run_at ASC, id ASC
            "#
        ))
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(DateTimeParser::format_for_storage(&until))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(schedule_from_row).collect()
    }

    /// Replace the cron definition; `next_run_at` is written as given
    pub async fn update_schedule_definition(
        &self,
        id: i64,
        cron_expr: &str,
        timezone: &str,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Schedule>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE schedules
            SET cron_expr = ?, timezone = ?, next_run_at = ?, updated_at = ?
            WHERE id = ?
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(cron_expr)
        .bind(timezone)
        .bind(next_run_at.map(|at| DateTimeParser::format_for_storage(&at)))
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(schedule_from_row).transpose()
    }

    pub async fn enable_schedule(
        &self,
        id: i64,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Schedule>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE schedules
            SET enabled = 1, next_run_at = ?, updated_at = ?
            WHERE id = ? AND enabled = 0
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(next_run_at.map(|at| DateTimeParser::format_for_storage(&at)))
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(schedule_from_row).transpose()
    }

    /// Disable without touching `next_run_at`
    pub async fn disable_schedule(&self, id: i64, now: DateTime<Utc>) -> AppResult<Option<Schedule>> {
        let row = sqlx::query(&format!(
            "UPDATE schedules SET enabled = 0, updated_at = ? WHERE id = ? RETURNING {SCHEDULE_COLUMNS}"
        ))
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(schedule_from_row).transpose()
    }

    /// Advance an enabled schedule after it fired
    pub async fn record_schedule_execution(
        &self,
        id: i64,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Schedule>> {
        let timestamp = DateTimeParser::format_for_storage(&now);
        let row = sqlx::query(&format!(
            r#"
            UPDATE schedules
            SET next_run_at = ?, last_run_at = ?, updated_at = ?
            WHERE id = ? AND enabled = 1
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(DateTimeParser::format_for_storage(&next_run_at))
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(schedule_from_row).transpose()
    }

    pub async fn delete_schedule(&self, id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
