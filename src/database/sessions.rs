use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{decode_json, is_foreign_key_violation, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{Page, PageRequest, Session, SessionFilter};
use crate::utils::DateTimeParser;

const SESSION_COLUMNS: &str =
    "id, spider_id, label, state, valid_until, created_at, updated_at";

/// `is_expired` depends on the caller's notion of now
fn session_from_row(row: &SqliteRow, now: DateTime<Utc>) -> AppResult<Session> {
    let state: String = row.try_get("state")?;
    let valid_until: String = row.try_get("valid_until")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let valid_until = DateTimeParser::parse_column("sessions", "valid_until", &valid_until)?;

    Ok(Session {
        id: row.try_get("id")?,
        spider_id: row.try_get("spider_id")?,
        label: row.try_get("label")?,
        state: decode_json("sessions", "state", &state)?,
        valid_until,
        is_expired: valid_until < now,
        created_at: DateTimeParser::parse_column("sessions", "created_at", &created_at)?,
        updated_at: DateTimeParser::parse_column("sessions", "updated_at", &updated_at)?,
    })
}

impl Database {
    /// Create the `(spider, label)` identity, replacing an existing one
    pub async fn upsert_session(
        &self,
        spider_id: i64,
        label: &str,
        state: &Value,
        valid_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<Session> {
        let timestamp = DateTimeParser::format_for_storage(&now);
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sessions (spider_id, label, state, valid_until, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (spider_id, label) DO UPDATE
            SET state = excluded.state,
                valid_until = excluded.valid_until,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(spider_id)
        .bind(label)
        .bind(serde_json::to_string(state)?)
        .bind(DateTimeParser::format_for_storage(&valid_until))
        .bind(&timestamp)
        .bind(&timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::validation(format!("unknown spider {spider_id}"))
            } else {
                e.into()
            }
        })?;

        session_from_row(&row, now)
    }

    pub async fn get_session(&self, id: i64, now: DateTime<Utc>) -> AppResult<Option<Session>> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(|r| session_from_row(r, now)).transpose()
    }

    /// Unexpired session for a spider and label
    pub async fn find_valid_session(
        &self,
        spider_id: i64,
        label: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE spider_id = ? AND label = ? AND valid_until >= ?"
        ))
        .bind(spider_id)
        .bind(label)
        .bind(DateTimeParser::format_for_storage(&now))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(|r| session_from_row(r, now)).transpose()
    }

    pub async fn list_sessions(
        &self,
        filter: &SessionFilter,
        page: &PageRequest,
        now: DateTime<Utc>,
    ) -> AppResult<Page<Session>> {
        const WHERE: &str =
            "WHERE (? IS NULL OR spider_id = ?) AND (? IS NULL OR (valid_until < ?) = ?)";
        let timestamp = DateTimeParser::format_for_storage(&now);

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM sessions {WHERE}"))
            .bind(filter.spider_id)
            .bind(filter.spider_id)
            .bind(filter.expired)
            .bind(&timestamp)
            .bind(filter.expired)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions {WHERE} ORDER BY id LIMIT ? OFFSET ?"
        ))
        .bind(filter.spider_id)
        .bind(filter.spider_id)
        .bind(filter.expired)
        .bind(&timestamp)
        .bind(filter.expired)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(|r| session_from_row(r, now))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Page::new(items, total as u64, *page))
    }

    /// Compare-and-swap on `valid_until`. Returns None when the session is
    /// gone or was changed concurrently.
    pub async fn update_session_validity(
        &self,
        id: i64,
        expected: DateTime<Utc>,
        valid_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Session>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE sessions SET valid_until = ?, updated_at = ?
            WHERE id = ? AND valid_until = ?
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(DateTimeParser::format_for_storage(&valid_until))
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(id)
        .bind(DateTimeParser::format_for_storage(&expected))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(|r| session_from_row(r, now)).transpose()
    }

    pub async fn delete_session(&self, id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE valid_until < ?")
            .bind(DateTimeParser::format_for_storage(&now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
