use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{decode_unsigned, Database};
use crate::errors::AppResult;
use crate::models::{Response, ResponseRecord};
use crate::utils::DateTimeParser;

const RESPONSE_COLUMNS: &str =
    "id, request_id, status_code, latency_ms, from_cache, body_size, is_current, fetched_at";

fn response_from_row(row: &SqliteRow) -> AppResult<Response> {
    let fetched_at: String = row.try_get("fetched_at")?;
    Ok(Response {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        status_code: decode_unsigned("responses", "status_code", row.try_get("status_code")?)?,
        latency_ms: decode_unsigned("responses", "latency_ms", row.try_get("latency_ms")?)?,
        from_cache: row.try_get("from_cache")?,
        body_size: decode_unsigned("responses", "body_size", row.try_get("body_size")?)?,
        is_current: row.try_get("is_current")?,
        fetched_at: DateTimeParser::parse_column("responses", "fetched_at", &fetched_at)?,
    })
}

/// Store a new current response for a request; earlier ones become history
pub(crate) async fn insert_response(
    conn: &mut SqliteConnection,
    request_id: i64,
    record: &ResponseRecord,
    now: DateTime<Utc>,
) -> AppResult<i64> {
    sqlx::query("UPDATE responses SET is_current = 0 WHERE request_id = ? AND is_current = 1")
        .bind(request_id)
        .execute(&mut *conn)
        .await?;

    let id = sqlx::query_scalar(
        r#"
        INSERT INTO responses (request_id, status_code, latency_ms, from_cache, body_size, is_current, fetched_at)
        VALUES (?, ?, ?, ?, ?, 1, ?)
        RETURNING id
        "#,
    )
    .bind(request_id)
    .bind(i64::from(record.status_code))
    .bind(i64::try_from(record.latency_ms).unwrap_or(i64::MAX))
    .bind(record.from_cache)
    .bind(i64::try_from(record.body_size).unwrap_or(i64::MAX))
    .bind(DateTimeParser::format_for_storage(&now))
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

impl Database {
    /// All stored attempts of a request, newest first
    pub async fn list_responses(&self, request_id: i64) -> AppResult<Vec<Response>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESPONSE_COLUMNS} FROM responses WHERE request_id = ? ORDER BY id DESC"
        ))
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(response_from_row).collect()
    }
}
