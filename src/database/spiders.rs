use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{decode_json, is_foreign_key_violation, is_unique_violation, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{NewSpider, Page, PageRequest, Spider, SpiderUpdate};
use crate::utils::DateTimeParser;

const SPIDER_COLUMNS: &str =
    "id, project_id, name, start_urls, settings, parse_rules, created_at, updated_at";

fn spider_from_row(row: &SqliteRow) -> AppResult<Spider> {
    let start_urls: String = row.try_get("start_urls")?;
    let settings: String = row.try_get("settings")?;
    let parse_rules: String = row.try_get("parse_rules")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Spider {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        name: row.try_get("name")?,
        start_urls: decode_json("spiders", "start_urls", &start_urls)?,
        settings: decode_json("spiders", "settings", &settings)?,
        parse_rules: decode_json("spiders", "parse_rules", &parse_rules)?,
        created_at: DateTimeParser::parse_column("spiders", "created_at", &created_at)?,
        updated_at: DateTimeParser::parse_column("spiders", "updated_at", &updated_at)?,
    })
}

fn map_spider_write_error(err: sqlx::Error, name: &str) -> AppError {
    if is_unique_violation(&err) {
        AppError::validation(format!("spider '{name}' already exists in this project"))
    } else if is_foreign_key_violation(&err) {
        AppError::validation("unknown project")
    } else {
        err.into()
    }
}

impl Database {
    pub async fn create_spider(&self, spider: &NewSpider, now: DateTime<Utc>) -> AppResult<Spider> {
        let timestamp = DateTimeParser::format_for_storage(&now);
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO spiders (project_id, name, start_urls, settings, parse_rules, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING {SPIDER_COLUMNS}
            "#
        ))
        .bind(spider.project_id)
        .bind(&spider.name)
        .bind(serde_json::to_string(&spider.start_urls)?)
        .bind(serde_json::to_string(&spider.settings)?)
        .bind(serde_json::to_string(&spider.parse_rules)?)
        .bind(&timestamp)
        .bind(&timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_spider_write_error(e, &spider.name))?;

        spider_from_row(&row)
    }

    pub async fn get_spider(&self, id: i64) -> AppResult<Option<Spider>> {
        let row = sqlx::query(&format!("SELECT {SPIDER_COLUMNS} FROM spiders WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(spider_from_row).transpose()
    }

    pub async fn list_spiders(
        &self,
        project_id: Option<i64>,
        page: &PageRequest,
    ) -> AppResult<Page<Spider>> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM spiders WHERE (? IS NULL OR project_id = ?)")
                .bind(project_id)
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query(&format!(
            "SELECT {SPIDER_COLUMNS} FROM spiders WHERE (? IS NULL OR project_id = ?) ORDER BY id LIMIT ? OFFSET ?"
        ))
        .bind(project_id)
        .bind(project_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(spider_from_row)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Page::new(items, total as u64, *page))
    }

    /// Apply an explicit edit. Jobs already created keep their own snapshot.
    pub async fn update_spider(
        &self,
        id: i64,
        update: &SpiderUpdate,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Spider>> {
        let Some(current) = self.get_spider(id).await? else {
            return Ok(None);
        };

        let name = update.name.clone().unwrap_or(current.name);
        let start_urls = update.start_urls.as_ref().unwrap_or(&current.start_urls);
        let settings = update.settings.as_ref().unwrap_or(&current.settings);
        let parse_rules = update.parse_rules.as_ref().unwrap_or(&current.parse_rules);

        let row = sqlx::query(&format!(
            r#"
            UPDATE spiders
            SET name = ?, start_urls = ?, settings = ?, parse_rules = ?, updated_at = ?
            WHERE id = ?
            RETURNING {SPIDER_COLUMNS}
            "#
        ))
        .bind(&name)
        .bind(serde_json::to_string(start_urls)?)
        .bind(serde_json::to_string(settings)?)
        .bind(serde_json::to_string(parse_rules)?)
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_spider_write_error(e, &name))?;

        row.as_ref().map(spider_from_row).transpose()
    }

    pub async fn delete_spider(&self, id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM spiders WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Requests of any job of the spider that are still pending or in flight
    pub async fn count_unterminated_requests_for_spider(&self, spider_id: i64) -> AppResult<i64> {
        let count = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM requests r
            JOIN jobs j ON j.id = r.job_id
            WHERE j.spider_id = ? AND r.status IN ('pending', 'in_progress')
            "#,
        )
        .bind(spider_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
