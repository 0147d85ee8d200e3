use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{is_unique_violation, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{NewProject, Page, PageRequest, Project};
use crate::utils::DateTimeParser;

const PROJECT_COLUMNS: &str = "id, name, description, created_at";

fn project_from_row(row: &SqliteRow) -> AppResult<Project> {
    let created_at: String = row.try_get("created_at")?;
    Ok(Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: DateTimeParser::parse_column("projects", "created_at", &created_at)?,
    })
}

impl Database {
    pub async fn create_project(
        &self,
        project: &NewProject,
        now: DateTime<Utc>,
    ) -> AppResult<Project> {
        let row = sqlx::query(&format!(
            "INSERT INTO projects (name, description, created_at) VALUES (?, ?, ?) RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(&project.name)
        .bind(&project.description)
        .bind(DateTimeParser::format_for_storage(&now))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::validation(format!("project '{}' already exists", project.name))
            } else {
                e.into()
            }
        })?;

        project_from_row(&row)
    }

    pub async fn get_project(&self, id: i64) -> AppResult<Option<Project>> {
        let row = sqlx::query(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(project_from_row).transpose()
    }

    pub async fn list_projects(&self, page: &PageRequest) -> AppResult<Page<Project>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY id LIMIT ? OFFSET ?"
        ))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(project_from_row)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Page::new(items, total as u64, *page))
    }

    pub async fn delete_project(&self, id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Requests of any job of any spider in the project that are still
    /// pending or in flight
    pub async fn count_unterminated_requests_for_project(&self, project_id: i64) -> AppResult<i64> {
        let count = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM requests r
            JOIN jobs j ON j.id = r.job_id
            JOIN spiders s ON s.id = j.spider_id
            WHERE s.project_id = ? AND r.status IN ('pending', 'in_progress')
            "#,
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
