//! Projects and spiders: the reference data jobs are created from

use tracing::info;

use crate::config::QueueConfig;
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{
    NewProject, NewSpider, Page, PageRequest, Project, Spider, SpiderSettings, SpiderUpdate,
};
use crate::utils::urls::validate_target_url;
use crate::utils::SharedClock;

#[derive(Clone)]
pub struct Catalog {
    database: Database,
    queue: QueueConfig,
    clock: SharedClock,
}

impl Catalog {
    pub fn new(database: Database, queue: QueueConfig, clock: SharedClock) -> Self {
        Self {
            database,
            queue,
            clock,
        }
    }

    pub async fn create_project(&self, project: NewProject) -> AppResult<Project> {
        if project.name.trim().is_empty() {
            return Err(AppError::validation("project name must not be empty"));
        }
        let created = self
            .database
            .create_project(&project, self.clock.now())
            .await?;
        info!("Created project {} '{}'", created.id, created.name);
        Ok(created)
    }

    pub async fn get_project(&self, id: i64) -> AppResult<Project> {
        self.database
            .get_project(id)
            .await?
            .ok_or_else(|| AppError::not_found("project", id))
    }

    pub async fn list_projects(&self, page: &PageRequest) -> AppResult<Page<Project>> {
        self.database.list_projects(page).await
    }

    /// Deletes the project's spiders, jobs and schedules with it; refused
    /// while any of its requests is unterminated
    pub async fn delete_project(&self, id: i64) -> AppResult<()> {
        let active = self
            .database
            .count_unterminated_requests_for_project(id)
            .await?;
        if active > 0 {
            return Err(AppError::invalid_state(format!(
                "project {id} still has {active} unterminated requests"
            )));
        }
        if !self.database.delete_project(id).await? {
            return Err(AppError::not_found("project", id));
        }
        info!("Deleted project {}", id);
        Ok(())
    }

    fn validate_spider(
        &self,
        name: &str,
        start_urls: &[String],
        settings: &SpiderSettings,
    ) -> AppResult<()> {
        if name.trim().is_empty() {
            return Err(AppError::validation("spider name must not be empty"));
        }
        for url in start_urls {
            validate_target_url(url).map_err(AppError::validation)?;
        }
        if let Some(priority) = settings.default_priority {
            if priority < self.queue.min_priority || priority > self.queue.max_priority {
                return Err(AppError::validation(format!(
                    "default_priority {priority} outside [{}, {}]",
                    self.queue.min_priority, self.queue.max_priority
                )));
            }
        }
        if let Some(max_retries) = settings.max_retries {
            if max_retries > self.queue.max_retries_cap {
                return Err(AppError::validation(format!(
                    "max_retries {max_retries} exceeds cap {}",
                    self.queue.max_retries_cap
                )));
            }
        }
        Ok(())
    }

    pub async fn create_spider(&self, spider: NewSpider) -> AppResult<Spider> {
        self.validate_spider(&spider.name, &spider.start_urls, &spider.settings)?;
        let created = self
            .database
            .create_spider(&spider, self.clock.now())
            .await?;
        info!(
            "Created spider {} '{}' in project {} with {} start URLs",
            created.id,
            created.name,
            created.project_id,
            created.start_urls.len()
        );
        Ok(created)
    }

    pub async fn get_spider(&self, id: i64) -> AppResult<Spider> {
        self.database
            .get_spider(id)
            .await?
            .ok_or_else(|| AppError::not_found("spider", id))
    }

    pub async fn list_spiders(
        &self,
        project_id: Option<i64>,
        page: &PageRequest,
    ) -> AppResult<Page<Spider>> {
        self.database.list_spiders(project_id, page).await
    }

    /// Explicit edit. Existing jobs keep the settings they were created with.
    pub async fn update_spider(&self, id: i64, update: SpiderUpdate) -> AppResult<Spider> {
        let current = self.get_spider(id).await?;
        self.validate_spider(
            update.name.as_deref().unwrap_or(&current.name),
            update.start_urls.as_deref().unwrap_or(&current.start_urls),
            update.settings.as_ref().unwrap_or(&current.settings),
        )?;

        let updated = self
            .database
            .update_spider(id, &update, self.clock.now())
            .await?
            .ok_or_else(|| AppError::not_found("spider", id))?;
        info!("Updated spider {} '{}'", updated.id, updated.name);
        Ok(updated)
    }

    pub async fn delete_spider(&self, id: i64) -> AppResult<()> {
        let active = self
            .database
            .count_unterminated_requests_for_spider(id)
            .await?;
        if active > 0 {
            return Err(AppError::invalid_state(format!(
                "spider {id} still has {active} unterminated requests"
            )));
        }
        if !self.database.delete_spider(id).await? {
            return Err(AppError::not_found("spider", id));
        }
        info!("Deleted spider {}", id);
        Ok(())
    }
}
