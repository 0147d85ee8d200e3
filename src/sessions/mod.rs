//! Per-spider session identities with a validity window

use chrono::Duration;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::SessionsConfig;
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{NewSession, Page, PageRequest, Session, SessionFilter};
use crate::utils::SharedClock;

const MAX_CAS_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct SessionStore {
    database: Database,
    config: SessionsConfig,
    clock: SharedClock,
}

impl SessionStore {
    pub fn new(database: Database, config: SessionsConfig, clock: SharedClock) -> Self {
        Self {
            database,
            config,
            clock,
        }
    }

    /// Label used when a caller gives none
    pub fn default_label(&self) -> &str {
        &self.config.default_label
    }

    fn resolve_label<'a>(&'a self, label: Option<&'a str>) -> &'a str {
        match label.map(str::trim) {
            Some(label) if !label.is_empty() => label,
            _ => &self.config.default_label,
        }
    }

    /// Unexpired session for the spider and label
    pub async fn get(&self, spider_id: i64, label: Option<&str>) -> AppResult<Option<Session>> {
        let label = self.resolve_label(label);
        self.database
            .find_valid_session(spider_id, label, self.clock.now())
            .await
    }

    pub async fn get_by_id(&self, id: i64) -> AppResult<Session> {
        self.database
            .get_session(id, self.clock.now())
            .await?
            .ok_or_else(|| AppError::not_found("session", id))
    }

    pub async fn list(&self, filter: &SessionFilter, page: &PageRequest) -> AppResult<Page<Session>> {
        self.database
            .list_sessions(filter, page, self.clock.now())
            .await
    }

    /// Create the `(spider, label)` identity with a fresh validity window.
    /// An existing identity with the same label is replaced.
    pub async fn create(&self, session: NewSession) -> AppResult<Session> {
        let lifetime_hours = session
            .lifetime_hours
            .unwrap_or(self.config.default_lifetime_hours);
        if lifetime_hours <= 0 {
            return Err(AppError::validation("session lifetime must be positive"));
        }

        let label = self.resolve_label(session.label.as_deref()).to_string();
        let now = self.clock.now();
        let state = session.state.unwrap_or(Value::Null);
        let created = self
            .database
            .upsert_session(
                session.spider_id,
                &label,
                &state,
                now + Duration::hours(lifetime_hours),
                now,
            )
            .await?;

        info!(
            "Created session {} for spider {} ('{}'), valid until {}",
            created.id, created.spider_id, created.label, created.valid_until
        );
        Ok(created)
    }

    /// `valid_until = max(valid_until, now) + hours`
    pub async fn extend_validity(&self, id: i64, hours: i64) -> AppResult<Session> {
        if hours <= 0 {
            return Err(AppError::validation("extension must be a positive number of hours"));
        }

        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.get_by_id(id).await?;
            let now = self.clock.now();
            let extended = current.valid_until.max(now) + Duration::hours(hours);

            if let Some(session) = self
                .database
                .update_session_validity(id, current.valid_until, extended, now)
                .await?
            {
                debug!("Session {} extended until {}", id, extended);
                return Ok(session);
            }
        }

        Err(AppError::invalid_state(format!(
            "session {id} kept changing while being extended"
        )))
    }

    pub async fn delete(&self, id: i64) -> AppResult<()> {
        if !self.database.delete_session(id).await? {
            return Err(AppError::not_found("session", id));
        }
        debug!("Deleted session {}", id);
        Ok(())
    }

    /// Remove every session with `valid_until < now`. Idempotent.
    pub async fn cleanup_expired(&self) -> AppResult<u64> {
        let removed = self
            .database
            .delete_expired_sessions(self.clock.now())
            .await?;
        if removed > 0 {
            info!("Removed {} expired sessions", removed);
        }
        Ok(removed)
    }
}
