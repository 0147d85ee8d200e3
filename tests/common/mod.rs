//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crawl_orchestrator::config::Config;
use crawl_orchestrator::database::Database;
use crawl_orchestrator::engine::CrawlEngine;
use crawl_orchestrator::jobs::JobManager;
use crawl_orchestrator::models::{NewProject, NewSpider, Spider, SpiderSettings};
use crawl_orchestrator::proxy_pool::ProxyPool;
use crawl_orchestrator::queue::RequestQueue;
use crawl_orchestrator::sessions::SessionStore;
use crawl_orchestrator::utils::{ManualClock, SharedClock};
use crawl_orchestrator::web::AppState;

static PROJECTS: AtomicUsize = AtomicUsize::new(0);

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// Spider settings for fetches that go out directly
pub fn direct() -> SpiderSettings {
    SpiderSettings {
        use_proxy: false,
        ..SpiderSettings::default()
    }
}

pub struct Harness {
    pub database: Database,
    pub clock: ManualClock,
    pub state: AppState,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let database = Database::in_memory().await.unwrap();
        let clock = ManualClock::new(start_time());
        let shared: SharedClock = Arc::new(clock.clone());
        let state = AppState::new(database.clone(), config, shared);
        Self {
            database,
            clock,
            state,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        use crawl_orchestrator::utils::Clock;
        self.clock.now()
    }

    pub fn engine(&self) -> &CrawlEngine {
        &self.state.engine
    }

    pub fn queue(&self) -> &RequestQueue {
        self.state.queue()
    }

    pub fn jobs(&self) -> &JobManager {
        self.state.jobs()
    }

    pub fn proxies(&self) -> &ProxyPool {
        self.state.proxies()
    }

    pub fn sessions(&self) -> &SessionStore {
        self.state.sessions()
    }

    /// A spider in a fresh project
    pub async fn spider(&self, start_urls: &[&str], settings: SpiderSettings) -> Spider {
        let n = PROJECTS.fetch_add(1, Ordering::SeqCst);
        let project = self
            .state
            .catalog
            .create_project(NewProject {
                name: format!("project-{n}"),
                description: None,
            })
            .await
            .unwrap();

        self.state
            .catalog
            .create_spider(NewSpider {
                project_id: project.id,
                name: format!("spider-{n}"),
                start_urls: start_urls.iter().map(|u| u.to_string()).collect(),
                settings,
                parse_rules: serde_json::Value::Null,
            })
            .await
            .unwrap()
    }
}
