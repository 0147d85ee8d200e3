//! Web layer module
//!
//! Thin axum handlers over the orchestration services. Handlers translate
//! HTTP into service calls and render results through the shared response
//! envelope; every rule lives in the services.

use anyhow::Result;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    catalog::Catalog,
    config::Config,
    database::Database,
    engine::CrawlEngine,
    jobs::JobManager,
    proxy_pool::ProxyPool,
    queue::RequestQueue,
    scheduler::Scheduler,
    sessions::SessionStore,
    stats::StatsService,
    utils::SharedClock,
};

pub mod extractors;
pub mod handlers;
pub mod responses;

pub use extractors::PaginationParams;
pub use responses::{ApiResponse, PaginatedResponse};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub database: Database,
    pub clock: SharedClock,
    pub catalog: Catalog,
    pub scheduler: Scheduler,
    pub engine: CrawlEngine,
    pub stats: StatsService,
}

impl AppState {
    /// Wire every service over one database and clock
    pub fn new(database: Database, config: Config, clock: SharedClock) -> Self {
        let queue = RequestQueue::new(database.clone(), config.queue.clone(), clock.clone());
        let proxies = ProxyPool::new(database.clone(), config.proxy_pool.clone(), clock.clone());
        let jobs = JobManager::new(database.clone(), &config, clock.clone());
        let sessions = SessionStore::new(database.clone(), config.sessions.clone(), clock.clone());

        Self {
            catalog: Catalog::new(database.clone(), config.queue.clone(), clock.clone()),
            scheduler: Scheduler::new(database.clone(), config.scheduler.clone(), clock.clone()),
            engine: CrawlEngine::new(queue, proxies, jobs, sessions),
            stats: StatsService::new(database.clone(), &config.proxy_pool, clock.clone()),
            config,
            database,
            clock,
        }
    }

    pub fn queue(&self) -> &RequestQueue {
        self.engine.queue()
    }

    pub fn proxies(&self) -> &ProxyPool {
        self.engine.proxies()
    }

    pub fn jobs(&self) -> &JobManager {
        self.engine.jobs()
    }

    pub fn sessions(&self) -> &SessionStore {
        self.engine.sessions()
    }
}

/// Full application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_v1_routes() -> Router<AppState> {
    use handlers::{jobs, projects, proxies, requests, schedules, sessions, spiders, stats};

    Router::new()
        // Projects
        .route(
            "/projects",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/projects/:id",
            get(projects::get_project).delete(projects::delete_project),
        )
        // Spiders
        .route(
            "/spiders",
            get(spiders::list_spiders).post(spiders::create_spider),
        )
        .route(
            "/spiders/:id",
            get(spiders::get_spider)
                .put(spiders::update_spider)
                .patch(spiders::update_spider)
                .delete(spiders::delete_spider),
        )
        // Jobs
        .route("/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route(
            "/jobs/:id",
            get(jobs::get_job)
                .patch(jobs::update_job)
                .delete(jobs::delete_job),
        )
        .route("/jobs/:id/cancel", post(jobs::cancel_job))
        .route("/jobs/:id/progress", get(jobs::job_progress))
        .route("/jobs/:id/recompute", post(jobs::recompute_job))
        // Requests
        .route(
            "/requests",
            get(requests::list_requests).post(requests::enqueue_request),
        )
        .route("/requests/claim", post(requests::claim_request))
        .route("/requests/:id", get(requests::get_request))
        .route(
            "/requests/:id/priority",
            put(requests::set_priority).patch(requests::set_priority),
        )
        .route("/requests/:id/in-progress", post(requests::mark_in_progress))
        .route("/requests/:id/done", post(requests::mark_done))
        .route("/requests/:id/error", post(requests::mark_error))
        .route("/requests/:id/retry", post(requests::retry_request))
        .route("/requests/:id/responses", get(requests::list_responses))
        // Proxies
        .route(
            "/proxies",
            get(proxies::list_proxies).post(proxies::create_proxy),
        )
        .route("/proxies/acquire", post(proxies::acquire_proxy))
        .route(
            "/proxies/:id",
            get(proxies::get_proxy).delete(proxies::delete_proxy),
        )
        .route("/proxies/:id/active", put(proxies::set_active))
        .route("/proxies/:id/success", post(proxies::record_success))
        .route("/proxies/:id/failure", post(proxies::record_failure))
        .route("/proxies/:id/reset-stats", post(proxies::reset_stats))
        // Schedules
        .route(
            "/schedules",
            get(schedules::list_schedules).post(schedules::create_schedule),
        )
        .route("/schedules/due", get(schedules::list_due))
        .route("/schedules/upcoming", get(schedules::list_upcoming))
        .route(
            "/schedules/:id",
            get(schedules::get_schedule)
                .put(schedules::update_schedule)
                .patch(schedules::update_schedule)
                .delete(schedules::delete_schedule),
        )
        .route("/schedules/:id/enable", post(schedules::enable_schedule))
        .route("/schedules/:id/disable", post(schedules::disable_schedule))
        .route("/schedules/:id/executed", post(schedules::mark_executed))
        // Sessions
        .route(
            "/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route("/sessions/lookup", get(sessions::lookup_session))
        .route("/sessions/cleanup", post(sessions::cleanup_sessions))
        .route(
            "/sessions/:id",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/sessions/:id/extend", post(sessions::extend_session))
        // Stats
        .route("/stats", get(stats::get_stats))
}

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(state: AppState) -> Result<Self> {
        let addr: SocketAddr =
            format!("{}:{}", state.config.web.host, state.config.web.port).parse()?;
        Ok(Self {
            app: router(state),
            addr,
        })
    }

    /// Serve until the shutdown future resolves
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!("Listening on http://{}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}
