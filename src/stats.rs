//! Aggregate read model over jobs, requests, proxies, responses, sessions
//! and schedules. Every snapshot is recomputed from the tables.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::ProxyPoolConfig;
use crate::database::Database;
use crate::errors::AppResult;
use crate::models::RequestStatusCounts;
use crate::utils::SharedClock;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub total: u64,
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProxyStats {
    pub total: u64,
    pub active: u64,
    pub healthy_active: u64,
    /// Healthy active proxies as a percentage of active proxies
    pub health_percentage: f64,
    pub average_success_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseStats {
    pub total: u64,
    pub successes: u64,
    pub errors: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub average_latency_ms: f64,
    pub cache_hits: u64,
    pub cache_hit_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total: u64,
    pub expired: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleStats {
    pub total: u64,
    pub enabled: u64,
    pub due: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub jobs: JobStats,
    pub requests: RequestStatusCounts,
    pub proxies: ProxyStats,
    pub responses: ResponseStats,
    pub sessions: SessionStats,
    pub schedules: ScheduleStats,
    pub generated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct StatsService {
    database: Database,
    health_threshold: u32,
    clock: SharedClock,
}

impl StatsService {
    pub fn new(database: Database, proxy_pool: &ProxyPoolConfig, clock: SharedClock) -> Self {
        Self {
            database,
            health_threshold: proxy_pool.health_threshold,
            clock,
        }
    }

    pub async fn snapshot(&self) -> AppResult<StatsSnapshot> {
        let now = self.clock.now();
        let snapshot = StatsSnapshot {
            jobs: self.database.job_stats().await?,
            requests: self.database.request_stats().await?,
            proxies: self.database.proxy_stats(self.health_threshold).await?,
            responses: self.database.response_stats().await?,
            sessions: self.database.session_stats(now).await?,
            schedules: self.database.schedule_stats(now).await?,
            generated_at: now,
        };
        debug!(
            "Stats snapshot: {} jobs, {} requests, {} proxies",
            snapshot.jobs.total,
            snapshot.requests.total(),
            snapshot.proxies.total
        );
        Ok(snapshot)
    }
}
