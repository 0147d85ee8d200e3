//! Query parameter types shared by the handlers

use serde::Deserialize;

use crate::models::{
    HealthFilter, JobFilter, JobStatus, PageRequest, ProxyFilter, RequestFilter, RequestStatus,
    ScheduleFilter, SessionFilter,
};

/// `?page=&limit=`, 1-based
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PaginationParams {
    pub fn page_request(&self) -> PageRequest {
        let defaults = PageRequest::default();
        PageRequest::new(
            self.page.unwrap_or(defaults.page),
            self.limit.unwrap_or(defaults.limit),
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpiderListParams {
    pub project: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListParams {
    pub status: Option<JobStatus>,
    pub spider: Option<i64>,
}

impl From<JobListParams> for JobFilter {
    fn from(params: JobListParams) -> Self {
        JobFilter {
            status: params.status,
            spider_id: params.spider,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestListParams {
    pub status: Option<RequestStatus>,
    pub job: Option<i64>,
    pub spider: Option<i64>,
}

impl From<RequestListParams> for RequestFilter {
    fn from(params: RequestListParams) -> Self {
        RequestFilter {
            status: params.status,
            job_id: params.job,
            spider_id: params.spider,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyListParams {
    pub health: Option<HealthFilter>,
    pub active: Option<bool>,
}

impl From<ProxyListParams> for ProxyFilter {
    fn from(params: ProxyListParams) -> Self {
        ProxyFilter {
            health: params.health,
            active: params.active,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleListParams {
    pub spider: Option<i64>,
    pub enabled: Option<bool>,
}

impl From<ScheduleListParams> for ScheduleFilter {
    fn from(params: ScheduleListParams) -> Self {
        ScheduleFilter {
            spider_id: params.spider,
            enabled: params.enabled,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionListParams {
    pub spider: Option<i64>,
    pub expired: Option<bool>,
}

impl From<SessionListParams> for SessionFilter {
    fn from(params: SessionListParams) -> Self {
        SessionFilter {
            spider_id: params.spider,
            expired: params.expired,
        }
    }
}
