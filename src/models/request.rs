use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::response::ResponseRecord;

/// Lifecycle of a fetch attempt.
///
/// `pending -> in_progress -> {done | pending (retry) | error}`;
/// `error -> pending` and `done -> pending` only through an explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Done,
    Error,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Done => "done",
            RequestStatus::Error => "error",
        }
    }

    /// No automatic processing will touch the request again
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Done | RequestStatus::Error)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "in_progress" => Ok(RequestStatus::InProgress),
            "done" => Ok(RequestStatus::Done),
            "error" => Ok(RequestStatus::Error),
            other => Err(format!("unknown request status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            other => Err(format!("unsupported HTTP method '{other}'")),
        }
    }
}

/// One scheduled HTTP fetch attempt belonging to a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: i64,
    pub job_id: i64,
    pub url: String,
    pub method: HttpMethod,
    /// Higher is more urgent
    pub priority: i32,
    pub retries: u32,
    pub max_retries: u32,
    pub status: RequestStatus,
    /// Earliest dispatch time
    pub scheduled_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub proxy_id: Option<i64>,
    pub session_id: Option<i64>,
    /// Terminated by job cancellation rather than by a fetch outcome
    pub cancelled: bool,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Retry budget remains for the increment-on-failure path
    pub fn has_retry_budget(&self) -> bool {
        self.retries < self.max_retries
    }
}

/// Input to `RequestQueue::enqueue`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRequest {
    pub job_id: i64,
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// Defaults to 0
    #[serde(default)]
    pub priority: Option<i32>,
    /// Defaults to the configured retry budget
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Defaults to now
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// What a worker can execute; narrows what `claim` may hand out
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerCapabilities {
    pub worker_id: String,
    /// Only claim requests of these spiders when set
    #[serde(default)]
    pub spider_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub supports_browser: bool,
}

impl WorkerCapabilities {
    pub fn new<S: Into<String>>(worker_id: S) -> Self {
        Self {
            worker_id: worker_id.into(),
            spider_ids: None,
            supports_browser: false,
        }
    }

    pub fn with_browser(mut self) -> Self {
        self.supports_browser = true;
        self
    }

    pub fn with_spiders(mut self, spider_ids: Vec<i64>) -> Self {
        self.spider_ids = Some(spider_ids);
        self
    }
}

/// Result of a fetch attempt as classified by the caller.
///
/// The retry decision is the caller's: the core never inspects status
/// codes to decide whether a failure is transient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        response: ResponseRecord,
    },
    /// Network timeout, 5xx, rate limiting: consume retry budget and back off
    TransientFailure {
        reason: String,
        #[serde(default)]
        response: Option<ResponseRecord>,
    },
    /// Client errors: become a non-retryable error immediately
    PermanentFailure {
        reason: String,
        #[serde(default)]
        response: Option<ResponseRecord>,
    },
}

impl Outcome {
    pub fn success(response: ResponseRecord) -> Self {
        Outcome::Success { response }
    }

    /// Failure form used by the "mark error" command
    pub fn failure<S: Into<String>>(
        reason: S,
        increment_retry: bool,
        response: Option<ResponseRecord>,
    ) -> Self {
        if increment_retry {
            Outcome::TransientFailure {
                reason: reason.into(),
                response,
            }
        } else {
            Outcome::PermanentFailure {
                reason: reason.into(),
                response,
            }
        }
    }

    pub fn response(&self) -> Option<&ResponseRecord> {
        match self {
            Outcome::Success { response } => Some(response),
            Outcome::TransientFailure { response, .. }
            | Outcome::PermanentFailure { response, .. } => response.as_ref(),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::TransientFailure { reason, .. } | Outcome::PermanentFailure { reason, .. } => {
                Some(reason)
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// Equality filters for request listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestFilter {
    #[serde(default)]
    pub status: Option<RequestStatus>,
    #[serde(default)]
    pub job_id: Option<i64>,
    #[serde(default)]
    pub spider_id: Option<i64>,
}

/// Multiset of request statuses for one job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStatusCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub done: u64,
    pub error: u64,
}

impl RequestStatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.in_progress + self.done + self.error
    }

    pub fn all_terminal(&self) -> bool {
        self.pending == 0 && self.in_progress == 0
    }

    pub fn add(&mut self, status: RequestStatus, count: u64) {
        match status {
            RequestStatus::Pending => self.pending += count,
            RequestStatus::InProgress => self.in_progress += count,
            RequestStatus::Done => self.done += count,
            RequestStatus::Error => self.error += count,
        }
    }
}
