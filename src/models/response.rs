use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Measurements reported by the fetcher for one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub status_code: u16,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub from_cache: bool,
    #[serde(default)]
    pub body_size: u64,
}

impl ResponseRecord {
    pub fn new(status_code: u16, latency_ms: u64) -> Self {
        Self {
            status_code,
            latency_ms,
            from_cache: false,
            body_size: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code < 400
    }
}

/// Stored response. Earlier attempts of the same request are kept with
/// `is_current = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: i64,
    pub request_id: i64,
    pub status_code: u16,
    pub latency_ms: u64,
    pub from_cache: bool,
    pub body_size: u64,
    pub is_current: bool,
    pub fetched_at: DateTime<Utc>,
}
