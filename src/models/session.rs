use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Time-bounded authentication/browser state reusable across a spider's
/// requests. `state` is opaque to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub spider_id: i64,
    pub label: String,
    pub state: Value,
    pub valid_until: DateTime<Utc>,
    /// `valid_until < now` at read time
    pub is_expired: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSession {
    pub spider_id: i64,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub state: Option<Value>,
    /// Overrides the configured default lifetime
    #[serde(default)]
    pub lifetime_hours: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFilter {
    #[serde(default)]
    pub spider_id: Option<i64>,
    #[serde(default)]
    pub expired: Option<bool>,
}
