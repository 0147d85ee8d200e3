use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::request::HttpMethod;

/// A crawl definition. Parse rules are opaque to the orchestration core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spider {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub start_urls: Vec<String>,
    pub settings: SpiderSettings,
    pub parse_rules: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Settings bag of a spider. Unset values fall back to the configured
/// defaults when a job snapshots them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpiderSettings {
    /// Priority given to seed requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_priority: Option<i32>,
    /// Retry budget given to seed requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Maximum in-progress requests per job, 0 for unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default = "default_use_proxy")]
    pub use_proxy: bool,
    /// Requests must be executed by a browser-capable worker
    #[serde(default)]
    pub browser: bool,
    /// Session identity used by this spider's requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_label: Option<String>,
    /// Keys this core does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_use_proxy() -> bool {
    true
}

impl Default for SpiderSettings {
    fn default() -> Self {
        Self {
            default_priority: None,
            max_retries: None,
            concurrency: None,
            method: HttpMethod::default(),
            use_proxy: default_use_proxy(),
            browser: false,
            session_label: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSpider {
    pub project_id: i64,
    pub name: String,
    #[serde(default)]
    pub start_urls: Vec<String>,
    #[serde(default)]
    pub settings: SpiderSettings,
    #[serde(default)]
    pub parse_rules: Value,
}

/// Explicit edit of a spider; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpiderUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub start_urls: Option<Vec<String>>,
    #[serde(default)]
    pub settings: Option<SpiderSettings>,
    #[serde(default)]
    pub parse_rules: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settings_keep_unknown_keys() {
        let settings: SpiderSettings = serde_json::from_value(json!({
            "concurrency": 2,
            "browser": true,
            "download_delay": 1.5
        }))
        .unwrap();

        assert_eq!(settings.concurrency, Some(2));
        assert!(settings.browser);
        assert!(settings.use_proxy);
        assert_eq!(settings.extra.get("download_delay"), Some(&json!(1.5)));

        let back = serde_json::to_value(&settings).unwrap();
        assert_eq!(back["download_delay"], json!(1.5));
    }
}
