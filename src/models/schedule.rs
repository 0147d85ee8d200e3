use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cron rule that periodically creates jobs for a spider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub spider_id: i64,
    pub cron_expr: String,
    /// IANA timezone the cron expression is evaluated in
    pub timezone: String,
    pub enabled: bool,
    /// Only advanced by `mark_executed`, edits and enabling
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.is_some_and(|next| next <= now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSchedule {
    pub spider_id: i64,
    pub cron_expr: String,
    /// Defaults to the configured scheduler timezone
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    #[serde(default)]
    pub cron_expr: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleFilter {
    #[serde(default)]
    pub spider_id: Option<i64>,
    #[serde(default)]
    pub enabled: Option<bool>,
}
