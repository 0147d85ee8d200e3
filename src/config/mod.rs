use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

pub mod defaults;

use defaults::*;

/// Environment variable prefix for configuration overrides,
/// e.g. `CRAWL__PROXY_POOL__HEALTH_THRESHOLD=5`
pub const ENV_PREFIX: &str = "CRAWL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub proxy_pool: ProxyPoolConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Bounds and retry policy for the request queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_min_priority")]
    pub min_priority: i32,
    #[serde(default = "default_max_priority")]
    pub max_priority: i32,
    /// Upper bound accepted for a request's `max_retries`
    #[serde(default = "default_max_retries_cap")]
    pub max_retries_cap: u32,
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

/// Exponential backoff applied when a failed request is re-queued.
/// The curve is configurable; `delay = base * 2^retries`, capped at `max`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    /// Random spread applied to the delay, 0.0 disables jitter
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyPoolConfig {
    /// Consecutive failures at which a proxy leaves rotation
    #[serde(default = "default_health_threshold")]
    pub health_threshold: u32,
    /// Weight of the newest outcome in the success-rate moving average
    #[serde(default = "default_success_rate_alpha")]
    pub success_rate_alpha: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Per-job in-flight limit used when a spider does not set one
    #[serde(default = "default_spider_concurrency")]
    pub default_concurrency: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tick_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_session_lifetime_hours")]
    pub default_lifetime_hours: i64,
    #[serde(default = "default_session_label")]
    pub default_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of in-process fetch workers, 0 disables the pool
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub supports_browser: bool,
}

fn default_true() -> bool {
    true
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_min_priority() -> i32 {
    DEFAULT_MIN_PRIORITY
}

fn default_max_priority() -> i32 {
    DEFAULT_MAX_PRIORITY
}

fn default_max_retries_cap() -> u32 {
    DEFAULT_MAX_RETRIES_CAP
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_base_delay_secs() -> u64 {
    DEFAULT_BACKOFF_BASE_DELAY_SECS
}

fn default_max_delay_secs() -> u64 {
    DEFAULT_BACKOFF_MAX_DELAY_SECS
}

fn default_jitter_ratio() -> f64 {
    DEFAULT_BACKOFF_JITTER_RATIO
}

fn default_health_threshold() -> u32 {
    DEFAULT_HEALTH_THRESHOLD
}

fn default_success_rate_alpha() -> f64 {
    DEFAULT_SUCCESS_RATE_ALPHA
}

fn default_spider_concurrency() -> u32 {
    DEFAULT_SPIDER_CONCURRENCY
}

fn default_tick_secs() -> u64 {
    DEFAULT_SCHEDULER_TICK_SECS
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_session_lifetime_hours() -> i64 {
    DEFAULT_SESSION_LIFETIME_HOURS
}

fn default_session_label() -> String {
    DEFAULT_SESSION_LABEL.to_string()
}

fn default_worker_concurrency() -> usize {
    DEFAULT_WORKER_CONCURRENCY
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_WORKER_POLL_INTERVAL_MS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_priority: default_min_priority(),
            max_priority: default_max_priority(),
            max_retries_cap: default_max_retries_cap(),
            default_max_retries: default_max_retries(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            health_threshold: default_health_threshold(),
            success_rate_alpha: default_success_rate_alpha(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            default_concurrency: default_spider_concurrency(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: default_tick_secs(),
            default_timezone: default_timezone(),
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            default_lifetime_hours: default_session_lifetime_hours(),
            default_label: default_session_label(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_worker_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
            supports_browser: false,
        }
    }
}

impl Config {
    /// Load configuration from `path`, layering `CRAWL__*` environment
    /// overrides on top. A default file is written when none exists.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(path, contents)?;
            info!("Wrote default configuration to {}", path);
        }

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the core cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.queue.min_priority > self.queue.max_priority {
            anyhow::bail!(
                "queue.min_priority ({}) exceeds queue.max_priority ({})",
                self.queue.min_priority,
                self.queue.max_priority
            );
        }
        if self.queue.default_max_retries > self.queue.max_retries_cap {
            anyhow::bail!(
                "queue.default_max_retries ({}) exceeds queue.max_retries_cap ({})",
                self.queue.default_max_retries,
                self.queue.max_retries_cap
            );
        }
        if !(0.0..=1.0).contains(&self.queue.backoff.jitter_ratio) {
            anyhow::bail!("queue.backoff.jitter_ratio must be within 0.0..=1.0");
        }
        if self.proxy_pool.health_threshold == 0 {
            anyhow::bail!("proxy_pool.health_threshold must be at least 1");
        }
        if !(self.proxy_pool.success_rate_alpha > 0.0 && self.proxy_pool.success_rate_alpha <= 1.0) {
            anyhow::bail!("proxy_pool.success_rate_alpha must be within (0.0, 1.0]");
        }
        if self.sessions.default_lifetime_hours <= 0 {
            anyhow::bail!("sessions.default_lifetime_hours must be positive");
        }
        if self
            .scheduler
            .default_timezone
            .parse::<chrono_tz::Tz>()
            .is_err()
        {
            anyhow::bail!(
                "scheduler.default_timezone '{}' is not a known IANA timezone",
                self.scheduler.default_timezone
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.proxy_pool.health_threshold, DEFAULT_HEALTH_THRESHOLD);
        assert_eq!(config.sessions.default_label, "default");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [queue]
            max_priority = 10

            [proxy_pool]
            health_threshold = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.max_priority, 10);
        assert_eq!(config.queue.min_priority, DEFAULT_MIN_PRIORITY);
        assert_eq!(config.proxy_pool.health_threshold, 5);
        assert_eq!(config.web.port, DEFAULT_PORT);
    }

    #[test]
    fn test_validate_rejects_inverted_priority_bounds() {
        let mut config = Config::default();
        config.queue.min_priority = 5;
        config.queue.max_priority = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_timezone() {
        let mut config = Config::default();
        config.scheduler.default_timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
    }
}
