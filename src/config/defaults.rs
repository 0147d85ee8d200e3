/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Database defaults
pub const DEFAULT_DATABASE_URL: &str = "sqlite://./crawl-orchestrator.db";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

// Web server defaults
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

// Request queue defaults
pub const DEFAULT_MIN_PRIORITY: i32 = -100;
pub const DEFAULT_MAX_PRIORITY: i32 = 100;
pub const DEFAULT_MAX_RETRIES_CAP: u32 = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_DELAY_SECS: u64 = 5;
pub const DEFAULT_BACKOFF_MAX_DELAY_SECS: u64 = 600;
pub const DEFAULT_BACKOFF_JITTER_RATIO: f64 = 0.0;

// Proxy pool defaults
pub const DEFAULT_HEALTH_THRESHOLD: u32 = 3;
pub const DEFAULT_SUCCESS_RATE_ALPHA: f64 = 0.2;

// Job defaults
pub const DEFAULT_SPIDER_CONCURRENCY: u32 = 8;

// Scheduler defaults
pub const DEFAULT_SCHEDULER_TICK_SECS: u64 = 30;
pub const DEFAULT_TIMEZONE: &str = "UTC";

// Session defaults
pub const DEFAULT_SESSION_LIFETIME_HOURS: i64 = 24;
pub const DEFAULT_SESSION_LABEL: &str = "default";

// Worker defaults
pub const DEFAULT_WORKER_CONCURRENCY: usize = 0;
pub const DEFAULT_WORKER_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_USER_AGENT: &str = concat!("crawl-orchestrator/", env!("CARGO_PKG_VERSION"));
