use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Catalog Harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub rate: RateConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    pub storage: StorageConfig,
    #[serde(default, rename = "category")]
    pub categories: Vec<CategoryEntry>,
}

impl Config {
    /// Names of the categories that should get a worker
    pub fn enabled_categories(&self) -> Vec<String> {
        self.categories
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.name.clone())
            .collect()
    }
}

/// Source API endpoints
///
/// Path templates are appended to `base_url`. Placeholders:
/// `{category}` and `{page}` for listings, `{slug}` for details,
/// `{parent}` and `{sub}` for sub-record details.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(rename = "base-url")]
    pub base_url: String,

    #[serde(rename = "listing-path", default = "default_listing_path")]
    pub listing_path: String,

    #[serde(rename = "detail-path", default = "default_detail_path")]
    pub detail_path: String,

    #[serde(rename = "sub-record-path", default = "default_sub_record_path")]
    pub sub_record_path: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout", default = "default_request_timeout")]
    pub request_timeout: u64,
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    #[serde(rename = "contact-url")]
    pub contact_url: String,
}

/// Pipeline behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Items per detail-fetch batch (phase 2)
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,

    /// Parents per sub-record batch (phase 3)
    #[serde(rename = "sub-record-batch-size", default = "default_sub_record_batch_size")]
    pub sub_record_batch_size: usize,

    /// Concurrent sub-record detail fetches
    #[serde(
        rename = "sub-record-concurrency",
        default = "default_sub_record_concurrency"
    )]
    pub sub_record_concurrency: usize,

    /// Consecutive empty listing pages that end enumeration
    #[serde(rename = "max-empty-pages", default = "default_max_empty_pages")]
    pub max_empty_pages: u32,

    /// Attempts per listing page before it is logged as failed
    #[serde(rename = "page-attempts", default = "default_page_attempts")]
    pub page_attempts: u32,

    /// Optional cap on listing pages per session
    #[serde(rename = "max-pages", default)]
    pub max_pages: Option<u32>,

    /// Session duration after which the pipeline pauses (seconds)
    #[serde(rename = "max-session-duration", default = "default_max_session_duration")]
    pub max_session_duration: u64,

    /// Per-worker ceiling on queued items in one session
    #[serde(rename = "queue-limit", default = "default_queue_limit")]
    pub queue_limit: usize,

    /// Scale applied to the controller delay between detail fetches
    #[serde(rename = "detail-delay-factor", default = "default_detail_delay_factor")]
    pub detail_delay_factor: f64,

    /// Fetch each sub-record's detail endpoint in phase 3
    #[serde(rename = "fetch-sub-record-details", default = "default_true")]
    pub fetch_sub_record_details: bool,
}

impl CrawlerConfig {
    pub fn max_session_duration(&self) -> Duration {
        Duration::from_secs(self.max_session_duration)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            sub_record_batch_size: default_sub_record_batch_size(),
            sub_record_concurrency: default_sub_record_concurrency(),
            max_empty_pages: default_max_empty_pages(),
            page_attempts: default_page_attempts(),
            max_pages: None,
            max_session_duration: default_max_session_duration(),
            queue_limit: default_queue_limit(),
            detail_delay_factor: default_detail_delay_factor(),
            fetch_sub_record_details: true,
        }
    }
}

/// Rate adaptation thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct RateConfig {
    /// Base delay between requests (milliseconds)
    #[serde(rename = "base-delay", default = "default_base_delay")]
    pub base_delay: u64,

    /// Upper bound for any computed delay (milliseconds)
    #[serde(rename = "max-delay", default = "default_max_delay")]
    pub max_delay: u64,

    /// Responses slower than this are classified slow (milliseconds)
    #[serde(rename = "slow-threshold", default = "default_slow_threshold")]
    pub slow_threshold: u64,

    /// Responses slower than this are classified very slow (milliseconds)
    #[serde(rename = "very-slow-threshold", default = "default_very_slow_threshold")]
    pub very_slow_threshold: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            slow_threshold: default_slow_threshold(),
            very_slow_threshold: default_very_slow_threshold(),
        }
    }
}

/// Worker lifecycle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// First restart delay (seconds)
    #[serde(rename = "restart-base-delay", default = "default_restart_base_delay")]
    pub restart_base_delay: u64,

    #[serde(rename = "restart-multiplier", default = "default_restart_multiplier")]
    pub restart_multiplier: f64,

    /// Restart delay cap (seconds)
    #[serde(rename = "max-restart-delay", default = "default_max_restart_delay")]
    pub max_restart_delay: u64,

    /// Health monitor tick (seconds)
    #[serde(rename = "health-interval", default = "default_health_interval")]
    pub health_interval: u64,

    /// Silence after which a worker is probed (seconds)
    #[serde(rename = "inactivity-threshold", default = "default_inactivity_threshold")]
    pub inactivity_threshold: u64,

    /// Graceful shutdown wait per worker (seconds)
    #[serde(rename = "shutdown-timeout", default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Relaunch completed workers after this many seconds
    #[serde(rename = "rerun-interval", default)]
    pub rerun_interval: Option<u64>,

    /// Resume a paused session (deadline, page or queue limit) after this
    /// many seconds, with or without a rerun interval
    #[serde(rename = "resume-delay", default = "default_resume_delay")]
    pub resume_delay: u64,

    /// Worker thread stack size (MiB)
    #[serde(rename = "worker-stack-size", default = "default_worker_stack_size")]
    pub worker_stack_size: usize,
}

impl SupervisorConfig {
    pub fn restart_base_delay(&self) -> Duration {
        Duration::from_secs(self.restart_base_delay)
    }

    pub fn max_restart_delay(&self) -> Duration {
        Duration::from_secs(self.max_restart_delay)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval)
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_threshold)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    pub fn rerun_interval(&self) -> Option<Duration> {
        self.rerun_interval.map(Duration::from_secs)
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_secs(self.resume_delay)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_base_delay: default_restart_base_delay(),
            restart_multiplier: default_restart_multiplier(),
            max_restart_delay: default_max_restart_delay(),
            health_interval: default_health_interval(),
            inactivity_threshold: default_inactivity_threshold(),
            shutdown_timeout: default_shutdown_timeout(),
            rerun_interval: None,
            resume_delay: default_resume_delay(),
            worker_stack_size: default_worker_stack_size(),
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite file holding catalog records and sub-records
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// SQLite file backing the progress key-value cache
    #[serde(rename = "cache-path")]
    pub cache_path: String,

    #[serde(rename = "progress-ttl-days", default = "default_progress_ttl_days")]
    pub progress_ttl_days: u32,

    #[serde(rename = "error-ttl-days", default = "default_error_ttl_days")]
    pub error_ttl_days: u32,

    #[serde(rename = "stats-ttl-days", default = "default_stats_ttl_days")]
    pub stats_ttl_days: u32,
}

/// One independently crawled partition of the catalog
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryEntry {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_listing_path() -> String {
    "/api/list/{category}?page={page}".to_string()
}

fn default_detail_path() -> String {
    "/api/item/{slug}".to_string()
}

fn default_sub_record_path() -> String {
    "/api/item/{parent}/sub/{sub}".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_batch_size() -> usize {
    15
}

fn default_sub_record_batch_size() -> usize {
    5
}

fn default_sub_record_concurrency() -> usize {
    2
}

fn default_max_empty_pages() -> u32 {
    3
}

fn default_page_attempts() -> u32 {
    3
}

fn default_max_session_duration() -> u64 {
    6 * 60 * 60
}

fn default_queue_limit() -> usize {
    5_000
}

fn default_detail_delay_factor() -> f64 {
    0.7
}

fn default_true() -> bool {
    true
}

fn default_base_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    60_000
}

fn default_slow_threshold() -> u64 {
    5_000
}

fn default_very_slow_threshold() -> u64 {
    15_000
}

fn default_restart_base_delay() -> u64 {
    30
}

fn default_restart_multiplier() -> f64 {
    2.0
}

fn default_max_restart_delay() -> u64 {
    600
}

fn default_health_interval() -> u64 {
    30
}

fn default_inactivity_threshold() -> u64 {
    120
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_resume_delay() -> u64 {
    60
}

fn default_worker_stack_size() -> usize {
    8
}

fn default_progress_ttl_days() -> u32 {
    7
}

fn default_error_ttl_days() -> u32 {
    3
}

fn default_stats_ttl_days() -> u32 {
    30
}
