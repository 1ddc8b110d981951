use std::env;
use std::time::Duration;

use tracing::info;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Extraction oracle
    pub gemini_api_key: String,
    pub gemini_model: String,

    // Stream transport
    pub kafka_rest_url: String,
    pub kafka_consumer_group: String,

    // Dedup window
    pub dedup_window: Duration,

    // Extraction worker batching
    pub batch_size: usize,
    pub batch_window: Duration,
    pub poll_timeout: Duration,

    // Oracle retry policy
    pub oracle_max_retries: u32,
    pub oracle_base_delay: Duration,

    // Size caps
    pub capture_html_max_bytes: usize,
    pub page_content_max_bytes: usize,

    // Capture / dispatch
    pub nav_timeout: Duration,
    pub courtesy_delay_ms: (u64, u64),
    pub crawl_interval: Duration,
    pub crawl_targets: Vec<String>,
    pub crawl_intent: String,
    pub chrome_executable: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            gemini_api_key: required_env("GEMINI_API_KEY"),
            gemini_model: env_or("GEMINI_MODEL", "gemini-1.5-flash"),
            kafka_rest_url: required_env("KAFKA_REST_URL"),
            kafka_consumer_group: env_or("KAFKA_CONSUMER_GROUP", "ai-refinery-v1"),
            dedup_window: Duration::from_secs(parsed_env("DEDUP_WINDOW_SECS", 3600)),
            batch_size: parsed_env("BATCH_SIZE", 2),
            batch_window: Duration::from_millis(parsed_env("BATCH_WINDOW_MS", 2000)),
            poll_timeout: Duration::from_millis(parsed_env("POLL_TIMEOUT_MS", 500)),
            oracle_max_retries: parsed_env("ORACLE_MAX_RETRIES", 3),
            oracle_base_delay: Duration::from_secs(parsed_env("ORACLE_BASE_DELAY_SECS", 10)),
            capture_html_max_bytes: parsed_env("CAPTURE_HTML_MAX_BYTES", 200_000),
            page_content_max_bytes: parsed_env("PAGE_CONTENT_MAX_BYTES", 50_000),
            nav_timeout: Duration::from_secs(parsed_env("NAV_TIMEOUT_SECS", 45)),
            courtesy_delay_ms: (
                parsed_env("COURTESY_DELAY_MS_MIN", 1000),
                parsed_env("COURTESY_DELAY_MS_MAX", 3000),
            ),
            crawl_interval: Duration::from_secs(parsed_env("CRAWL_INTERVAL_SECS", 1800)),
            crawl_targets: env::var("CRAWL_TARGETS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            crawl_intent: env_or("CRAWL_INTENT", "general"),
            chrome_executable: env::var("CHROME_BIN").ok(),
        }
    }

    /// Log the effective configuration with secrets redacted.
    pub fn log_redacted(&self) {
        info!(
            gemini_model = self.gemini_model.as_str(),
            gemini_api_key_set = !self.gemini_api_key.is_empty(),
            kafka_rest_url = self.kafka_rest_url.as_str(),
            kafka_consumer_group = self.kafka_consumer_group.as_str(),
            dedup_window_secs = self.dedup_window.as_secs(),
            batch_size = self.batch_size,
            batch_window_ms = self.batch_window.as_millis() as u64,
            oracle_max_retries = self.oracle_max_retries,
            crawl_targets = self.crawl_targets.len(),
            crawl_interval_secs = self.crawl_interval.as_secs(),
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid number, got '{raw}'")),
        Err(_) => default,
    }
}
