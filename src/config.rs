use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct Config;

impl Config {
    /// Max crawl depth from the seed (seed = 0).
    pub const MAX_DEPTH: u32 = 13;
    /// Fetcher parallelism ceiling (concurrent page fetches).
    pub const CONCURRENT_WORKERS: usize = 20;
    pub const POLITE_DELAY: Duration = Duration::from_millis(30);
    pub const POLITE_JITTER_MS: u64 = 5;
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
    /// Hard cap on page bodies before they reach the tokenizer.
    pub const MAX_BODY_SIZE: usize = 5 * 1024 * 1024;

    pub const INITIAL_DOWNLOAD_WORKERS: usize = 100;
    pub const MAX_DOWNLOAD_WORKERS: usize = 800;
    pub const MAX_QUEUE_SIZE: usize = 50_000;
    pub const SCALE_THRESHOLD: f64 = 0.40;
    pub const SCALE_STEP: usize = 300;
    pub const SCALE_CHECK_INTERVAL: Duration = Duration::from_millis(500);
    pub const SCALER_COUNT: usize = 16;

    pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(3);
    pub const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(300);
    pub const MAX_CONNECTIONS_TOTAL: usize = 12_000;
    pub const MAX_CONNECTIONS_PER_HOST: usize = 1_200;
    pub const CLIENTS_PER_INTERFACE: usize = 64;

    pub const DOWNLOAD_BUFFER_SIZE: usize = 32 * 1024 * 1024;
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_BACKOFF: Duration = Duration::from_millis(300);
    /// Persistent enqueue gives up after this many attempts.
    pub const PERSISTENT_ENQUEUE_ATTEMPTS: u32 = 50;

    pub const TARGET_MEMORY_GB: u64 = 50;

    pub const FAST_PATH_SIZE_LIMIT: usize = 100 * 1024;
    pub const SLOW_PATH_SIZE_LIMIT: usize = 500 * 1024;

    pub const USER_AGENT: &'static str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0 Safari/537.36";
}

/// Runtime configuration resolved from the CLI at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    pub start_url: String,
    pub target_dir: String,
    pub max_depth: u32,
    pub user_agent: String,
    pub doc_extensions: Vec<String>,
    pub clients_per_interface: usize,
    pub max_queue_size: usize,
    pub initial_workers: usize,
    pub max_workers: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            start_url: String::new(),
            target_dir: ".".to_string(),
            max_depth: Config::MAX_DEPTH,
            user_agent: Config::USER_AGENT.to_string(),
            doc_extensions: vec![".pdf".to_string()],
            clients_per_interface: Config::CLIENTS_PER_INTERFACE,
            max_queue_size: Config::MAX_QUEUE_SIZE,
            initial_workers: Config::INITIAL_DOWNLOAD_WORKERS,
            max_workers: Config::MAX_DOWNLOAD_WORKERS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_constants() {
        assert!(Config::FAST_PATH_SIZE_LIMIT < Config::SLOW_PATH_SIZE_LIMIT);
        assert!(Config::SLOW_PATH_SIZE_LIMIT < Config::MAX_BODY_SIZE);
        assert!(Config::INITIAL_DOWNLOAD_WORKERS < Config::MAX_DOWNLOAD_WORKERS);
    }

    #[test]
    fn test_default_runtime_config() {
        let config = CrawlerConfig::default();
        assert_eq!(config.max_depth, 13);
        assert_eq!(config.doc_extensions, vec![".pdf"]);
        assert_eq!(config.clients_per_interface, 64);
    }
}
