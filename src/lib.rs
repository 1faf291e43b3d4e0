pub mod cli;
pub mod config;
pub mod crawler;
pub mod downloader;
pub mod fetcher;
pub mod logging;
pub mod monitor;
pub mod netiface;
pub mod tokenizer;
pub mod url_tools;

// Re-export main types for library usage
pub use config::{Config, CrawlerConfig};
pub use crawler::{Crawler, CrawlSummary};
pub use downloader::{DownloadManager, DownloadStats, DownloadTask};
pub use fetcher::{FetchError, PageFetcher};
pub use monitor::Monitor;
pub use netiface::{LinkSpeed, NetworkInterface};
pub use tokenizer::{Coordinator, PathDecision};
