use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use nicrawl::cli::Cli;
use nicrawl::config::{Config, CrawlerConfig};
use nicrawl::crawler::Crawler;
use nicrawl::downloader::DownloadManager;
use nicrawl::fetcher::PageFetcher;
use nicrawl::monitor::Monitor;
use nicrawl::{logging, netiface, url_tools};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_args();

    logging::init_logging(&cli.log_dir)?;

    // Startup validation is fatal before any task is spawned.
    let start_url = url_tools::normalize_seed(&cli.start_url);
    let parsed = url::Url::parse(&start_url).map_err(|e| format!("invalid seed URL: {}", e))?;
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(format!("seed URL has no host: {}", start_url).into());
    }

    std::fs::create_dir_all(&cli.target_dir)
        .map_err(|e| format!("failed to create target directory {}: {}", cli.target_dir, e))?;

    let user_agent = cli
        .user_agent
        .clone()
        .unwrap_or_else(|| Config::USER_AGENT.to_string());

    let interfaces = Arc::new(netiface::configure_interfaces(
        &cli.interfaces,
        Config::CLIENTS_PER_INTERFACE,
        &user_agent,
    )?);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let visited_log = std::path::PathBuf::from(format!("visitedURLs_{}.txt", timestamp));
    let download_log = std::path::PathBuf::from(format!("downloads_{}.txt", timestamp));
    let panic_log = std::path::PathBuf::from("panic_urls.txt");

    let config = CrawlerConfig {
        start_url: start_url.clone(),
        target_dir: cli.target_dir.clone(),
        max_depth: cli.max_depth,
        user_agent,
        doc_extensions: cli.extensions.clone(),
        ..Default::default()
    };

    let manager = DownloadManager::new(Arc::clone(&interfaces), &config, download_log);
    manager.start_workers();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let monitor = Monitor::new(Arc::clone(&manager), shutdown_rx);
    monitor.start_monitoring(Config::SCALER_COUNT);

    let fetcher = Arc::new(PageFetcher::new(Arc::clone(&interfaces)));
    let crawler = Crawler::new(
        config,
        fetcher,
        Arc::clone(&manager),
        visited_log,
        panic_log,
    );

    print_startup_info(&start_url, &cli.target_dir, cli.max_depth, &interfaces);

    let summary = tokio::select! {
        result = crawler.run() => Some(result?),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupt received, shutting down");
            None
        }
    };

    // Shutdown sequence: monitors first, then close and drain the downloader.
    let _ = shutdown_tx.send(true);
    monitor.wait().await;
    manager.shutdown().await;

    print_final_stats(&manager, &interfaces, crawler.panic_count());
    if let Some(summary) = summary {
        println!(
            "Crawl summary: {} pages fetched, {} fetch errors",
            summary.pages_fetched, summary.fetch_errors
        );
    }

    Ok(())
}

fn print_startup_info(
    start_url: &str,
    target_dir: &str,
    max_depth: u32,
    interfaces: &[netiface::NetworkInterface],
) {
    println!("================================================================================");
    println!("  MULTI-NIC DOCUMENT CRAWL");
    println!("================================================================================");
    println!("  Seed:       {} (max depth {})", start_url, max_depth);
    println!("  Output:     {}", target_dir);
    println!(
        "  Workers:    {} initial, {} max",
        Config::INITIAL_DOWNLOAD_WORKERS,
        Config::MAX_DOWNLOAD_WORKERS
    );
    println!("  Interfaces: {}", interfaces.len());
    for iface in interfaces {
        println!(
            "    {} ({}) - {} - share {}",
            iface.name,
            iface.ip,
            iface.speed.label(),
            iface.worker_share
        );
    }
    println!(
        "  Queue capacity: {} | polite delay: {:?}",
        Config::MAX_QUEUE_SIZE,
        Config::POLITE_DELAY
    );
    println!("================================================================================");
}

fn print_final_stats(
    manager: &DownloadManager,
    interfaces: &[netiface::NetworkInterface],
    panic_count: u64,
) {
    let stats = manager.stats();
    let elapsed = stats.elapsed_secs.max(1) as f64;

    println!("================================================================================");
    println!("  CRAWL COMPLETE");
    println!("================================================================================");
    println!(
        "  Downloads: {} attempts, {} success, {} failed",
        stats.attempts, stats.successes, stats.failures
    );
    println!("  Data written: {}", url_tools::format_bytes(stats.bytes_written));
    println!(
        "  Throughput: {:.2} downloads/sec, {:.2} Mbps",
        stats.successes as f64 / elapsed,
        stats.bytes_written as f64 * 8.0 / elapsed / 1024.0 / 1024.0
    );
    println!("  Recovered panics: {}", panic_count);
    println!("  Interfaces:");
    for iface in interfaces {
        println!(
            "    {} ({}) - {} - share {}",
            iface.name,
            iface.ip,
            iface.speed.label(),
            iface.worker_share
        );
    }
    println!("================================================================================");
}
