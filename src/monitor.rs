//! Auto-scaler fleet and periodic samplers over the download manager's
//! snapshot accessors.
//!
//! Several identical scalers run in parallel: under bursty queue fill any
//! one observer can lag the surge, while independent observers converge on
//! the target worker count within a tick. The `max_workers` bound and the
//! atomic `active_workers` read keep them from overshooting.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::interval;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::downloader::DownloadManager;
use crate::url_tools;

pub struct Monitor {
    manager: Arc<DownloadManager>,
    shutdown: watch::Receiver<bool>,
    tasks: TaskTracker,
}

impl Monitor {
    pub fn new(manager: Arc<DownloadManager>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            manager,
            shutdown,
            tasks: TaskTracker::new(),
        }
    }

    /// Start `scaler_count` scalers plus the performance, memory, and network
    /// samplers. All loops exit on the shutdown broadcast.
    pub fn start_monitoring(&self, scaler_count: usize) {
        for _ in 0..scaler_count {
            let manager = Arc::clone(&self.manager);
            let mut shutdown = self.shutdown.clone();
            self.tasks.spawn(async move {
                let mut tick = interval(Config::SCALE_CHECK_INTERVAL);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tick.tick() => check_and_scale(&manager),
                    }
                }
            });
        }

        let manager = Arc::clone(&self.manager);
        let mut shutdown = self.shutdown.clone();
        self.tasks.spawn(async move {
            let mut tick = interval(std::time::Duration::from_secs(3));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tick.tick() => print_performance(&manager),
                }
            }
        });

        let mut shutdown = self.shutdown.clone();
        self.tasks.spawn(async move {
            let mut tick = interval(std::time::Duration::from_secs(20));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tick.tick() => sample_memory(),
                }
            }
        });

        let manager = Arc::clone(&self.manager);
        let mut shutdown = self.shutdown.clone();
        self.tasks.spawn(async move {
            let mut tick = interval(std::time::Duration::from_secs(15));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tick.tick() => print_network(&manager),
                }
            }
        });

        self.tasks.close();
    }

    pub async fn wait(&self) {
        self.tasks.wait().await;
    }
}

fn check_and_scale(manager: &Arc<DownloadManager>) {
    let (queued, capacity) = manager.queue_status();
    let active = manager.active_workers();
    let to_add = scale_decision(queued, capacity, active, manager.max_workers());

    if to_add > 0 {
        let utilization = queued as f64 / capacity as f64;
        manager.add_workers(to_add);
        tracing::info!(
            added = to_add,
            utilization_pct = utilization * 100.0,
            "scaled worker pool"
        );
    }
}

/// How many workers a scaler tick should add. Zero when utilization is at or
/// under the threshold or the pool is already at its ceiling.
fn scale_decision(queued: usize, capacity: usize, active: usize, max_workers: usize) -> usize {
    if capacity == 0 || active >= max_workers {
        return 0;
    }

    let utilization = queued as f64 / capacity as f64;
    if utilization <= Config::SCALE_THRESHOLD {
        return 0;
    }

    scale_step(utilization, Config::SCALE_STEP).min(max_workers - active)
}

/// Utilization ladder: base step above the threshold, doubled above 60%,
/// quadrupled above 80%.
fn scale_step(utilization: f64, base: usize) -> usize {
    if utilization > 0.8 {
        base * 4
    } else if utilization > 0.6 {
        base * 2
    } else {
        base
    }
}

fn print_performance(manager: &Arc<DownloadManager>) {
    let stats = manager.stats();
    let (queued, _) = manager.queue_status();

    if stats.attempts > 0 {
        let elapsed = stats.elapsed_secs.max(1) as f64;
        let success_rate = stats.successes as f64 / stats.attempts as f64 * 100.0;
        let throughput = stats.successes as f64 / elapsed;
        let mbps = stats.bytes_written as f64 * 8.0 / elapsed / 1024.0 / 1024.0;

        println!(
            "DOWNLOADS: {} workers, {} queued | {} attempts, {} success, {} failed ({:.1}%) | {:.1} dl/s, {:.1} Mbps | {}",
            stats.active_workers,
            queued,
            stats.attempts,
            stats.successes,
            stats.failures,
            success_rate,
            throughput,
            mbps,
            url_tools::format_bytes(stats.bytes_written)
        );
    }
}

/// Sample resident set size from procfs. Rust has no collector to force, so
/// pressure above the target logs a warning as the heap-shrink hint.
fn sample_memory() {
    let Some(rss_bytes) = read_rss_bytes() else {
        return;
    };

    let rss_gb = rss_bytes as f64 / 1024.0 / 1024.0 / 1024.0;
    tracing::info!(
        resident_gb = rss_gb,
        target_gb = Config::TARGET_MEMORY_GB,
        "memory sample"
    );

    if rss_gb > Config::TARGET_MEMORY_GB as f64 * 0.95 {
        tracing::warn!(
            resident_gb = rss_gb,
            "resident memory approaching target, allocation pressure is high"
        );
    }
}

fn read_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * 4096)
}

fn print_network(manager: &Arc<DownloadManager>) {
    println!("Network status:");
    for (name, queued, capacity) in manager.interface_queue_status() {
        let utilization = if capacity > 0 {
            queued as f64 / capacity as f64 * 100.0
        } else {
            0.0
        };
        println!("   {}: queue {}/{} ({:.1}%)", name, queued, capacity, utilization);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlerConfig;
    use crate::netiface;

    #[test]
    fn test_scale_step_ladder() {
        assert_eq!(scale_step(0.45, 300), 300);
        assert_eq!(scale_step(0.61, 300), 600);
        assert_eq!(scale_step(0.70, 300), 600);
        assert_eq!(scale_step(0.81, 300), 1200);
        assert_eq!(scale_step(0.95, 300), 1200);
    }

    #[test]
    fn test_scale_decision_thresholds() {
        // At or under 40% utilization: no scaling.
        assert_eq!(scale_decision(400, 1000, 100, 800), 0);
        // Above threshold: base step, capped by remaining headroom.
        assert_eq!(scale_decision(500, 1000, 100, 800), 300);
        assert_eq!(scale_decision(500, 1000, 700, 800), 100);
        // Ladder multipliers apply before the cap.
        assert_eq!(scale_decision(700, 1000, 100, 800), 600);
        assert_eq!(scale_decision(900, 1000, 100, 800), 700);
        // At the ceiling or with no capacity: never scale.
        assert_eq!(scale_decision(900, 1000, 800, 800), 0);
        assert_eq!(scale_decision(0, 0, 0, 800), 0);
    }

    #[tokio::test]
    async fn test_scaler_tick_respects_worker_ceiling() {
        let interfaces = Arc::new(
            netiface::configure_interfaces(&["testm=127.0.0.1@1g".to_string()], 2, "test-agent")
                .unwrap(),
        );
        let config = CrawlerConfig {
            target_dir: std::env::temp_dir().to_string_lossy().to_string(),
            max_queue_size: 10,
            initial_workers: 0,
            max_workers: 8,
            ..Default::default()
        };
        let manager = DownloadManager::new(
            interfaces,
            &config,
            std::env::temp_dir().join("downloads_scaler_test.txt"),
        );

        // Empty queues: a tick must not add anything.
        check_and_scale(&manager);
        assert_eq!(manager.active_workers(), 0);

        manager.add_workers(8);
        // At the ceiling: a tick must not push past max_workers.
        check_and_scale(&manager);
        assert_eq!(manager.active_workers(), 8);

        manager.shutdown().await;
    }

    #[test]
    fn test_rss_sample_is_readable_on_linux() {
        if std::path::Path::new("/proc/self/statm").exists() {
            assert!(read_rss_bytes().unwrap() > 0);
        }
    }
}
