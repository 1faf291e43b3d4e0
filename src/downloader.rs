//! Multi-NIC download engine: per-interface bounded queues plus a shared
//! priority (retry) queue, drained by a worker pool whose size only grows.
//!
//! Queue discipline: the priority queue always wins; interface queues are
//! FIFO per interface. Every producer boundary is non-blocking, with
//! `persistent_enqueue` as the bounded-retry escalation when all queues are
//! momentarily full.

use futures_util::StreamExt;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::task::TaskTracker;

use crate::config::{Config, CrawlerConfig};
use crate::logging;
use crate::netiface::NetworkInterface;
use crate::url_tools;

type DownloadLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// A unit of download work. Immutable once accepted by a queue except for
/// `retry` and `priority`, which are set when re-enqueued after a failure.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub url: String,
    pub depth: u32,
    pub retry: u32,
    pub priority: bool,
    pub interface_id: usize,
}

impl DownloadTask {
    pub fn new(url: String, depth: u32) -> Self {
        Self {
            url,
            depth,
            retry: 0,
            priority: false,
            interface_id: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum DownloadError {
    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("request failed: {0}")]
    Request(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
struct QueueSenders {
    priority: flume::Sender<DownloadTask>,
    interfaces: Vec<flume::Sender<DownloadTask>>,
}

/// The three download state maps. One mutex guards all three so a URL's
/// transition between maps is a single critical section.
#[derive(Default)]
struct DownloadState {
    downloaded: HashSet<String>,
    pending: HashSet<String>,
    failed: HashMap<String, u32>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DownloadStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub bytes_written: u64,
    pub elapsed_secs: u64,
    pub active_workers: usize,
}

pub struct DownloadManager {
    interfaces: Arc<Vec<NetworkInterface>>,

    senders: Mutex<Option<QueueSenders>>,
    priority_rx: flume::Receiver<DownloadTask>,
    interface_rxs: Vec<flume::Receiver<DownloadTask>>,
    per_queue_capacity: usize,
    priority_capacity: usize,

    limiter: DownloadLimiter,
    workers: TaskTracker,
    active_workers: AtomicUsize,
    interface_cursor: AtomicUsize,

    state: Mutex<DownloadState>,

    target_dir: PathBuf,
    download_log: PathBuf,

    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    bytes_written: AtomicU64,
    started_at: Instant,

    initial_workers: usize,
    max_workers: usize,
}

impl DownloadManager {
    pub fn new(
        interfaces: Arc<Vec<NetworkInterface>>,
        config: &CrawlerConfig,
        download_log: PathBuf,
    ) -> Arc<Self> {
        let interface_count = interfaces.len();
        let per_queue_capacity = config.max_queue_size / interface_count;
        let priority_capacity = config.max_queue_size;

        let (priority_tx, priority_rx) = flume::bounded(priority_capacity);
        let mut interface_txs = Vec::with_capacity(interface_count);
        let mut interface_rxs = Vec::with_capacity(interface_count);
        for _ in 0..interface_count {
            let (tx, rx) = flume::bounded(per_queue_capacity);
            interface_txs.push(tx);
            interface_rxs.push(rx);
        }

        // Ultra-permissive admission governor, not a politeness control.
        let burst = NonZeroU32::new((config.max_workers * 3) as u32)
            .unwrap_or(NonZeroU32::new(1).expect("nonzero"));
        let quota = Quota::with_period(Duration::from_micros(10))
            .expect("nonzero period")
            .allow_burst(burst);

        Arc::new(Self {
            interfaces,
            senders: Mutex::new(Some(QueueSenders {
                priority: priority_tx,
                interfaces: interface_txs,
            })),
            priority_rx,
            interface_rxs,
            per_queue_capacity,
            priority_capacity,
            limiter: RateLimiter::direct(quota),
            workers: TaskTracker::new(),
            active_workers: AtomicUsize::new(0),
            interface_cursor: AtomicUsize::new(0),
            state: Mutex::new(DownloadState::default()),
            target_dir: PathBuf::from(&config.target_dir),
            download_log,
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            started_at: Instant::now(),
            initial_workers: config.initial_workers,
            max_workers: config.max_workers,
        })
    }

    /// Start the initial worker pool, distributed across interfaces by their
    /// speed-derived share.
    pub fn start_workers(self: &Arc<Self>) {
        let interface_count = self.interfaces.len();
        let mut total = 0;

        for (interface_id, iface) in self.interfaces.iter().enumerate() {
            let workers = iface
                .worker_share
                .min(self.initial_workers / interface_count + 100);
            for j in 0..workers {
                self.spawn_worker(interface_id, j % iface.clients.len());
            }
            total += workers;
            tracing::info!(interface = %iface.name, workers, "started workers");
        }

        tracing::info!(total, "download worker pool started");
    }

    /// Spawn `count` additional workers, split across interfaces by quotient
    /// and remainder. The pool only grows; workers are never removed.
    pub fn add_workers(self: &Arc<Self>, count: usize) {
        if count == 0 {
            return;
        }

        let interface_count = self.interfaces.len();
        let per_interface = count / interface_count;
        let remainder = count % interface_count;

        for (interface_id, iface) in self.interfaces.iter().enumerate() {
            let mut workers = per_interface;
            if interface_id < remainder {
                workers += 1;
            }
            for j in 0..workers {
                self.spawn_worker(interface_id, j % iface.clients.len());
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>, interface_id: usize, client_index: usize) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
        let manager = Arc::clone(self);
        self.workers.spawn(async move {
            manager.worker_loop(interface_id, client_index).await;
        });
    }

    /// Try to accept a task. Rejects duplicates against `downloaded ∪
    /// pending`, assigns the interface round-robin, and lands on the
    /// interface queue or, if full, the priority queue. Never blocks.
    pub fn enqueue(&self, mut task: DownloadTask) -> bool {
        if self.is_downloaded_or_pending(&task.url) {
            return false;
        }

        let senders = match self.senders.lock().clone() {
            Some(s) => s,
            None => return false,
        };

        let interface_id =
            self.interface_cursor.fetch_add(1, Ordering::Relaxed) % self.interfaces.len();
        task.interface_id = interface_id;
        let url = task.url.clone();

        match senders.interfaces[interface_id].try_send(task) {
            Ok(()) => {
                self.mark_pending(&url);
                true
            }
            Err(err) => match senders.priority.try_send(err.into_inner()) {
                Ok(()) => {
                    self.mark_pending(&url);
                    true
                }
                Err(_) => false,
            },
        }
    }

    /// Escalation path for refused enqueues: bounded retries with linearly
    /// increasing backoff, priority queue first, then each interface queue in
    /// order. Drops with a single diagnostic after the attempt budget.
    pub async fn persistent_enqueue(&self, task: DownloadTask) {
        let url = task.url.clone();
        let depth = task.depth;
        let mut task = task;

        for attempt in 0..Config::PERSISTENT_ENQUEUE_ATTEMPTS {
            tokio::time::sleep(Duration::from_millis(attempt as u64 * 50)).await;

            let senders = match self.senders.lock().clone() {
                Some(s) => s,
                None => break,
            };

            task = match senders.priority.try_send(task) {
                Ok(()) => {
                    self.mark_pending(&url);
                    return;
                }
                Err(err) => err.into_inner(),
            };

            for tx in &senders.interfaces {
                task = match tx.try_send(task) {
                    Ok(()) => {
                        self.mark_pending(&url);
                        return;
                    }
                    Err(err) => err.into_inner(),
                };
            }
        }

        tracing::warn!(
            depth,
            url = %url,
            attempts = Config::PERSISTENT_ENQUEUE_ATTEMPTS,
            "dropped task after exhausting enqueue attempts"
        );
    }

    async fn worker_loop(self: Arc<Self>, interface_id: usize, client_index: usize) {
        let client = self.interfaces[interface_id].clients[client_index].clone();
        let iface_rx = self.interface_rxs[interface_id].clone();

        loop {
            let task = match self.priority_rx.try_recv() {
                Ok(task) => task,
                Err(_) => match iface_rx.try_recv() {
                    Ok(task) => task,
                    Err(flume::TryRecvError::Empty) => {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        continue;
                    }
                    Err(flume::TryRecvError::Disconnected) => {
                        if self.priority_rx.is_disconnected() && self.priority_rx.is_empty() {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        continue;
                    }
                },
            };

            // Admission ceiling only; proceed when the short wait expires.
            let _ = tokio::time::timeout(Duration::from_millis(50), self.limiter.until_ready()).await;

            self.attempts.fetch_add(1, Ordering::Relaxed);

            match self.download_document(&task.url, &client).await {
                Ok(written) => {
                    self.successes.fetch_add(1, Ordering::Relaxed);
                    self.bytes_written.fetch_add(written, Ordering::Relaxed);
                    self.mark_completed(&task.url);
                }
                Err(error) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(url = %task.url, %error, retry = task.retry, "download failed");
                    self.handle_failure(task);
                }
            }
        }

        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Retry with backoff through the priority queue, or give up and move the
    /// URL to `failed`. The re-enqueue is scheduled on a detached task so the
    /// worker never blocks on a full queue.
    fn handle_failure(self: &Arc<Self>, mut task: DownloadTask) {
        if task.retry < Config::MAX_RETRIES {
            task.retry += 1;
            task.priority = true;

            let manager = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(Config::RETRY_BACKOFF * task.retry).await;

                let sender = manager.senders.lock().clone().map(|s| s.priority);
                let url = task.url.clone();
                let attempts = task.retry;
                match sender {
                    Some(tx) if tx.try_send(task).is_ok() => {}
                    _ => manager.mark_failed(&url, attempts),
                }
            });
        } else {
            self.mark_failed(&task.url, task.retry + 1);
        }
    }

    async fn download_document(
        &self,
        url: &str,
        client: &reqwest::Client,
    ) -> Result<u64, DownloadError> {
        let response = client
            .get(url)
            .header("Accept", "*/*")
            .send()
            .await
            .map_err(|e| DownloadError::Request(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(DownloadError::HttpStatus(response.status().as_u16()));
        }

        let content_disposition = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let filename = url_tools::extract_filename(url, content_disposition.as_deref());
        let path = self.target_dir.join(filename);

        let file = tokio::fs::File::create(&path).await?;
        let mut writer = tokio::io::BufWriter::with_capacity(Config::DOWNLOAD_BUFFER_SIZE, file);

        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DownloadError::Request(e.to_string()))?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;

        Ok(written)
    }

    pub fn is_downloaded_or_pending(&self, url: &str) -> bool {
        let state = self.state.lock();
        state.downloaded.contains(url) || state.pending.contains(url)
    }

    fn mark_pending(&self, url: &str) {
        self.state.lock().pending.insert(url.to_string());
    }

    fn mark_completed(&self, url: &str) {
        {
            let mut state = self.state.lock();
            state.pending.remove(url);
            state.downloaded.insert(url.to_string());
        }
        logging::append_line_detached(self.download_log.clone(), url.to_string());
    }

    fn mark_failed(&self, url: &str, attempts: u32) {
        let mut state = self.state.lock();
        state.pending.remove(url);
        state.failed.insert(url.to_string(), attempts);
    }

    pub fn stats(&self) -> DownloadStats {
        DownloadStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs(),
            active_workers: self.active_workers.load(Ordering::SeqCst),
        }
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Total queued items and total capacity across the priority queue and
    /// every interface queue.
    pub fn queue_status(&self) -> (usize, usize) {
        let mut queued = self.priority_rx.len();
        let mut capacity = self.priority_capacity;
        for rx in &self.interface_rxs {
            queued += rx.len();
            capacity += self.per_queue_capacity;
        }
        (queued, capacity)
    }

    /// Per-interface queue occupancy for the network sampler.
    pub fn interface_queue_status(&self) -> Vec<(String, usize, usize)> {
        self.interfaces
            .iter()
            .zip(&self.interface_rxs)
            .map(|(iface, rx)| (iface.name.clone(), rx.len(), self.per_queue_capacity))
            .collect()
    }

    pub fn failed_count(&self) -> usize {
        self.state.lock().failed.len()
    }

    /// Close the priority queue and all interface queues, then await worker
    /// exit. Workers drain whatever is still queued before stopping.
    pub async fn shutdown(&self) {
        self.senders.lock().take();
        self.workers.close();
        self.workers.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netiface;

    fn test_manager(queue_size: usize) -> Arc<DownloadManager> {
        let interfaces = Arc::new(
            netiface::configure_interfaces(
                &["testa=127.0.0.1@1g".to_string(), "testb=127.0.0.1@1g".to_string()],
                2,
                "test-agent",
            )
            .unwrap(),
        );
        let dir = std::env::temp_dir();
        let config = CrawlerConfig {
            target_dir: dir.to_string_lossy().to_string(),
            max_queue_size: queue_size,
            initial_workers: 4,
            max_workers: 16,
            ..Default::default()
        };
        DownloadManager::new(interfaces, &config, dir.join("downloads_test.txt"))
    }

    #[tokio::test]
    async fn test_enqueue_accepts_then_dedups() {
        let manager = test_manager(100);
        let task = DownloadTask::new("https://ex/doc.pdf".to_string(), 1);
        assert!(manager.enqueue(task.clone()));
        assert!(!manager.enqueue(task));
        assert!(manager.is_downloaded_or_pending("https://ex/doc.pdf"));
    }

    #[tokio::test]
    async fn test_pending_and_downloaded_disjoint() {
        let manager = test_manager(100);
        manager.enqueue(DownloadTask::new("https://ex/a.pdf".to_string(), 0));
        manager.mark_completed("https://ex/a.pdf");

        let state = manager.state.lock();
        assert!(state.downloaded.contains("https://ex/a.pdf"));
        assert!(!state.pending.contains("https://ex/a.pdf"));
    }

    #[tokio::test]
    async fn test_mark_failed_records_attempt_count() {
        let manager = test_manager(100);
        manager.enqueue(DownloadTask::new("https://ex/b.pdf".to_string(), 0));
        manager.mark_failed("https://ex/b.pdf", 4);

        let state = manager.state.lock();
        assert_eq!(state.failed.get("https://ex/b.pdf"), Some(&4));
        assert!(!state.pending.contains("https://ex/b.pdf"));
    }

    #[tokio::test]
    async fn test_enqueue_overflows_to_priority_queue() {
        // Per-interface capacity of 1 (max_queue_size 2 across 2 interfaces).
        let manager = test_manager(2);
        for i in 0..4 {
            assert!(manager.enqueue(DownloadTask::new(format!("https://ex/{}.pdf", i), 0)));
        }
        let (queued, _) = manager.queue_status();
        assert_eq!(queued, 4);
        assert!(manager.priority_rx.len() >= 2);
    }

    #[tokio::test]
    async fn test_enqueue_refused_when_everything_full() {
        let manager = test_manager(2);
        let mut accepted = 0;
        // Two interface queues of 1 + priority capacity 2: four fit, the rest refuse.
        for i in 0..10 {
            if manager.enqueue(DownloadTask::new(format!("https://ex/{}.pdf", i), 0)) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_enqueue_drops_in_bounded_time() {
        let manager = test_manager(2);
        for i in 0..10 {
            manager.enqueue(DownloadTask::new(format!("https://ex/{}.pdf", i), 0));
        }

        let started = tokio::time::Instant::now();
        manager
            .persistent_enqueue(DownloadTask::new("https://ex/late.pdf".to_string(), 3))
            .await;
        // 50 attempts of linearly increasing backoff: sum = 49*50/2 * 50ms.
        assert!(started.elapsed() <= Duration::from_millis(50 * 49 * 50 / 2 + 1000));
        assert!(!manager.is_downloaded_or_pending("https://ex/late.pdf"));
    }

    #[tokio::test]
    async fn test_add_workers_grows_and_shutdown_drains() {
        let manager = test_manager(100);
        manager.add_workers(4);
        assert_eq!(manager.active_workers(), 4);

        manager.add_workers(3);
        assert_eq!(manager.active_workers(), 7);

        manager.shutdown().await;
        assert_eq!(manager.active_workers(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_refused() {
        let manager = test_manager(100);
        manager.shutdown().await;
        assert!(!manager.enqueue(DownloadTask::new("https://ex/x.pdf".to_string(), 0)));
    }

    #[tokio::test]
    async fn test_queue_status_capacity() {
        let manager = test_manager(100);
        let (queued, capacity) = manager.queue_status();
        assert_eq!(queued, 0);
        // Priority (100) + 2 interface queues of 50.
        assert_eq!(capacity, 200);
    }
}
