//! Crawl orchestrator: the deduplicating visit frontier that drives the
//! two-tier tokenizer and the download engine, bounded by crawl depth.
//!
//! Per-page processing runs on the blocking pool behind a join-error guard,
//! so a single malformed page surfaces as a recovered panic instead of
//! halting the crawl. Malformed-but-parseable input already degrades inside
//! the tokenizers; the guard is last-resort insurance.

use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use url::Url;

use crate::config::{Config, CrawlerConfig};
use crate::downloader::{DownloadManager, DownloadTask};
use crate::fetcher::PageFetcher;
use crate::logging;
use crate::tokenizer::{Coordinator, PathDecision};
use crate::url_tools;

/// Log the first few pages per path, then go quiet.
const VERBOSE_PAGE_LIMIT: u64 = 10;

struct FetchRequest {
    url: String,
    depth: u32,
    referer: Option<String>,
}

enum TokenizeOutcome {
    Fast(crate::tokenizer::FastPathResult),
    Slow(crate::tokenizer::SlowPathResult),
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CrawlSummary {
    pub pages_fetched: u64,
    pub fetch_errors: u64,
    pub panic_count: u64,
}

pub struct Crawler {
    config: CrawlerConfig,
    coordinator: Arc<Coordinator>,
    fetcher: Arc<PageFetcher>,
    manager: Arc<DownloadManager>,

    visited: RwLock<HashSet<String>>,
    visited_log: PathBuf,
    panic_log: PathBuf,

    work_tx: mpsc::UnboundedSender<FetchRequest>,
    work_rx: Mutex<Option<mpsc::UnboundedReceiver<FetchRequest>>>,
    /// Requests scheduled but not yet fully processed (queued + in flight).
    outstanding: AtomicUsize,

    pages_fetched: AtomicU64,
    fetch_errors: AtomicU64,
    panic_count: AtomicU64,

    seed_latch: Once,
}

impl Crawler {
    pub fn new(
        config: CrawlerConfig,
        fetcher: Arc<PageFetcher>,
        manager: Arc<DownloadManager>,
        visited_log: PathBuf,
        panic_log: PathBuf,
    ) -> Arc<Self> {
        let (work_tx, work_rx) = mpsc::unbounded_channel();

        Arc::new(Self {
            config,
            coordinator: Arc::new(Coordinator::new()),
            fetcher,
            manager,
            visited: RwLock::new(HashSet::new()),
            visited_log,
            panic_log,
            work_tx,
            work_rx: Mutex::new(Some(work_rx)),
            outstanding: AtomicUsize::new(0),
            pages_fetched: AtomicU64::new(0),
            fetch_errors: AtomicU64::new(0),
            panic_count: AtomicU64::new(0),
            seed_latch: Once::new(),
        })
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn panic_count(&self) -> u64 {
        self.panic_count.load(Ordering::Relaxed)
    }

    /// Crawl from the seed until the frontier drains and every in-flight
    /// page is processed.
    pub async fn run(self: &Arc<Self>) -> Result<CrawlSummary, Box<dyn std::error::Error>> {
        let mut work_rx = self
            .work_rx
            .lock()
            .take()
            .ok_or("run() can only be called once")?;

        self.submit_seed();

        let mut in_flight = JoinSet::new();

        loop {
            if self.outstanding.load(Ordering::SeqCst) == 0 {
                break;
            }

            tokio::select! {
                Some(request) = work_rx.recv(), if in_flight.len() < Config::CONCURRENT_WORKERS => {
                    let crawler = Arc::clone(self);
                    in_flight.spawn(async move {
                        crawler.process_request(request).await;
                    });
                }

                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(error) = result {
                        // process_request guards the tokenize step itself; a
                        // panic here means the fetch half blew up.
                        if error.is_panic() {
                            tracing::error!(%error, "fetch task panicked");
                        }
                    }
                    self.outstanding.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }

        self.print_two_tier_stats();

        let panics = self.panic_count.load(Ordering::Relaxed);
        if panics > 0 {
            tracing::warn!(panics, "recovered panics during crawl");
        }

        Ok(CrawlSummary {
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            panic_count: panics,
        })
    }

    /// Decorate the first outbound request with depth 0, exactly once.
    fn submit_seed(self: &Arc<Self>) {
        let seed = self.config.start_url.clone();
        self.seed_latch.call_once(|| {
            tracing::info!(url = %seed, "two-tier crawl started");
            self.record_visit(&url_tools::normalize(&seed));
            self.schedule(FetchRequest {
                url: seed,
                depth: 0,
                referer: None,
            });
        });
    }

    fn schedule(&self, request: FetchRequest) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        if self.work_tx.send(request).is_err() {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn process_request(self: &Arc<Self>, request: FetchRequest) {
        let page = match self.fetcher.fetch(&request.url, request.referer.as_deref()).await {
            Ok(page) => page,
            Err(error) => {
                self.fetch_errors.fetch_add(1, Ordering::Relaxed);
                if self.fetch_errors.load(Ordering::Relaxed) <= 20 {
                    tracing::warn!(url = %request.url, %error, "crawl fetch failed");
                }
                return;
            }
        };

        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
        self.handle_response(&request.url, request.depth, page.body).await;
    }

    /// Route one response through the coordinator and feed the results back
    /// into the frontier and the download manager.
    async fn handle_response(self: &Arc<Self>, page_url: &str, depth: u32, body: Vec<u8>) {
        let base = match Url::parse(page_url) {
            Ok(u) => u,
            Err(_) => return,
        };

        let coordinator = Arc::clone(&self.coordinator);
        let extensions = self.config.doc_extensions.clone();
        let tokenize = tokio::task::spawn_blocking(move || {
            tokenize_page(&coordinator, &base, &body, &extensions)
        })
        .await;

        let outcome = match tokenize {
            Ok(outcome) => outcome,
            Err(error) => {
                if error.is_panic() {
                    let message = panic_message(error.into_panic());
                    self.record_panic(page_url, &message);
                }
                return;
            }
        };

        match outcome {
            TokenizeOutcome::Fast(result) => {
                for url in &result.urls {
                    self.consider_url(url, depth, page_url);
                }

                let routing = self.coordinator.routing_stats();
                if routing.fast_count <= VERBOSE_PAGE_LIMIT {
                    tracing::info!(
                        depth,
                        url = %page_url,
                        links = result.urls.len(),
                        us = result.processing_us,
                        "fast path"
                    );
                }
            }
            TokenizeOutcome::Slow(result) => {
                for url in &result.urls {
                    self.consider_url(url, depth, page_url);
                }

                for doc in &result.documents {
                    self.enqueue_document(&doc.url, depth);
                }

                let routing = self.coordinator.routing_stats();
                if routing.slow_count <= VERBOSE_PAGE_LIMIT {
                    tracing::info!(
                        depth,
                        url = %page_url,
                        links = result.urls.len(),
                        docs = result.documents.len(),
                        us = result.processing_us,
                        "slow path"
                    );
                }
            }
        }

        let attempts = self.manager.stats().attempts;
        if attempts > 0 && attempts % 100 == 0 {
            self.print_two_tier_stats();
        }
    }

    /// Normalize a discovered URL, apply the depth gate and visited-set
    /// dedup, and schedule the fetch at depth+1. Returns whether scheduled.
    fn consider_url(&self, raw: &str, current_depth: u32, referer: &str) -> bool {
        let parsed = match Url::parse(raw) {
            Ok(u) => u,
            Err(_) => return false,
        };
        if parsed.host_str().map_or(true, str::is_empty) {
            return false;
        }

        if current_depth >= self.config.max_depth {
            return false;
        }

        let clean = url_tools::normalize(raw);
        if self.has_visited(&clean) {
            return false;
        }
        if !self.record_visit(&clean) {
            // Lost the insert race; the winner scheduled it.
            return false;
        }

        self.schedule(FetchRequest {
            url: raw.to_string(),
            depth: current_depth + 1,
            referer: Some(referer.to_string()),
        });
        true
    }

    /// Hand a detected document to the download manager, escalating refused
    /// enqueues to the persistent path in the background so response handling
    /// never blocks.
    fn enqueue_document(&self, doc_url: &str, depth: u32) {
        if self.manager.is_downloaded_or_pending(doc_url) {
            return;
        }

        let task = DownloadTask::new(doc_url.to_string(), depth);
        if !self.manager.enqueue(task.clone()) {
            let manager = Arc::clone(&self.manager);
            tokio::spawn(async move {
                manager.persistent_enqueue(task).await;
            });
        }
    }

    fn has_visited(&self, url: &str) -> bool {
        self.visited.read().contains(url)
    }

    /// Insert into the visited set and append to the visit log. Returns false
    /// when another insert won the race.
    fn record_visit(&self, url: &str) -> bool {
        let inserted = self.visited.write().insert(url.to_string());
        if inserted {
            logging::append_line_detached(self.visited_log.clone(), url.to_string());
        }
        inserted
    }

    fn record_panic(&self, url: &str, message: &str) {
        let count = self.panic_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::error!(url, message, panic_number = count, "recovered tokenizer panic");
        if count <= 3 {
            tracing::error!("backtrace:\n{}", std::backtrace::Backtrace::force_capture());
        }
        logging::append_line_detached(self.panic_log.clone(), url.to_string());
    }

    fn print_two_tier_stats(&self) {
        let routing = self.coordinator.routing_stats();
        let fast = self.coordinator.fast_path_stats();
        let slow = self.coordinator.slow_path_stats();

        println!("================================================================================");
        println!("  TWO-TIER TOKENIZER STATS");
        println!(
            "  fast: {} pages, avg {}us, {} links | slow: {} pages, avg {}us, {} docs",
            fast.pages, fast.avg_latency_us, fast.links, slow.pages, slow.avg_latency_us, slow.docs
        );
        println!(
            "  routing: {:.1}% fast / {:.1}% slow",
            routing.fast_percent,
            100.0 - routing.fast_percent
        );
        println!("================================================================================");
    }
}

fn tokenize_page(
    coordinator: &Coordinator,
    base: &Url,
    body: &[u8],
    extensions: &[String],
) -> TokenizeOutcome {
    match coordinator.decide(base, body.len()) {
        PathDecision::Fast => TokenizeOutcome::Fast(coordinator.process_fast_path(body, base)),
        PathDecision::Slow => {
            TokenizeOutcome::Slow(coordinator.process_slow_path(body, base, extensions))
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
