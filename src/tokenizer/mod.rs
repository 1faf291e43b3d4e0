//! Two-tier tokenizer: a routing coordinator that picks between the
//! byte-scanning fast path and the DOM-walking slow path for each page.

pub mod fast_path;
pub mod slow_path;

pub use fast_path::{FastPathResult, FastPathStats, FastPathTokenizer};
pub use slow_path::{DocumentRecord, PageMetadata, SlowPathResult, SlowPathStats, SlowPathTokenizer};

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use url::Url;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathDecision {
    Fast,
    Slow,
}

/// URL-path fragments that mark document repositories (forced slow).
const DOCUMENT_KEYWORDS: &[&str] = &["/document", "/paper", "/publication", "/research", "/library"];

/// URL-path fragments that mark link-heavy navigation (forced fast).
const INDEX_KEYWORDS: &[&str] = &["/sitemap", "/archive", "/category", "/tag", "/index", "/list"];

pub struct Coordinator {
    fast_path: FastPathTokenizer,
    slow_path: SlowPathTokenizer,

    fast_count: AtomicU64,
    slow_count: AtomicU64,

    fast_path_size_limit: AtomicUsize,
    slow_path_size_limit: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct RoutingStats {
    pub fast_count: u64,
    pub slow_count: u64,
    pub fast_percent: f64,
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            fast_path: FastPathTokenizer::new(),
            slow_path: SlowPathTokenizer::new(),
            fast_count: AtomicU64::new(0),
            slow_count: AtomicU64::new(0),
            fast_path_size_limit: AtomicUsize::new(Config::FAST_PATH_SIZE_LIMIT),
            slow_path_size_limit: AtomicUsize::new(Config::SLOW_PATH_SIZE_LIMIT),
        }
    }

    /// Route a page before tokenizing it. Rules are evaluated top to bottom;
    /// the first match wins.
    pub fn decide(&self, page_url: &Url, body_size: usize) -> PathDecision {
        let path_lower = page_url.path().to_lowercase();

        // Large pages likely carry important content.
        if body_size > self.slow_path_size_limit.load(Ordering::Relaxed) {
            return self.route_slow();
        }

        // Document repository URLs.
        if DOCUMENT_KEYWORDS.iter().any(|kw| path_lower.contains(kw)) {
            return self.route_slow();
        }

        // Query parameters indicate dynamic content.
        if page_url.query().is_some_and(|q| !q.is_empty()) {
            return self.route_slow();
        }

        // Small pages are usually navigation.
        if body_size < self.fast_path_size_limit.load(Ordering::Relaxed) {
            return self.route_fast();
        }

        // Known navigation patterns.
        if INDEX_KEYWORDS.iter().any(|kw| path_lower.contains(kw)) {
            return self.route_fast();
        }

        // Shallow paths are often indexes.
        if page_url.path().split('/').count() <= 3 {
            return self.route_fast();
        }

        self.route_slow()
    }

    fn route_fast(&self) -> PathDecision {
        self.fast_count.fetch_add(1, Ordering::Relaxed);
        PathDecision::Fast
    }

    fn route_slow(&self) -> PathDecision {
        self.slow_count.fetch_add(1, Ordering::Relaxed);
        PathDecision::Slow
    }

    pub fn process_fast_path(&self, html: &[u8], base: &Url) -> FastPathResult {
        self.fast_path.extract_links(html, base)
    }

    pub fn process_slow_path(
        &self,
        html: &[u8],
        base: &Url,
        doc_extensions: &[String],
    ) -> SlowPathResult {
        self.slow_path.analyze(html, base, doc_extensions)
    }

    pub fn routing_stats(&self) -> RoutingStats {
        let fast = self.fast_count.load(Ordering::Relaxed);
        let slow = self.slow_count.load(Ordering::Relaxed);
        let total = fast + slow;
        RoutingStats {
            fast_count: fast,
            slow_count: slow,
            fast_percent: if total > 0 {
                fast as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }

    pub fn fast_path_stats(&self) -> FastPathStats {
        self.fast_path.stats()
    }

    pub fn slow_path_stats(&self) -> SlowPathStats {
        self.slow_path.stats()
    }

    pub fn set_fast_path_size_limit(&self, bytes: usize) {
        self.fast_path_size_limit.store(bytes, Ordering::Relaxed);
    }

    pub fn set_slow_path_size_limit(&self, bytes: usize) {
        self.slow_path_size_limit.store(bytes, Ordering::Relaxed);
    }

    pub fn reset_stats(&self) {
        self.fast_path.reset_stats();
        self.slow_path.reset_stats();
        self.fast_count.store(0, Ordering::Relaxed);
        self.slow_count.store(0, Ordering::Relaxed);
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decide(url: &str, body_size: usize) -> PathDecision {
        Coordinator::new().decide(&Url::parse(url).unwrap(), body_size)
    }

    #[test]
    fn test_small_index_page_is_fast() {
        assert_eq!(decide("https://a.b/index", 10 * 1024), PathDecision::Fast);
    }

    #[test]
    fn test_oversize_beats_index_keyword() {
        assert_eq!(decide("https://a.b/sitemap.xml", 600 * 1024), PathDecision::Slow);
    }

    #[test]
    fn test_document_keyword_beats_small_body() {
        assert_eq!(decide("https://a.b/research/notes", 50 * 1024), PathDecision::Slow);
    }

    #[test]
    fn test_query_beats_small_body() {
        assert_eq!(decide("https://a.b/blog?page=2", 50 * 1024), PathDecision::Slow);
    }

    #[test]
    fn test_deep_but_small_is_fast() {
        assert_eq!(decide("https://a.b/a/b/c/d/e", 80 * 1024), PathDecision::Fast);
    }

    #[test]
    fn test_deep_medium_defaults_slow() {
        assert_eq!(decide("https://a.b/a/b/c/d/e", 300 * 1024), PathDecision::Slow);
    }

    #[test]
    fn test_index_keyword_in_medium_body_is_fast() {
        assert_eq!(decide("https://a.b/press/archive/x/y", 300 * 1024), PathDecision::Fast);
    }

    #[test]
    fn test_shallow_medium_body_is_fast() {
        assert_eq!(decide("https://a.b/one/two", 300 * 1024), PathDecision::Fast);
    }

    #[test]
    fn test_routing_counters() {
        let coordinator = Coordinator::new();
        let url = Url::parse("https://a.b/index").unwrap();
        coordinator.decide(&url, 1024);
        coordinator.decide(&url, 600 * 1024);
        let stats = coordinator.routing_stats();
        assert_eq!(stats.fast_count, 1);
        assert_eq!(stats.slow_count, 1);
        assert!((stats.fast_percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tunable_limits() {
        let coordinator = Coordinator::new();
        let url = Url::parse("https://a.b/a/b/c/d/e").unwrap();
        coordinator.set_fast_path_size_limit(10 * 1024);
        // 80 KB no longer under the fast limit, path is deep: falls to default slow.
        assert_eq!(coordinator.decide(&url, 80 * 1024), PathDecision::Slow);

        coordinator.set_slow_path_size_limit(50 * 1024);
        assert_eq!(coordinator.decide(&url, 80 * 1024), PathDecision::Slow);
    }
}
