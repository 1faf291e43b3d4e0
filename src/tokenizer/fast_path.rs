//! Byte-level `href` scanner for link-heavy navigation pages.
//!
//! No DOM, no per-character allocation in the hot loop. The resolver is a
//! deliberate lightweight: it keeps absolute URLs, prefixes scheme/host for
//! `//` and `/` forms, and concatenates relative forms without collapsing
//! `..` segments or percent-decoding. Tolerant of truncated or malformed
//! input by construction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use url::Url;

pub struct FastPathTokenizer {
    pages_processed: AtomicU64,
    total_latency_us: AtomicU64,
    links_extracted: AtomicU64,
}

/// Extraction result without metadata.
#[derive(Debug, Clone)]
pub struct FastPathResult {
    pub urls: Vec<String>,
    pub processing_us: u64,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct FastPathStats {
    pub pages: u64,
    pub avg_latency_us: u64,
    pub links: u64,
}

impl FastPathTokenizer {
    pub fn new() -> Self {
        Self {
            pages_processed: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            links_extracted: AtomicU64::new(0),
        }
    }

    /// Scan `html` for `href` values and resolve them against `base`.
    /// Output order equals source order of `href=` occurrences.
    pub fn extract_links(&self, html: &[u8], base: &Url) -> FastPathResult {
        let start = Instant::now();

        let mut urls = Vec::new();
        let base_str = base.as_str();
        let base_scheme = base.scheme();
        let base_host = base.host_str().unwrap_or("");

        let n = html.len();
        let mut i = 0;
        while i + 6 < n {
            if !matches_href(&html[i..]) {
                i += 1;
                continue;
            }

            // Past "href=".
            i += 5;

            let mut quote = 0u8;
            if i < n && (html[i] == b'"' || html[i] == b'\'') {
                quote = html[i];
                i += 1;
            }

            let value_start = i;
            while i < n {
                let terminated = if quote != 0 {
                    html[i] == quote
                } else {
                    html[i] == b' ' || html[i] == b'>'
                };
                if terminated {
                    break;
                }
                i += 1;
            }

            if i > value_start {
                let raw = String::from_utf8_lossy(&html[value_start..i]);
                if keep_href(&raw) {
                    urls.push(make_absolute(&raw, base_str, base_scheme, base_host));
                }
            }

            i += 1;
        }

        let elapsed_us = start.elapsed().as_micros() as u64;
        self.pages_processed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(elapsed_us, Ordering::Relaxed);
        self.links_extracted.fetch_add(urls.len() as u64, Ordering::Relaxed);

        FastPathResult {
            urls,
            processing_us: elapsed_us,
        }
    }

    pub fn stats(&self) -> FastPathStats {
        let pages = self.pages_processed.load(Ordering::Relaxed);
        let total = self.total_latency_us.load(Ordering::Relaxed);
        FastPathStats {
            pages,
            avg_latency_us: if pages > 0 { total / pages } else { 0 },
            links: self.links_extracted.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.pages_processed.store(0, Ordering::Relaxed);
        self.total_latency_us.store(0, Ordering::Relaxed);
        self.links_extracted.store(0, Ordering::Relaxed);
    }
}

impl Default for FastPathTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn matches_href(b: &[u8]) -> bool {
    b.len() >= 5
        && (b[0] == b'h' || b[0] == b'H')
        && (b[1] == b'r' || b[1] == b'R')
        && (b[2] == b'e' || b[2] == b'E')
        && (b[3] == b'f' || b[3] == b'F')
        && b[4] == b'='
}

fn keep_href(raw: &str) -> bool {
    !raw.is_empty()
        && !raw.starts_with('#')
        && !raw.starts_with("javascript:")
        && !raw.starts_with("mailto:")
}

fn make_absolute(raw: &str, base_str: &str, base_scheme: &str, base_host: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return raw.to_string();
    }

    if raw.starts_with("//") {
        return format!("{}:{}", base_scheme, raw);
    }

    if raw.starts_with('/') {
        return format!("{}://{}{}", base_scheme, base_host, raw);
    }

    if base_str.ends_with('/') {
        format!("{}{}", base_str, raw)
    } else {
        format!("{}/{}", base_str, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/docs").unwrap()
    }

    fn scan(html: &str) -> Vec<String> {
        FastPathTokenizer::new().extract_links(html.as_bytes(), &base()).urls
    }

    #[test]
    fn test_double_and_single_quotes() {
        let urls = scan(r#"<a href="https://a.b/one">x</a><a href='https://a.b/two'>y</a>"#);
        assert_eq!(urls, vec!["https://a.b/one", "https://a.b/two"]);
    }

    #[test]
    fn test_unquoted_value_terminates_at_space_or_gt() {
        let urls = scan("<a href=https://a.b/one target=_blank><a href=https://a.b/two>");
        assert_eq!(urls, vec!["https://a.b/one", "https://a.b/two"]);
    }

    #[test]
    fn test_case_insensitive_attribute() {
        let urls = scan(r#"<a HREF="https://a.b/one"><a HrEf="https://a.b/two">"#);
        assert_eq!(urls, vec!["https://a.b/one", "https://a.b/two"]);
    }

    #[test]
    fn test_output_order_matches_source_order() {
        let urls = scan(r#"<a href="/z"><a href="/a"><a href="/m">"#);
        assert_eq!(
            urls,
            vec![
                "https://example.com/z",
                "https://example.com/a",
                "https://example.com/m"
            ]
        );
    }

    #[test]
    fn test_filters_fragment_javascript_mailto_empty() {
        let urls = scan(
            r##"<a href="#top"><a href="javascript:void(0)"><a href="mailto:x@y.z"><a href=""><a href="/keep">"##,
        );
        assert_eq!(urls, vec!["https://example.com/keep"]);
    }

    #[test]
    fn test_protocol_relative_resolution() {
        let urls = scan(r#"<a href="//cdn.example.com/lib.js">"#);
        assert_eq!(urls, vec!["https://cdn.example.com/lib.js"]);
    }

    #[test]
    fn test_root_relative_resolution() {
        let urls = scan(r#"<a href="/about">"#);
        assert_eq!(urls, vec!["https://example.com/about"]);
    }

    #[test]
    fn test_relative_concatenation_inserts_slash() {
        let urls = scan(r#"<a href="guide.html">"#);
        assert_eq!(urls, vec!["https://example.com/docs/guide.html"]);
    }

    #[test]
    fn test_relative_concatenation_no_dotdot_collapse() {
        // Lightweight resolver keeps ".." segments as-is.
        let urls = scan(r#"<a href="../up.html">"#);
        assert_eq!(urls, vec!["https://example.com/docs/../up.html"]);
    }

    #[test]
    fn test_empty_body_records_one_page() {
        let tokenizer = FastPathTokenizer::new();
        let result = tokenizer.extract_links(b"", &base());
        assert!(result.urls.is_empty());
        assert_eq!(tokenizer.stats().pages, 1);
    }

    #[test]
    fn test_truncated_input_never_panics() {
        let tokenizer = FastPathTokenizer::new();
        for html in ["<a href=", "<a href=\"", "<a href=\"http", "href", "h"] {
            let _ = tokenizer.extract_links(html.as_bytes(), &base());
        }
    }

    #[test]
    fn test_counters_accumulate() {
        let tokenizer = FastPathTokenizer::new();
        tokenizer.extract_links(br#"<a href="/a"><a href="/b">"#, &base());
        tokenizer.extract_links(br#"<a href="/c">"#, &base());
        let stats = tokenizer.stats();
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.links, 3);

        tokenizer.reset_stats();
        assert_eq!(tokenizer.stats().pages, 0);
    }
}
