//! Full-DOM analyzer: accurate anchor extraction, page metadata, and
//! document-link classification.

use scraper::{Html, Selector};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use url::Url;

use crate::url_tools;

pub struct SlowPathTokenizer {
    pages_processed: AtomicU64,
    total_latency_us: AtomicU64,
    links_extracted: AtomicU64,
    docs_detected: AtomicU64,
}

/// A detected document link with its anchor context.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub url: String,
    pub extension: String,
    pub anchor_text: String,
    pub context: String,
}

#[derive(Debug, Clone, Default)]
pub struct PageMetadata {
    pub title: String,
    pub description: String,
    /// Links per KB of HTML.
    pub link_density: f64,
    pub has_nav: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SlowPathResult {
    pub urls: Vec<String>,
    pub documents: Vec<DocumentRecord>,
    pub metadata: PageMetadata,
    pub processing_us: u64,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct SlowPathStats {
    pub pages: u64,
    pub avg_latency_us: u64,
    pub links: u64,
    pub docs: u64,
}

const CONTEXT_LIMIT: usize = 200;

impl SlowPathTokenizer {
    pub fn new() -> Self {
        Self {
            pages_processed: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            links_extracted: AtomicU64::new(0),
            docs_detected: AtomicU64::new(0),
        }
    }

    /// Parse `html` into a DOM and extract anchors, document records, and
    /// page metadata. Unparseable input degrades to an empty result; the
    /// page-processed sample is recorded either way.
    pub fn analyze(&self, html: &[u8], base: &Url, doc_extensions: &[String]) -> SlowPathResult {
        let start = Instant::now();

        let body = match std::str::from_utf8(html) {
            Ok(s) => s,
            Err(_) => {
                return self.finish(SlowPathResult::default(), start);
            }
        };

        let document = Html::parse_document(body);

        let title_sel = Selector::parse("title").expect("selector");
        let meta_sel = Selector::parse(r#"meta[name="description"]"#).expect("selector");
        let nav_sel = Selector::parse("nav").expect("selector");
        let anchor_sel = Selector::parse("a[href]").expect("selector");

        let mut result = SlowPathResult {
            urls: Vec::with_capacity(100),
            documents: Vec::with_capacity(10),
            ..Default::default()
        };

        result.metadata.title = document
            .select(&title_sel)
            .next()
            .map(|el| el.text().collect::<String>())
            .unwrap_or_default();
        result.metadata.description = document
            .select(&meta_sel)
            .next()
            .and_then(|el| el.value().attr("content"))
            .unwrap_or("")
            .to_string();
        result.metadata.has_nav = document.select(&nav_sel).next().is_some();

        for anchor in document.select(&anchor_sel) {
            let href = match anchor.value().attr("href") {
                Some(h) => h,
                None => continue,
            };

            if href.is_empty()
                || href == "#"
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
            {
                continue;
            }

            let absolute = match base.join(href) {
                Ok(u) => u.to_string(),
                Err(_) => continue,
            };

            result.urls.push(absolute.clone());

            if url_tools::is_document(&absolute, doc_extensions) {
                result.documents.push(DocumentRecord {
                    extension: url_tools::extension_of(&absolute),
                    anchor_text: anchor.text().collect::<String>(),
                    context: anchor_context(&anchor),
                    url: absolute,
                });
            }
        }

        let html_kb = html.len() as f64 / 1024.0;
        if html_kb > 0.0 {
            result.metadata.link_density = result.urls.len() as f64 / html_kb;
        }

        self.finish(result, start)
    }

    fn finish(&self, mut result: SlowPathResult, start: Instant) -> SlowPathResult {
        result.processing_us = start.elapsed().as_micros() as u64;
        self.pages_processed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(result.processing_us, Ordering::Relaxed);
        self.links_extracted
            .fetch_add(result.urls.len() as u64, Ordering::Relaxed);
        self.docs_detected
            .fetch_add(result.documents.len() as u64, Ordering::Relaxed);
        result
    }

    pub fn stats(&self) -> SlowPathStats {
        let pages = self.pages_processed.load(Ordering::Relaxed);
        let total = self.total_latency_us.load(Ordering::Relaxed);
        SlowPathStats {
            pages,
            avg_latency_us: if pages > 0 { total / pages } else { 0 },
            links: self.links_extracted.load(Ordering::Relaxed),
            docs: self.docs_detected.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.pages_processed.store(0, Ordering::Relaxed);
        self.total_latency_us.store(0, Ordering::Relaxed);
        self.links_extracted.store(0, Ordering::Relaxed);
        self.docs_detected.store(0, Ordering::Relaxed);
    }
}

impl Default for SlowPathTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Surrounding context for a document link: the parent element's text,
/// truncated to 200 chars with an ellipsis.
fn anchor_context(anchor: &scraper::ElementRef<'_>) -> String {
    let parent = anchor
        .parent()
        .and_then(scraper::ElementRef::wrap);

    match parent {
        Some(el) => {
            let text: String = el.text().collect();
            let truncated = if text.chars().count() > CONTEXT_LIMIT {
                let head: String = text.chars().take(CONTEXT_LIMIT).collect();
                format!("{}...", head)
            } else {
                text
            };
            truncated.trim().to_string()
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/pubs/").unwrap()
    }

    fn exts() -> Vec<String> {
        vec![".pdf".to_string()]
    }

    #[test]
    fn test_metadata_extraction() {
        let html = r#"<html><head><title>Library</title>
            <meta name="description" content="Paper archive"></head>
            <body><nav><a href="/home">home</a></nav></body></html>"#;
        let result = SlowPathTokenizer::new().analyze(html.as_bytes(), &base(), &exts());
        assert_eq!(result.metadata.title, "Library");
        assert_eq!(result.metadata.description, "Paper archive");
        assert!(result.metadata.has_nav);
    }

    #[test]
    fn test_missing_metadata_is_empty() {
        let html = "<html><body><p>bare</p></body></html>";
        let result = SlowPathTokenizer::new().analyze(html.as_bytes(), &base(), &exts());
        assert_eq!(result.metadata.title, "");
        assert_eq!(result.metadata.description, "");
        assert!(!result.metadata.has_nav);
    }

    #[test]
    fn test_anchor_resolution_against_base() {
        let html = r#"<a href="paper1.html">one</a><a href="/top">two</a>"#;
        let result = SlowPathTokenizer::new().analyze(html.as_bytes(), &base(), &exts());
        assert_eq!(
            result.urls,
            vec![
                "https://example.com/pubs/paper1.html",
                "https://example.com/top"
            ]
        );
    }

    #[test]
    fn test_rfc_resolution_collapses_dotdot() {
        let html = r#"<a href="../other/page.html">up</a>"#;
        let result = SlowPathTokenizer::new().analyze(html.as_bytes(), &base(), &exts());
        assert_eq!(result.urls, vec!["https://example.com/other/page.html"]);
    }

    #[test]
    fn test_skips_fragment_javascript_mailto() {
        let html = r##"<a href="#">a</a><a href="javascript:f()">b</a>
            <a href="mailto:x@y.z">c</a><a href="">d</a><a href="/keep">e</a>"##;
        let result = SlowPathTokenizer::new().analyze(html.as_bytes(), &base(), &exts());
        assert_eq!(result.urls, vec!["https://example.com/keep"]);
    }

    #[test]
    fn test_document_record_fields() {
        let html = r#"<div>Annual results are published here:
            <a href="/reports/annual2025.pdf?v=3">2025 report</a></div>"#;
        let result = SlowPathTokenizer::new().analyze(html.as_bytes(), &base(), &exts());
        assert_eq!(result.documents.len(), 1);
        let doc = &result.documents[0];
        assert_eq!(doc.url, "https://example.com/reports/annual2025.pdf?v=3");
        assert_eq!(doc.extension, ".pdf");
        assert_eq!(doc.anchor_text, "2025 report");
        assert!(doc.context.contains("Annual results"));
    }

    #[test]
    fn test_context_truncated_with_ellipsis() {
        let filler = "word ".repeat(100);
        let html = format!(r#"<p>{}<a href="/x.pdf">doc</a></p>"#, filler);
        let result = SlowPathTokenizer::new().analyze(html.as_bytes(), &base(), &exts());
        let context = &result.documents[0].context;
        assert!(context.ends_with("..."));
        assert!(context.chars().count() <= CONTEXT_LIMIT + 3);
    }

    #[test]
    fn test_link_density() {
        let html = format!("<body>{}{}</body>", "<a href=\"/a\">x</a>".repeat(10), " ".repeat(1000));
        let result = SlowPathTokenizer::new().analyze(html.as_bytes(), &base(), &exts());
        let expected = 10.0 / (html.len() as f64 / 1024.0);
        assert!((result.metadata.link_density - expected).abs() < 1e-9);
    }

    #[test]
    fn test_empty_body_records_sample() {
        let tokenizer = SlowPathTokenizer::new();
        let result = tokenizer.analyze(b"", &base(), &exts());
        assert!(result.urls.is_empty());
        assert!(result.documents.is_empty());
        assert_eq!(tokenizer.stats().pages, 1);
    }

    #[test]
    fn test_invalid_utf8_degrades_to_empty() {
        let tokenizer = SlowPathTokenizer::new();
        let result = tokenizer.analyze(&[0xff, 0xfe, 0x00, 0x9f], &base(), &exts());
        assert!(result.urls.is_empty());
        assert_eq!(tokenizer.stats().pages, 1);
    }

    #[test]
    fn test_counters() {
        let tokenizer = SlowPathTokenizer::new();
        tokenizer.analyze(
            br#"<a href="/a.pdf">a</a><a href="/b.html">b</a>"#,
            &base(),
            &exts(),
        );
        let stats = tokenizer.stats();
        assert_eq!(stats.pages, 1);
        assert_eq!(stats.links, 2);
        assert_eq!(stats.docs, 1);
    }
}
