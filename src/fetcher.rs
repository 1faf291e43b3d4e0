//! Crawl-side page fetching: politeness delay, user-agent rotation, referer
//! propagation, and the hard body-size cap that protects the tokenizer.

use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::netiface::NetworkInterface;

/// Rotated per request on top of the collector's base user agent.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.5 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:114.0) Gecko/20100101 Firefox/114.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:114.0) Gecko/20100101 Firefox/114.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_4) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0 Safari/537.36",
];

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timeout")]
    Timeout,

    #[error("DNS resolution failed")]
    Dns,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("TLS error")]
    Tls,

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("content too large: {0} bytes (max: {1})")]
    ContentTooLarge(usize, usize),

    #[error("HTTP {0}")]
    HttpStatus(u16),
}

impl FetchError {
    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return FetchError::Timeout;
        }

        let msg = error.to_string().to_lowercase();
        if error.is_connect() {
            if msg.contains("connection refused") {
                return FetchError::ConnectionRefused;
            }
            if msg.contains("dns") || msg.contains("name resolution") || msg.contains("no such host")
            {
                return FetchError::Dns;
            }
        }
        if msg.contains("certificate") || msg.contains("ssl") || msg.contains("tls") {
            return FetchError::Tls;
        }

        FetchError::Network(error.to_string())
    }
}

/// A successfully fetched page ready for tokenization.
#[derive(Debug)]
pub struct PageResponse {
    pub body: Vec<u8>,
    pub status: u16,
}

/// Page fetcher shared by the orchestrator's fetch tasks. Parallelism is
/// bounded by a semaphore; each request waits the polite delay plus jitter
/// and round-robins across the interface-bound client pools.
pub struct PageFetcher {
    interfaces: Arc<Vec<NetworkInterface>>,
    permits: Arc<Semaphore>,
    client_cursor: AtomicUsize,
    max_body_size: usize,
}

impl PageFetcher {
    pub fn new(interfaces: Arc<Vec<NetworkInterface>>) -> Self {
        Self {
            interfaces,
            permits: Arc::new(Semaphore::new(Config::CONCURRENT_WORKERS)),
            client_cursor: AtomicUsize::new(0),
            max_body_size: Config::MAX_BODY_SIZE,
        }
    }

    /// Fetch one page. Applies politeness, picks the next bound client, and
    /// enforces the body cap both from the Content-Length header and after
    /// buffering.
    pub async fn fetch(&self, url: &str, referer: Option<&str>) -> Result<PageResponse, FetchError> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Network("fetcher closed".to_string()))?;

        let jitter = rand::thread_rng().gen_range(0..=Config::POLITE_JITTER_MS);
        tokio::time::sleep(Config::POLITE_DELAY + std::time::Duration::from_millis(jitter)).await;

        let client = self.next_client();
        let user_agent = USER_AGENTS[rand::thread_rng().gen_range(0..USER_AGENTS.len())];

        let mut request = client
            .get(url)
            .header("User-Agent", user_agent)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.5");

        if let Some(referer) = referer {
            request = request.header("Referer", referer);
        }

        let response = request.send().await.map_err(FetchError::from_reqwest)?;

        if let Some(length) = response.content_length() {
            if length as usize > self.max_body_size {
                return Err(FetchError::ContentTooLarge(length as usize, self.max_body_size));
            }
        }

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(status));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;

        if body.len() > self.max_body_size {
            return Err(FetchError::ContentTooLarge(body.len(), self.max_body_size));
        }

        Ok(PageResponse {
            body: body.to_vec(),
            status,
        })
    }

    /// Round-robin across every client of every interface.
    fn next_client(&self) -> reqwest::Client {
        let total: usize = self.interfaces.iter().map(|i| i.clients.len()).sum();
        let mut index = self.client_cursor.fetch_add(1, Ordering::Relaxed) % total.max(1);

        for iface in self.interfaces.iter() {
            if index < iface.clients.len() {
                return iface.clients[index].clone();
            }
            index -= iface.clients.len();
        }

        // Unreachable while any interface holds clients; startup guarantees it.
        self.interfaces[0].clients[0].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netiface;

    fn loopback_interfaces(count: usize, clients: usize) -> Arc<Vec<NetworkInterface>> {
        let specs: Vec<String> = (0..count)
            .map(|i| format!("test{}=127.0.0.1@1g", i))
            .collect();
        Arc::new(netiface::configure_interfaces(&specs, clients, "test-agent").unwrap())
    }

    #[tokio::test]
    async fn test_round_robin_covers_all_clients() {
        let fetcher = PageFetcher::new(loopback_interfaces(2, 3));
        // Six draws must cycle the cursor across both interfaces without panicking.
        for _ in 0..6 {
            let _ = fetcher.next_client();
        }
        assert_eq!(fetcher.client_cursor.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(FetchError::HttpStatus(500).to_string(), "HTTP 500");
        let err = FetchError::ContentTooLarge(6 * 1024 * 1024, Config::MAX_BODY_SIZE);
        assert!(err.to_string().contains("too large"));
    }
}
