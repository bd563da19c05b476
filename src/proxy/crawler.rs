//! Proxy crawler module for fetching candidate lists from websites
//!
//! This module provides functionality for:
//! - Reading the list of source URLs
//! - Fetching each source and reducing HTML pages to their visible text
//! - Extracting `ip:port` tokens from that text

use crate::proxy::models::CandidateSet;
use crate::Result;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use scraper::Html;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Default pause between two sources
const DEFAULT_DELAY: (Duration, Duration) = (Duration::from_secs(1), Duration::from_secs(3));

/// `ip:port` with an optional `socks5://` prefix; anything after the port,
/// such as a `:US` country label, is left out of the match.
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:socks5://)?\b((?:\d{1,3}\.){3}\d{1,3}:\d{1,5})\b")
        .expect("Invalid IP:PORT regex")
});

/// Result of crawling a single source
#[derive(Debug, Clone)]
pub struct CrawlResult {
    /// The source that was crawled
    pub source: String,
    /// Raw `ip:port` tokens found in the source
    pub tokens: Vec<String>,
    /// Error message if crawling failed
    pub error: Option<String>,
}

impl CrawlResult {
    /// Create a successful crawl result
    pub fn success(source: String, tokens: Vec<String>) -> Self {
        Self {
            source,
            tokens,
            error: None,
        }
    }

    /// Create a failed crawl result
    pub fn failure(source: String, error: String) -> Self {
        Self {
            source,
            tokens: Vec::new(),
            error: Some(error),
        }
    }

    /// Check if the crawl was successful
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Configuration for proxy crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Random pause between sources, `(min, max)`
    pub delay: Option<(Duration, Duration)>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            delay: Some(DEFAULT_DELAY),
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_delay(mut self, min: Duration, max: Duration) -> Self {
        self.delay = Some((min, max));
        self
    }

    pub fn without_delay(mut self) -> Self {
        self.delay = None;
        self
    }
}

/// Proxy crawler for fetching candidates from websites
pub struct ProxyCrawler {
    config: CrawlerConfig,
    client: Client,
}

impl ProxyCrawler {
    /// Create a new proxy crawler with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(CrawlerConfig::default())
    }

    /// Create a new proxy crawler with custom configuration
    pub fn with_config(config: CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { config, client })
    }

    /// Read source URLs from a file, one per line
    ///
    /// Blank lines and `#` comments are skipped; order is preserved.
    pub fn read_url_list<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
        let content = fs::read_to_string(path)?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(String::from)
            .collect())
    }

    /// Prefix `https://` to URLs given without a scheme
    pub fn normalize_url(url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{url}")
        }
    }

    /// Fetch a single URL and extract raw `ip:port` tokens from it
    pub async fn crawl_url(&self, url: &str) -> Result<Vec<String>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/html"));
        let body = response.text().await?;

        let text = if is_html { html_text(&body) } else { body };
        Ok(extract_tokens(&text))
    }

    /// Crawl every URL in order, pausing between sources.
    ///
    /// A failing source is reported in its `CrawlResult` and never stops
    /// the others. The returned set holds every valid candidate found.
    pub async fn crawl_all(&self, urls: &[String]) -> (CandidateSet, Vec<CrawlResult>) {
        let mut candidates = CandidateSet::new();
        let mut results = Vec::with_capacity(urls.len());

        for (i, url) in urls.iter().enumerate() {
            let url = Self::normalize_url(url);
            info!(source = %url, "crawling {}/{}", i + 1, urls.len());

            let result = match self.crawl_url(&url).await {
                Ok(tokens) => {
                    info!(source = %url, found = tokens.len(), "source crawled");
                    candidates.extend(CandidateSet::from_tokens(&tokens));
                    CrawlResult::success(url, tokens)
                }
                Err(e) => {
                    warn!(source = %url, error = %e, "source failed");
                    CrawlResult::failure(url, e.to_string())
                }
            };
            results.push(result);

            if i + 1 < urls.len() {
                if let Some((min, max)) = self.config.delay {
                    tokio::time::sleep(jitter(min, max)).await;
                }
            }
        }

        (candidates, results)
    }
}

/// Extract raw `ip:port` tokens, deduplicated, in order of first appearance.
///
/// Tokens are not validated here; out-of-range octets or ports are left for
/// [`CandidateSet`] construction to reject.
pub fn extract_tokens(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for cap in IP_PORT_REGEX.captures_iter(text) {
        let token = &cap[1];
        if !tokens.iter().any(|t| t == token) {
            tokens.push(token.to_string());
        }
    }
    tokens
}

/// Visible text of an HTML document, one text node per line.
///
/// Script and style contents are not page text and are left out.
fn html_text(body: &str) -> String {
    let document = Html::parse_document(body);
    let texts: Vec<&str> = document
        .root_element()
        .descendants()
        .filter(|node| {
            !node.ancestors().any(|parent| {
                parent
                    .value()
                    .as_element()
                    .is_some_and(|e| matches!(e.name(), "script" | "style"))
            })
        })
        .filter_map(|node| node.value().as_text().map(|text| &**text))
        .collect();
    texts.join("\n")
}

fn jitter(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let secs = rand::rng().random_range(min.as_secs_f64()..max.as_secs_f64());
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawler_config_default() {
        let config = CrawlerConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.delay, Some(DEFAULT_DELAY));
    }

    #[test]
    fn test_crawler_config_builder() {
        let config = CrawlerConfig::new()
            .with_timeout(Duration::from_secs(60))
            .with_user_agent("Custom Agent".to_string())
            .without_delay();

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.user_agent, "Custom Agent");
        assert!(config.delay.is_none());
    }

    #[test]
    fn test_crawl_result() {
        let ok = CrawlResult::success("src".to_string(), vec!["1.2.3.4:1080".to_string()]);
        assert!(ok.is_success());
        assert_eq!(ok.tokens.len(), 1);

        let failed = CrawlResult::failure("src".to_string(), "Connection failed".to_string());
        assert!(!failed.is_success());
        assert!(failed.tokens.is_empty());
        assert_eq!(failed.error, Some("Connection failed".to_string()));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(ProxyCrawler::normalize_url("example.com/list"), "https://example.com/list");
        assert_eq!(ProxyCrawler::normalize_url("http://example.com"), "http://example.com");
        assert_eq!(ProxyCrawler::normalize_url("https://example.com"), "https://example.com");
    }

    #[test]
    fn test_read_url_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("socks5list.txt");
        fs::write(&path, "https://a.example/list\n\n  b.example/socks5  \n# disabled\n").unwrap();

        let urls = ProxyCrawler::read_url_list(&path).unwrap();
        assert_eq!(urls, vec!["https://a.example/list", "b.example/socks5"]);
    }

    #[test]
    fn test_read_missing_url_list() {
        assert!(ProxyCrawler::read_url_list("/definitely/not/here.txt").is_err());
    }

    #[test]
    fn test_extract_tokens() {
        let text = "Here is a proxy: 192.168.1.1:1080 and another one 10.0.0.1:3128.";
        assert_eq!(extract_tokens(text), vec!["192.168.1.1:1080", "10.0.0.1:3128"]);
    }

    #[test]
    fn test_extract_tokens_scheme_and_label() {
        let text = "socks5://1.2.3.4:1080\n5.6.7.8:9050:US\n1.2.3.4:1080";
        assert_eq!(extract_tokens(text), vec!["1.2.3.4:1080", "5.6.7.8:9050"]);
    }

    #[test]
    fn test_extract_tokens_leaves_validation_to_candidate_set() {
        let tokens = extract_tokens("999.999.999.999:8080 1.1.1.1:0 2.2.2.2:1080");
        assert_eq!(tokens.len(), 3);
        assert_eq!(CandidateSet::from_tokens(&tokens).len(), 1);
    }

    #[test]
    fn test_extract_tokens_ignores_overlong_ports() {
        assert!(extract_tokens("1.2.3.4:123456").is_empty());
    }

    #[test]
    fn test_html_text() {
        let body = r#"<html><body><table>
<tr><td>10.0.0.1:3128</td><td>US</td></tr>
</table><script>var x = 1;</script></body></html>"#;
        let text = html_text(body);
        assert_eq!(extract_tokens(&text), vec!["10.0.0.1:3128"]);
    }

    #[test]
    fn test_html_text_skips_script_and_style() {
        let body = r#"<html><head><style>.x { background: url(1.2.3.4:80); }</style></head>
<body><p>10.0.0.2:1080</p>
<script>var ping = "5.6.7.8:443";</script></body></html>"#;
        let text = html_text(body);
        assert!(!text.contains("var ping"));
        assert_eq!(extract_tokens(&text), vec!["10.0.0.2:1080"]);
    }

    #[test]
    fn test_jitter_bounds() {
        let d = jitter(Duration::from_millis(10), Duration::from_millis(20));
        assert!(d >= Duration::from_millis(10) && d < Duration::from_millis(20));
        assert_eq!(jitter(Duration::from_secs(1), Duration::from_secs(1)), Duration::from_secs(1));
    }
}
