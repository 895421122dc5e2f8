//! Proxy crawler module for fetching proxy lists over HTTP
//!
//! This module provides functionality for:
//! - Fetching plain-text or HTML proxy listings
//! - Extracting `host:port` entries line by line or by pattern matching
//! - Exposing each listing as a [`SourceAdapter`]

use crate::error::{Error, Result};
use crate::proxy::models::{Protocol, ProxyRecord, RawProxyTuple};
use crate::proxy::parser::ProxyParser;
use crate::proxy::source::SourceAdapter;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::debug;

/// Default timeout for HTTP requests in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default user agent for HTTP requests
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Matches IP:PORT in free text
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})\b")
        .expect("Invalid IP:PORT regex")
});

/// Matches an address cell directly followed by a port cell in an HTML table
static TABLE_CELL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<td[^>]*>\s*(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})\s*</td>\s*<td[^>]*>\s*(\d{1,5})\s*</td>")
        .expect("Invalid table cell regex")
});

/// Configuration for proxy crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
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
}

/// A website or endpoint that publishes a proxy list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySource {
    /// Name of the proxy source
    pub name: String,
    /// URL to fetch proxies from
    pub url: String,
    /// Protocol of the listed proxies
    pub protocol: Protocol,
    /// Whether the listed SOCKS proxies resolve hostnames remotely
    pub remote_dns: bool,
}

impl ProxySource {
    pub fn new(name: &str, url: &str, protocol: Protocol) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            protocol,
            remote_dns: false,
        }
    }

    pub fn with_remote_dns(mut self) -> Self {
        self.remote_dns = true;
        self
    }
}

/// Proxy crawler for fetching proxies from websites
#[derive(Debug, Clone)]
pub struct ProxyCrawler {
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

        Ok(Self { client })
    }

    /// Fetch and parse proxies from a single URL
    pub async fn crawl_url(&self, url: &str, protocol: Protocol) -> Result<Vec<ProxyRecord>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let content = response.text().await?;
        Ok(Self::parse_proxies_from_text(&content, protocol))
    }

    /// Wrap a listing as a source adapter sharing this crawler's HTTP client
    pub fn adapter(&self, source: ProxySource) -> ListSource {
        ListSource {
            crawler: self.clone(),
            source,
        }
    }

    /// Parse proxies from raw text content
    ///
    /// Line-by-line parsing is tried first. When it finds nothing the
    /// content is treated as markup and scanned for addresses. Duplicates
    /// are dropped keeping the first occurrence.
    pub fn parse_proxies_from_text(content: &str, protocol: Protocol) -> Vec<ProxyRecord> {
        let mut proxies = ProxyParser::parse_string(content, protocol);

        if proxies.is_empty() {
            proxies = Self::extract_proxies_with_regex(content, protocol);
        }

        let mut seen = HashSet::new();
        proxies.retain(|p| seen.insert(p.address_key()));
        proxies
    }

    /// Extract proxies using pattern matching on free text and table cells
    fn extract_proxies_with_regex(content: &str, protocol: Protocol) -> Vec<ProxyRecord> {
        IP_PORT_REGEX
            .captures_iter(content)
            .chain(TABLE_CELL_REGEX.captures_iter(content))
            .filter_map(|cap| {
                let host = cap.get(1)?.as_str();
                host.parse::<Ipv4Addr>().ok()?;
                let port: u16 = cap.get(2)?.as_str().parse().ok()?;
                if port == 0 {
                    return None;
                }
                Some(ProxyRecord::new(host, port, protocol))
            })
            .collect()
    }

    /// Get a list of common free proxy sources
    pub fn get_common_sources() -> Vec<ProxySource> {
        vec![
            ProxySource::new("free-proxy-list.net", "https://free-proxy-list.net/", Protocol::Http),
            ProxySource::new("sslproxies", "https://www.sslproxies.org/", Protocol::Https),
            ProxySource::new("us-proxy.org", "https://www.us-proxy.org/", Protocol::Http),
            ProxySource::new(
                "proxyscrape-socks4",
                "https://api.proxyscrape.com/?request=getproxies&proxytype=socks4",
                Protocol::Socks4,
            )
            .with_remote_dns(),
            ProxySource::new(
                "proxyscrape-socks5",
                "https://api.proxyscrape.com/?request=getproxies&proxytype=socks5",
                Protocol::Socks5,
            )
            .with_remote_dns(),
        ]
    }
}

/// One remote listing exposed as a [`SourceAdapter`]
#[derive(Debug, Clone)]
pub struct ListSource {
    crawler: ProxyCrawler,
    source: ProxySource,
}

impl ListSource {
    pub fn source(&self) -> &ProxySource {
        &self.source
    }
}

#[async_trait]
impl SourceAdapter for ListSource {
    fn name(&self) -> &str {
        &self.source.name
    }

    async fn fetch(&self) -> Result<Vec<RawProxyTuple>> {
        let proxies = self
            .crawler
            .crawl_url(&self.source.url, self.source.protocol)
            .await
            .map_err(|e| Error::source_failure(&self.source.name, e))?;

        debug!(source = %self.source.name, count = proxies.len(), "crawled proxy listing");

        Ok(proxies
            .iter()
            .map(|p| RawProxyTuple::from(p).with_remote_dns(self.source.remote_dns))
            .collect())
    }
}
