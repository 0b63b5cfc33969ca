//! Source crawler module for fetching raw link text from remote sources
//!
//! This module provides functionality for:
//! - Fetching subscription/source text over HTTP
//! - Extracting connection links from each source
//! - Merging every source into one deduplicated link set
//!
//! A source that cannot be fetched contributes no links; it never fails the run.

use crate::proxy::models::LinkSet;
use crate::proxy::parser::LinkParser;
use crate::Result;
use anyhow::anyhow;
use futures::future::join_all;
use reqwest::Client;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Result of crawling a single source
#[derive(Debug, Clone)]
pub struct CrawlResult {
    /// The source that was crawled
    pub source: String,
    /// Links extracted from the source, duplicates included
    pub links: Vec<String>,
    /// Error message if fetching failed
    pub error: Option<String>,
}

impl CrawlResult {
    /// Create a successful crawl result
    pub fn success(source: String, links: Vec<String>) -> Self {
        Self {
            source,
            links,
            error: None,
        }
    }

    /// Create a failed crawl result
    pub fn failure(source: String, error: String) -> Self {
        Self {
            source,
            links: Vec::new(),
            error: Some(error),
        }
    }

    /// Check if the crawl was successful
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Configuration for the source crawler
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

/// A remote text document that publishes connection links
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSource {
    /// Name shown in progress output
    pub name: String,
    /// URL to fetch links from
    pub url: String,
}

impl LinkSource {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    /// Use the URL itself as the source name
    pub fn from_url(url: &str) -> Self {
        Self::new(url, url)
    }

    /// Parse a source list: one URL per line, blank lines and `#` comments skipped
    pub fn parse_list(content: &str) -> Vec<LinkSource> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(Self::from_url)
            .collect()
    }

    /// Read a source list from a file
    pub fn load_list<P: AsRef<Path>>(path: P) -> Result<Vec<LinkSource>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_list(&content))
    }
}

/// Crawler fetching link sources over HTTP
pub struct SourceCrawler {
    client: Client,
}

impl SourceCrawler {
    /// Create a new crawler with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(CrawlerConfig::default())
    }

    /// Create a new crawler with custom configuration
    pub fn with_config(config: CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { client })
    }

    /// Fetch the raw text of a URL, failing on transport errors or non-2xx
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("HTTP status: {}", status));
        }
        Ok(response.text().await?)
    }

    /// Fetch a source and extract its links
    ///
    /// A failed fetch yields a result with no links and the error recorded.
    pub async fn crawl_source(&self, source: &LinkSource) -> CrawlResult {
        match self.fetch_text(&source.url).await {
            Ok(text) => CrawlResult::success(source.name.clone(), LinkParser::extract_links(&text)),
            Err(e) => CrawlResult::failure(source.name.clone(), e.to_string()),
        }
    }

    /// Fetch every source concurrently, returning results in source order
    pub async fn crawl_sources(&self, sources: &[LinkSource]) -> Vec<CrawlResult> {
        let results = join_all(sources.iter().map(|source| self.crawl_source(source))).await;

        for result in &results {
            match &result.error {
                None => info!("Found {} links from {}", result.links.len(), result.source),
                Some(error) => warn!("Error crawling {}: {}", result.source, error),
            }
        }

        results
    }

    /// Merge crawl results into one deduplicated link set
    pub fn collect_links(results: &[CrawlResult]) -> LinkSet {
        results
            .iter()
            .flat_map(|result| result.links.iter().cloned())
            .collect()
    }
}
