//! Link Harvest - Proxy Link Harvester
//!
//! Collects proxy/VPN connection links from remote text sources, resolves
//! their hosts, tags them with a country flag and rewrites them, then writes
//! the results grouped by protocol.

pub mod proxy;

pub use proxy::*;

use std::path::PathBuf;

/// Application result type
pub type Result<T> = anyhow::Result<T>;

/// Where country codes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoBackend {
    /// Query an HTTP geolocation service
    Http(GeoHttpConfig),
    /// Read a local MaxMind City database
    Mmdb(PathBuf),
}

impl Default for GeoBackend {
    fn default() -> Self {
        GeoBackend::Http(GeoHttpConfig::default())
    }
}

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Sources to crawl for links
    pub sources: Vec<LinkSource>,
    /// Source fetching settings
    pub crawler: CrawlerConfig,
    /// Enrichment settings (workers, port, block-list, tag marker)
    pub enricher: EnricherConfig,
    /// Output layout
    pub output: OutputConfig,
    /// Country lookup backend
    pub geo: GeoBackend,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(mut self, sources: Vec<LinkSource>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_crawler(mut self, crawler: CrawlerConfig) -> Self {
        self.crawler = crawler;
        self
    }

    pub fn with_enricher(mut self, enricher: EnricherConfig) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn with_output(mut self, output: OutputConfig) -> Self {
        self.output = output;
        self
    }

    pub fn with_geo(mut self, geo: GeoBackend) -> Self {
        self.geo = geo;
        self
    }
}
