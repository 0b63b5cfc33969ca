//! Link enricher module: resolve, geo-tag and rewrite links concurrently

use crate::proxy::executor::map_bounded;
use crate::proxy::geo::{GeoCache, GeoLookup};
use crate::proxy::models::BlockList;
use crate::proxy::parser::LinkParser;
use crate::proxy::resolver::{CachingResolver, HostResolver, DEFAULT_DNS_TIMEOUT_SECS};
use crate::proxy::rewriter::rewrite_link;
use crate::proxy::tag::{TagBuilder, DEFAULT_MARKER};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Default number of concurrent enrichment workers
const DEFAULT_CONCURRENCY: usize = 20;

/// Default port written into rewritten links
const DEFAULT_PORT: u16 = 443;

/// Log progress every this many enriched links
const PROGRESS_INTERVAL: usize = 250;

/// Configuration for link enrichment
#[derive(Debug, Clone)]
pub struct EnricherConfig {
    /// Number of links enriched at once
    pub concurrency: usize,
    /// Port written into every rewritten link
    pub port: u16,
    /// Protocols left untouched and excluded from output
    pub blocked: BlockList,
    /// Channel marker placed in every tag
    pub marker: String,
    /// Timeout for each DNS lookup
    pub dns_timeout: Duration,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            port: DEFAULT_PORT,
            blocked: BlockList::default(),
            marker: DEFAULT_MARKER.to_string(),
            dns_timeout: Duration::from_secs(DEFAULT_DNS_TIMEOUT_SECS),
        }
    }
}

impl EnricherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_blocked(mut self, blocked: BlockList) -> Self {
        self.blocked = blocked;
        self
    }

    pub fn with_marker(mut self, marker: String) -> Self {
        self.marker = marker;
        self
    }

    pub fn with_dns_timeout(mut self, timeout: Duration) -> Self {
        self.dns_timeout = timeout;
        self
    }
}

/// Enriches links with a resolved IP, a fixed port and a geo tag
///
/// Holds the per-run resolution, country and tag caches; create one
/// enricher per run.
pub struct LinkEnricher {
    config: EnricherConfig,
    resolver: CachingResolver,
    tags: TagBuilder,
}

impl LinkEnricher {
    pub fn new(
        config: EnricherConfig,
        resolver: Arc<dyn HostResolver>,
        geo: Arc<dyn GeoLookup>,
    ) -> Self {
        let tags = TagBuilder::new(config.marker.clone(), GeoCache::new(geo));
        Self {
            config,
            resolver: CachingResolver::new(resolver),
            tags,
        }
    }

    pub fn config(&self) -> &EnricherConfig {
        &self.config
    }

    pub fn resolver(&self) -> &CachingResolver {
        &self.resolver
    }

    pub fn tags(&self) -> &TagBuilder {
        &self.tags
    }

    /// Whether a link belongs to a blocked protocol
    pub fn is_blocked(&self, link: &str) -> bool {
        self.config.blocked.is_blocked(&LinkParser::classify(link))
    }

    /// Enrich a single link
    ///
    /// Blocked protocols, links without a host and links that cannot be
    /// rewritten come back unchanged.
    pub async fn enrich(&self, link: &str) -> String {
        let protocol = LinkParser::classify(link);
        if self.config.blocked.is_blocked(&protocol) {
            return link.to_string();
        }

        let host = LinkParser::extract_host(link);
        if host.is_empty() {
            return link.to_string();
        }

        let ip = self.resolver.resolve(&host).await;
        let tag = self.tags.tag_for(&ip).await;
        rewrite_link(&protocol, link, &ip, self.config.port, &tag)
    }

    /// Enrich many links with bounded concurrency, keeping input order
    pub async fn enrich_all(&self, links: &[String]) -> Vec<String> {
        let start = Instant::now();
        let completed = AtomicUsize::new(0);
        let total = links.len();

        info!(
            "Enriching {} links with {} workers",
            total, self.config.concurrency
        );

        let completed_ref = &completed;
        let enriched = map_bounded(links, self.config.concurrency, |link| async move {
            let result = self.enrich(link).await;
            let done = completed_ref.fetch_add(1, Ordering::Relaxed) + 1;
            if done % PROGRESS_INTERVAL == 0 {
                info!("Enriched {}/{} links", done, total);
            }
            result
        })
        .await;

        let elapsed_secs = start.elapsed().as_secs_f64();
        info!(
            "Enriched {} links in {:.2} seconds ({} hosts resolved, {} tags built)",
            completed.load(Ordering::Relaxed),
            elapsed_secs,
            self.resolver.cached_hosts(),
            self.tags.cached_tags()
        );

        enriched
    }
}
