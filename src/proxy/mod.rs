//! Proxy link module for harvesting and enriching connection links
//!
//! This module provides functionality for:
//! - Crawling text sources and extracting connection links
//! - Classifying links by protocol and filtering blocked protocols
//! - Resolving hosts and looking up their country, with per-run caches
//! - Rewriting links with the resolved IP, a fixed port and a flag tag
//! - Writing the enriched links grouped by protocol

pub mod cache;
pub mod crawler;
pub mod enricher;
pub mod executor;
pub mod geo;
pub mod harvest;
pub mod models;
pub mod output;
pub mod parser;
pub mod resolver;
pub mod rewriter;
pub mod tag;

pub use cache::AsyncCache;
pub use crawler::{CrawlResult, CrawlerConfig, LinkSource, SourceCrawler};
pub use enricher::{EnricherConfig, LinkEnricher};
pub use executor::map_bounded;
pub use geo::{GeoCache, GeoError, GeoHttpConfig, GeoLookup, HttpGeoLocator, MmdbGeoLocator};
pub use harvest::{HarvestSummary, Harvester};
pub use models::{BlockList, LinkSet, Protocol};
pub use output::{group_by_protocol, OutputConfig, OutputSummary, OutputWriter};
pub use parser::LinkParser;
pub use resolver::{CachingResolver, DnsResolver, HostResolver, ResolveError};
pub use rewriter::{
    rewrite_encoded_authority, rewrite_link, rewrite_payload, rewrite_uri, EncodedAuthority,
    RewriteError,
};
pub use tag::{flag_glyph, TagBuilder};
