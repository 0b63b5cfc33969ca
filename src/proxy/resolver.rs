//! Host resolution with a per-run cache
//!
//! [`CachingResolver`] is the boundary the enricher talks to: it short-circuits
//! IP literals, remembers every outcome by host, and falls back to the host
//! string itself when resolution fails.

use crate::proxy::cache::AsyncCache;
use crate::Result;
use async_trait::async_trait;
use hickory_resolver::config::ResolverOpts;
use hickory_resolver::TokioResolver;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default timeout for a single DNS lookup in seconds
pub const DEFAULT_DNS_TIMEOUT_SECS: u64 = 15;

/// Reasons a host could not be resolved
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("DNS lookup for {host} timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },

    #[error("DNS lookup for {host} failed: {reason}")]
    Lookup { host: String, reason: String },

    #[error("no addresses found for {0}")]
    NoAddress(String),
}

/// Something that can turn a hostname into an IP address
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn lookup(&self, host: &str) -> std::result::Result<IpAddr, ResolveError>;
}

/// DNS resolver backed by hickory using the system configuration
pub struct DnsResolver {
    resolver: TokioResolver,
    timeout: Duration,
}

impl DnsResolver {
    /// Create a resolver that makes one attempt per lookup, bounded by `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;

        let resolver = TokioResolver::builder_tokio()?.with_options(opts).build();
        Ok(Self { resolver, timeout })
    }
}

#[async_trait]
impl HostResolver for DnsResolver {
    async fn lookup(&self, host: &str) -> std::result::Result<IpAddr, ResolveError> {
        let response = tokio::time::timeout(self.timeout, self.resolver.lookup_ip(host))
            .await
            .map_err(|_| ResolveError::Timeout {
                host: host.to_string(),
                timeout: self.timeout,
            })?
            .map_err(|e| ResolveError::Lookup {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        response
            .iter()
            .next()
            .ok_or_else(|| ResolveError::NoAddress(host.to_string()))
    }
}

/// Resolver front-end that remembers every outcome for the run
pub struct CachingResolver {
    resolver: Arc<dyn HostResolver>,
    cache: AsyncCache<String, std::result::Result<IpAddr, ResolveError>>,
}

impl CachingResolver {
    pub fn new(resolver: Arc<dyn HostResolver>) -> Self {
        Self {
            resolver,
            cache: AsyncCache::new(),
        }
    }

    /// Resolve a host, reporting whether the lookup succeeded
    ///
    /// IP literals are returned as-is without touching the cache. Failures
    /// are cached too, so a dead host is only looked up once per run.
    pub async fn try_resolve(&self, host: &str) -> std::result::Result<IpAddr, ResolveError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }

        self.cache
            .get_or_insert_with(host.to_string(), || async {
                let outcome = self.resolver.lookup(host).await;
                if let Err(e) = &outcome {
                    debug!("Falling back to unresolved host: {}", e);
                }
                outcome
            })
            .await
    }

    /// Resolve a host to an IP string, or return the host itself on failure
    pub async fn resolve(&self, host: &str) -> String {
        match self.try_resolve(host).await {
            Ok(ip) => ip.to_string(),
            Err(_) => host.to_string(),
        }
    }

    /// Number of distinct hosts looked up so far
    pub fn cached_hosts(&self) -> usize {
        self.cache.len()
    }
}
