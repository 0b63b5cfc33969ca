//! Geolocation module for finding the country of a resolved IP
//!
//! Two backends are available: an HTTP geolocation service (default) and a
//! local MaxMind City database. [`GeoCache`] sits in front of either one and
//! collapses every failure to the `UN` sentinel.

use crate::proxy::cache::AsyncCache;
use crate::Result;
use async_trait::async_trait;
use maxminddb::{geoip2, Reader};
use reqwest::Client;
use serde_json::Value;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Country code used when the country cannot be determined
pub const UNKNOWN_COUNTRY: &str = "UN";

/// Default geolocation endpoint, `{ip}` is replaced with the address
const DEFAULT_GEO_ENDPOINT: &str = "http://ip-api.com/json/{ip}?fields=countryCode";

/// Default JSON field carrying the country code
const DEFAULT_COUNTRY_FIELD: &str = "countryCode";

/// Default timeout for geolocation requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Reasons a country lookup failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeoError {
    #[error("geo request failed: {0}")]
    Request(String),

    #[error("geo request timed out")]
    Timeout,

    #[error("geo service returned HTTP {0}")]
    Status(u16),

    #[error("invalid geo response: {0}")]
    InvalidBody(String),

    #[error("no country code for {0}")]
    MissingCountry(String),

    #[error("invalid IP address: {0}")]
    InvalidIp(String),

    #[error("geo database error: {0}")]
    Database(String),
}

/// Something that can find the country code of an IP address
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn country_code(&self, ip: &str) -> std::result::Result<String, GeoError>;
}

/// Uppercase a raw country code, rejecting blanks
fn normalize_country(ip: &str, raw: Option<&str>) -> std::result::Result<String, GeoError> {
    match raw.map(str::trim) {
        Some(code) if !code.is_empty() => Ok(code.to_ascii_uppercase()),
        _ => Err(GeoError::MissingCountry(ip.to_string())),
    }
}

/// Configuration for the HTTP geolocation backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoHttpConfig {
    /// Endpoint template, `{ip}` is replaced with the address
    pub endpoint: String,
    /// JSON field holding the country code
    pub country_field: String,
    /// Timeout for each request
    pub timeout: Duration,
}

impl Default for GeoHttpConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_GEO_ENDPOINT.to_string(),
            country_field: DEFAULT_COUNTRY_FIELD.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl GeoHttpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_country_field(mut self, field: String) -> Self {
        self.country_field = field;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Geolocation through an HTTP JSON service
pub struct HttpGeoLocator {
    config: GeoHttpConfig,
    client: Client,
}

impl HttpGeoLocator {
    pub fn with_config(config: GeoHttpConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn url_for(&self, ip: &str) -> String {
        self.config.endpoint.replace("{ip}", ip)
    }
}

#[async_trait]
impl GeoLookup for HttpGeoLocator {
    async fn country_code(&self, ip: &str) -> std::result::Result<String, GeoError> {
        let response = self
            .client
            .get(self.url_for(ip))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeoError::Timeout
                } else {
                    GeoError::Request(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(GeoError::Status(response.status().as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GeoError::InvalidBody(e.to_string()))?;

        normalize_country(
            ip,
            body.get(&self.config.country_field).and_then(Value::as_str),
        )
    }
}

/// Geolocation through a local MaxMind City database
pub struct MmdbGeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl MmdbGeoLocator {
    /// Create a new locator from an MMDB file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    fn lookup_ip(&self, ip: IpAddr) -> std::result::Result<Option<String>, GeoError> {
        let lookup_result = self
            .reader
            .lookup(ip)
            .map_err(|e| GeoError::Database(e.to_string()))?;

        let city: Option<geoip2::City> = lookup_result
            .decode()
            .map_err(|e| GeoError::Database(e.to_string()))?;

        Ok(city.and_then(|city| city.country.iso_code.map(String::from)))
    }
}

impl Clone for MmdbGeoLocator {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}

#[async_trait]
impl GeoLookup for MmdbGeoLocator {
    async fn country_code(&self, ip: &str) -> std::result::Result<String, GeoError> {
        let addr: IpAddr = ip
            .parse()
            .map_err(|_| GeoError::InvalidIp(ip.to_string()))?;
        let code = self.lookup_ip(addr)?;
        normalize_country(ip, code.as_deref())
    }
}

/// Country lookup front-end that remembers every outcome for the run
pub struct GeoCache {
    lookup: Arc<dyn GeoLookup>,
    cache: AsyncCache<String, std::result::Result<String, GeoError>>,
}

impl GeoCache {
    pub fn new(lookup: Arc<dyn GeoLookup>) -> Self {
        Self {
            lookup,
            cache: AsyncCache::new(),
        }
    }

    /// Look up the country of an IP, reporting failures
    ///
    /// Failures are cached, so a persistently failing IP is not retried.
    pub async fn try_country_of(&self, ip: &str) -> std::result::Result<String, GeoError> {
        self.cache
            .get_or_insert_with(ip.to_string(), || async {
                let outcome = self.lookup.country_code(ip).await;
                if let Err(e) = &outcome {
                    debug!("Country lookup for {} failed: {}", ip, e);
                }
                outcome
            })
            .await
    }

    /// Look up the country of an IP, or `UN` on failure
    pub async fn country_of(&self, ip: &str) -> String {
        self.try_country_of(ip)
            .await
            .unwrap_or_else(|_| UNKNOWN_COUNTRY.to_string())
    }

    /// Number of distinct IPs looked up so far
    pub fn cached_ips(&self) -> usize {
        self.cache.len()
    }
}
