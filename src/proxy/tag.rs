//! Display tags built from a country flag, a channel marker and a number

use crate::proxy::cache::AsyncCache;
use crate::proxy::geo::{GeoCache, UNKNOWN_COUNTRY};
use rand::Rng;
use std::ops::Range;

/// Code point of REGIONAL INDICATOR SYMBOL LETTER A
const REGIONAL_INDICATOR_A: u32 = 0x1F1E6;

/// Glyph used when no country flag can be rendered
pub const NEUTRAL_FLAG: &str = "\u{1F3F3}\u{FE0F}";

/// Default channel marker placed between the flag and the number
pub const DEFAULT_MARKER: &str = "@linkharvest";

/// Range the disambiguating number is drawn from
pub const TAG_NUMBER_RANGE: Range<u32> = 100_000..999_999;

/// Render the flag for a two-letter country code
///
/// Anything that is not exactly two ASCII letters, and the `UN` sentinel,
/// renders as [`NEUTRAL_FLAG`].
pub fn flag_glyph(code: &str) -> String {
    let code = code.trim();
    if code.len() != 2
        || !code.bytes().all(|b| b.is_ascii_alphabetic())
        || code.eq_ignore_ascii_case(UNKNOWN_COUNTRY)
    {
        return NEUTRAL_FLAG.to_string();
    }

    code.bytes()
        .map(|b| char::from_u32(REGIONAL_INDICATOR_A + u32::from(b.to_ascii_uppercase() - b'A')))
        .collect::<Option<String>>()
        .unwrap_or_else(|| NEUTRAL_FLAG.to_string())
}

/// Compose a tag from its parts
pub fn render_tag(country: &str, marker: &str, number: u32) -> String {
    format!("{} {} {}", flag_glyph(country), marker, number)
}

/// Builds one tag per IP and reuses it for every link sharing that IP
pub struct TagBuilder {
    marker: String,
    geo: GeoCache,
    cache: AsyncCache<String, String>,
}

impl TagBuilder {
    pub fn new(marker: String, geo: GeoCache) -> Self {
        Self {
            marker,
            geo,
            cache: AsyncCache::new(),
        }
    }

    /// Return the tag for an IP, drawing its number on first use
    pub async fn tag_for(&self, ip: &str) -> String {
        self.cache
            .get_or_insert_with(ip.to_string(), || async {
                let country = self.geo.country_of(ip).await;
                let number = rand::rng().random_range(TAG_NUMBER_RANGE);
                render_tag(&country, &self.marker, number)
            })
            .await
    }

    pub fn geo(&self) -> &GeoCache {
        &self.geo
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Number of distinct IPs tagged so far
    pub fn cached_tags(&self) -> usize {
        self.cache.len()
    }
}
