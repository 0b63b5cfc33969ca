//! Link parser module for extracting and classifying connection links

use crate::proxy::models::{LinkSet, Protocol};
use crate::proxy::rewriter::{
    decode_encoded_authority, decode_payload, has_encoded_authority, PAYLOAD_ADDRESS_FIELD,
};
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::path::Path;
use url::{Host, Url};

/// Regex pattern to match `scheme://...` tokens in text
static LINK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z][A-Za-z0-9+.\-]*://\S+").expect("Invalid link regex")
});

/// Link parser for extracting links from text and inspecting them
pub struct LinkParser;

impl LinkParser {
    /// Extract every link token from raw text, in order of appearance
    ///
    /// Duplicates are kept; merge results into a [`LinkSet`] to deduplicate.
    pub fn extract_links(content: &str) -> Vec<String> {
        LINK_REGEX
            .find_iter(content)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Extract links from several texts into one deduplicated set
    pub fn extract_link_set<'a, I>(contents: I) -> LinkSet
    where
        I: IntoIterator<Item = &'a str>,
    {
        contents
            .into_iter()
            .flat_map(Self::extract_links)
            .collect()
    }

    /// Derive the protocol tag from everything before the first `://`
    pub fn classify(link: &str) -> Protocol {
        match link.split_once("://") {
            Some((scheme, _)) => Protocol::new(scheme),
            None => Protocol::unknown(),
        }
    }

    /// Extract the host a link connects to, or an empty string
    ///
    /// Structured-payload links carry their address inside the payload, so
    /// the address field is read from there. Legacy links with a base64
    /// authority are decoded first. IPv6 hosts come back unbracketed.
    pub fn extract_host(link: &str) -> String {
        let protocol = Self::classify(link);
        if protocol.has_structured_payload() {
            return Self::payload_host(link).unwrap_or_default();
        }
        if protocol.allows_encoded_authority() && has_encoded_authority(link) {
            return decode_encoded_authority(link)
                .map(|authority| authority.host)
                .unwrap_or_default();
        }

        let Ok(url) = Url::parse(link) else {
            return String::new();
        };
        match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => String::new(),
        }
    }

    fn payload_host(link: &str) -> Option<String> {
        let payload = decode_payload(link).ok()?;
        match payload.get(PAYLOAD_ADDRESS_FIELD)? {
            Value::String(address) => Some(address.trim().to_string()),
            _ => None,
        }
    }

    /// Parse links from a local file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<LinkSet> {
        let content = fs::read_to_string(path)?;
        Ok(Self::extract_link_set([content.as_str()]))
    }
}
