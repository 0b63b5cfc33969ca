//! Link data models

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Protocol tag used when a link has no scheme delimiter
pub const UNKNOWN_PROTOCOL: &str = "unknown";

/// Protocols dropped from output unless overridden
pub const DEFAULT_BLOCKED_PROTOCOLS: &[&str] = &["https", "hysteria", "hysteria2", "hy2"];

/// Protocol tag derived from a link's scheme, always lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Protocol(String);

impl Protocol {
    pub fn new(tag: &str) -> Self {
        Self(tag.to_ascii_lowercase())
    }

    pub fn unknown() -> Self {
        Self(UNKNOWN_PROTOCOL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_PROTOCOL
    }

    /// Whether the link body is a base64 JSON document rather than URI parts
    pub fn has_structured_payload(&self) -> bool {
        self.0 == "vmess"
    }

    /// Whether links may base64-encode their whole `user@host:port` authority
    pub fn allows_encoded_authority(&self) -> bool {
        self.0 == "ss"
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Set of protocol tags excluded from enrichment and output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockList {
    protocols: HashSet<Protocol>,
}

impl BlockList {
    /// A block-list that lets every protocol through
    pub fn empty() -> Self {
        Self {
            protocols: HashSet::new(),
        }
    }

    pub fn from_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            protocols: tags
                .into_iter()
                .map(|tag| Protocol::new(tag.as_ref().trim()))
                .collect(),
        }
    }

    pub fn is_blocked(&self, protocol: &Protocol) -> bool {
        self.protocols.contains(protocol)
    }

    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }
}

impl Default for BlockList {
    fn default() -> Self {
        Self::from_tags(DEFAULT_BLOCKED_PROTOCOLS)
    }
}

/// Deduplicated links in first-seen order
#[derive(Debug, Clone, Default)]
pub struct LinkSet {
    seen: HashSet<String>,
    links: Vec<String>,
}

impl LinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a link, returning false if it was already present
    pub fn insert(&mut self, link: String) -> bool {
        if self.seen.contains(&link) {
            return false;
        }
        self.seen.insert(link.clone());
        self.links.push(link);
        true
    }

    pub fn contains(&self, link: &str) -> bool {
        self.seen.contains(link)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.links.iter()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.links
    }
}

impl Extend<String> for LinkSet {
    fn extend<T: IntoIterator<Item = String>>(&mut self, iter: T) {
        for link in iter {
            self.insert(link);
        }
    }
}

impl FromIterator<String> for LinkSet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        let mut set = LinkSet::new();
        set.extend(iter);
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_is_lowercase() {
        let protocol = Protocol::new("VMess");
        assert_eq!(protocol.as_str(), "vmess");
        assert_eq!(protocol.to_string(), "vmess");
        assert!(protocol.has_structured_payload());
    }

    #[test]
    fn test_protocol_unknown() {
        let protocol = Protocol::unknown();
        assert!(protocol.is_unknown());
        assert!(!protocol.has_structured_payload());
        assert!(!protocol.allows_encoded_authority());
    }

    #[test]
    fn test_protocol_encoded_authority() {
        assert!(Protocol::new("SS").allows_encoded_authority());
        assert!(!Protocol::new("vless").allows_encoded_authority());
    }

    #[test]
    fn test_protocol_serializes_as_plain_string() {
        let json = serde_json::to_string(&Protocol::new("Trojan")).unwrap();
        assert_eq!(json, "\"trojan\"");
    }

    #[test]
    fn test_default_block_list() {
        let blocked = BlockList::default();
        assert!(blocked.is_blocked(&Protocol::new("hysteria2")));
        assert!(blocked.is_blocked(&Protocol::new("HTTPS")));
        assert!(!blocked.is_blocked(&Protocol::new("vless")));
        assert!(!BlockList::empty().is_blocked(&Protocol::new("https")));
    }

    #[test]
    fn test_link_set_dedup_keeps_first_seen_order() {
        let mut set = LinkSet::new();
        assert!(set.insert("trojan://a@b:1".to_string()));
        assert!(set.insert("vless://c@d:2".to_string()));
        assert!(!set.insert("trojan://a@b:1".to_string()));

        assert_eq!(set.len(), 2);
        assert!(set.contains("vless://c@d:2"));
        assert_eq!(
            set.into_vec(),
            vec!["trojan://a@b:1".to_string(), "vless://c@d:2".to_string()]
        );
    }

    #[test]
    fn test_link_set_from_iter() {
        let set: LinkSet = vec!["ss://x@y:1".to_string(), "ss://x@y:1".to_string()]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 1);
    }
}
