//! Link rewriter module for embedding the resolved IP, port and tag into links
//!
//! Three strategies are used depending on the link shape:
//! - Structured payload (`vmess://BASE64(JSON)`): the JSON document is edited
//! - Encoded authority (`ss://BASE64(method:password@host:port)#name`): the
//!   decoded authority is edited and re-encoded
//! - URI components (everything else): host, port and fragment are replaced
//!
//! The public [`rewrite_link`] entry point never fails: a link that cannot be
//! rewritten is returned unchanged.

use crate::proxy::models::Protocol;
use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde_json::{Map, Value};
use std::net::IpAddr;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// JSON field holding the display name of a structured payload
pub const PAYLOAD_NAME_FIELD: &str = "ps";

/// JSON field holding the server address of a structured payload
pub const PAYLOAD_ADDRESS_FIELD: &str = "add";

/// JSON field holding the server port of a structured payload
pub const PAYLOAD_PORT_FIELD: &str = "port";

/// Standard alphabet decoder that tolerates non-zero trailing bits
const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// URL-safe alphabet decoder that tolerates non-zero trailing bits
const LENIENT_URL_SAFE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Reasons a link could not be rewritten
#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("invalid URI: {0}")]
    InvalidUri(#[from] url::ParseError),

    #[error("link has no scheme delimiter")]
    MissingScheme,

    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("payload is not UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("link has plain userinfo, not an encoded authority")]
    NotEncodedAuthority,

    #[error("invalid encoded authority: {0}")]
    InvalidAuthority(String),

    #[error("host {0} rejected by URI")]
    HostRejected(String),

    #[error("URI does not accept a port")]
    PortRejected,
}

/// Rewrite a link for the given protocol, returning the original on failure
pub fn rewrite_link(protocol: &Protocol, link: &str, ip: &str, port: u16, tag: &str) -> String {
    let rewritten = if protocol.has_structured_payload() {
        rewrite_payload(link, ip, port, tag)
    } else if protocol.allows_encoded_authority() && has_encoded_authority(link) {
        rewrite_encoded_authority(link, ip, port, tag)
    } else {
        rewrite_uri(link, ip, port, tag)
    };

    rewritten.unwrap_or_else(|e| {
        debug!("Keeping link unchanged ({}): {}", e, link);
        link.to_string()
    })
}

/// Decode the base64 JSON object carried after the scheme delimiter
pub fn decode_payload(link: &str) -> Result<Map<String, Value>, RewriteError> {
    let (_, body) = link.split_once("://").ok_or(RewriteError::MissingScheme)?;
    let text = decode_text(body)?;

    match serde_json::from_str::<Value>(&text)? {
        Value::Object(payload) => Ok(payload),
        _ => Err(RewriteError::NotAnObject),
    }
}

/// Decode base64 text in either alphabet, with or without padding
fn decode_text(encoded: &str) -> Result<String, RewriteError> {
    let encoded = encoded.trim();
    let padded = format!("{}{}", encoded, "=".repeat((4 - encoded.len() % 4) % 4));

    let bytes = LENIENT_STANDARD
        .decode(padded.as_bytes())
        .or_else(|_| LENIENT_URL_SAFE.decode(padded.as_bytes()))?;
    Ok(String::from_utf8(bytes)?)
}

/// Authority decoded from a legacy `ss://BASE64(method:password@host:port)` link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAuthority {
    /// `method:password`, kept verbatim
    pub credentials: String,
    /// Server host, IPv6 unbracketed
    pub host: String,
    pub port: u16,
}

/// Split a link body into (encoded part, query, fragment)
fn split_body(body: &str) -> (&str, Option<&str>, Option<&str>) {
    let (head, fragment) = match body.split_once('#') {
        Some((head, fragment)) => (head, Some(fragment)),
        None => (body, None),
    };
    match head.split_once('?') {
        Some((encoded, query)) => (encoded, Some(query), fragment),
        None => (head, None, fragment),
    }
}

/// Whether the part before any query or fragment lacks plain `user@` info
pub fn has_encoded_authority(link: &str) -> bool {
    match link.split_once("://") {
        Some((_, body)) => {
            let (encoded, _, _) = split_body(body);
            !encoded.is_empty() && !encoded.contains('@')
        }
        None => false,
    }
}

/// Decode the base64 authority of a legacy link
pub fn decode_encoded_authority(link: &str) -> Result<EncodedAuthority, RewriteError> {
    let (_, body) = link.split_once("://").ok_or(RewriteError::MissingScheme)?;
    let (encoded, _, _) = split_body(body);
    if encoded.contains('@') {
        return Err(RewriteError::NotEncodedAuthority);
    }

    let text = decode_text(encoded)?;
    let invalid = || RewriteError::InvalidAuthority(text.clone());
    let (credentials, address) = text.rsplit_once('@').ok_or_else(invalid)?;
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    let port = port.trim().parse::<u16>().map_err(|_| invalid())?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }

    Ok(EncodedAuthority {
        credentials: credentials.to_string(),
        host: host.to_string(),
        port,
    })
}

/// Rewrite a legacy encoded-authority link
///
/// The authority is decoded, pointed at the IP and port, and re-encoded.
/// Any query is kept and the fragment is replaced with the tag.
pub fn rewrite_encoded_authority(
    link: &str,
    ip: &str,
    port: u16,
    tag: &str,
) -> Result<String, RewriteError> {
    let (scheme, body) = link.split_once("://").ok_or(RewriteError::MissingScheme)?;
    let authority = decode_encoded_authority(link)?;
    let (_, query, _) = split_body(body);

    let host = if ip.contains(':') {
        format!("[{}]", ip)
    } else {
        ip.to_string()
    };
    let decoded = format!("{}@{}:{}", authority.credentials, host, port);

    let mut rewritten = format!("{}://{}", scheme, STANDARD.encode(decoded));
    if let Some(query) = query {
        rewritten.push('?');
        rewritten.push_str(query);
    }
    rewritten.push('#');
    rewritten.push_str(&encode_fragment(tag)?);
    Ok(rewritten)
}

/// Percent-encode a tag the same way [`Url::set_fragment`] does
fn encode_fragment(tag: &str) -> Result<String, RewriteError> {
    let mut scratch = Url::parse("ss://fragment")?;
    scratch.set_fragment(Some(tag));
    Ok(scratch.fragment().unwrap_or_default().to_string())
}

/// Rewrite a structured-payload link
///
/// Sets the display name to the tag, the address to the IP and the port to
/// the fixed port. A string port stays a string. Every other field is kept
/// in its original position.
pub fn rewrite_payload(link: &str, ip: &str, port: u16, tag: &str) -> Result<String, RewriteError> {
    let (scheme, _) = link.split_once("://").ok_or(RewriteError::MissingScheme)?;
    let mut payload = decode_payload(link)?;

    let port_value = match payload.get(PAYLOAD_PORT_FIELD) {
        Some(Value::String(_)) => Value::String(port.to_string()),
        _ => Value::from(port),
    };
    payload.insert(PAYLOAD_NAME_FIELD.to_string(), Value::String(tag.to_string()));
    payload.insert(PAYLOAD_ADDRESS_FIELD.to_string(), Value::String(ip.to_string()));
    payload.insert(PAYLOAD_PORT_FIELD.to_string(), port_value);

    let json = serde_json::to_string(&Value::Object(payload))?;
    Ok(format!("{}://{}", scheme, STANDARD.encode(json)))
}

/// Rewrite a URI-shaped link's host, port and fragment
pub fn rewrite_uri(link: &str, ip: &str, port: u16, tag: &str) -> Result<String, RewriteError> {
    let mut url = Url::parse(link)?;

    match ip.parse::<IpAddr>() {
        Ok(addr) => url
            .set_ip_host(addr)
            .map_err(|_| RewriteError::HostRejected(ip.to_string()))?,
        Err(_) => url.set_host(Some(ip))?,
    }
    url.set_port(Some(port))
        .map_err(|_| RewriteError::PortRejected)?;
    // set_fragment percent-encodes spaces and non-ASCII characters
    url.set_fragment(Some(tag));

    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const US_TAG: &str = "\u{1F1FA}\u{1F1F8} @demo 123456";
    const US_TAG_ENCODED: &str = "%F0%9F%87%BA%F0%9F%87%B8%20@demo%20123456";

    fn encode(json: &str) -> String {
        format!("vmess://{}", STANDARD.encode(json))
    }

    #[test]
    fn test_decode_payload_without_padding() {
        // {"add":"example.com"} with the trailing "==" stripped
        let payload = decode_payload("vmess://eyJhZGQiOiAiZXhhbXBsZS5jb20ifQ").unwrap();
        assert_eq!(payload["add"], "example.com");
    }

    #[test]
    fn test_decode_payload_allows_trailing_bits() {
        // Canonical form ends in "In0="; the last symbol here carries a stray low bit
        let payload = decode_payload("vmess://eyJhZGQiOiJ4In1=").unwrap();
        assert_eq!(payload["add"], "x");
    }

    #[test]
    fn test_decode_payload_url_safe_alphabet() {
        let json = r#"{"ps":"??>>"}"#;
        let link = format!(
            "vmess://{}",
            base64::engine::general_purpose::URL_SAFE.encode(json)
        );
        let payload = decode_payload(&link).unwrap();
        assert_eq!(payload["ps"], "??>>");
    }

    #[test]
    fn test_decode_payload_rejects_non_object() {
        let err = decode_payload(&encode("[1, 2, 3]")).unwrap_err();
        assert!(matches!(err, RewriteError::NotAnObject));
    }

    #[test]
    fn test_rewrite_payload_sets_fields_and_preserves_others() {
        let link = encode(
            r#"{"v":"2","ps":"old","add":"example.com","port":8080,"id":"uuid-1","net":"ws"}"#,
        );
        let rewritten = rewrite_payload(&link, "1.2.3.4", 443, US_TAG).unwrap();
        assert!(rewritten.starts_with("vmess://"));

        let payload = decode_payload(&rewritten).unwrap();
        assert_eq!(payload["ps"], US_TAG);
        assert_eq!(payload["add"], "1.2.3.4");
        assert_eq!(payload["port"], 443);
        assert_eq!(payload["id"], "uuid-1");
        assert_eq!(payload["net"], "ws");
        assert_eq!(payload["v"], "2");

        let keys: Vec<&str> = payload.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["v", "ps", "add", "port", "id", "net"]);
    }

    #[test]
    fn test_rewrite_payload_keeps_string_port_as_string() {
        let link = encode(r#"{"add":"example.com","port":"8080"}"#);
        let rewritten = rewrite_payload(&link, "1.2.3.4", 443, US_TAG).unwrap();
        let payload = decode_payload(&rewritten).unwrap();
        assert_eq!(payload["port"], "443");
    }

    #[test]
    fn test_rewrite_payload_adds_missing_fields() {
        let rewritten = rewrite_payload(
            "vmess://eyJhZGQiOiAiZXhhbXBsZS5jb20ifQ==",
            "1.2.3.4",
            443,
            US_TAG,
        )
        .unwrap();
        let payload = decode_payload(&rewritten).unwrap();
        assert_eq!(payload["add"], "1.2.3.4");
        assert_eq!(payload["ps"], US_TAG);
        assert_eq!(payload["port"], 443);
    }

    #[test]
    fn test_rewrite_uri_replaces_host_port_fragment() {
        let link = "trojan://secret@example.com:8443?security=tls&sni=example.com#old-name";
        let rewritten = rewrite_uri(link, "1.2.3.4", 443, US_TAG).unwrap();
        assert_eq!(
            rewritten,
            format!(
                "trojan://secret@1.2.3.4:443?security=tls&sni=example.com#{}",
                US_TAG_ENCODED
            )
        );
    }

    #[test]
    fn test_rewrite_uri_ipv6_host_is_bracketed() {
        let rewritten =
            rewrite_uri("vless://uuid@example.com:80", "2001:db8::1", 443, "tag").unwrap();
        assert_eq!(rewritten, "vless://uuid@[2001:db8::1]:443#tag");
    }

    #[test]
    fn test_rewrite_uri_with_unresolved_hostname() {
        let rewritten = rewrite_uri("ss://YWVzOnB3@example.com:8388", "example.com", 443, "tag")
            .unwrap();
        assert_eq!(rewritten, "ss://YWVzOnB3@example.com:443#tag");
    }

    const LEGACY_SS: &str = "ss://YWVzLTI1Ni1nY206cGFzc0AxLjIuMy40Ojg0NDM=#name";

    #[test]
    fn test_has_encoded_authority() {
        assert!(has_encoded_authority(LEGACY_SS));
        assert!(has_encoded_authority("ss://YWVzLTI1Ni1nY206cGFzc0AxLjIuMy40Ojg0NDM"));
        assert!(!has_encoded_authority("ss://YWVzOnB3@1.2.3.4:8388#ss-node"));
        assert!(!has_encoded_authority("ss://#only-a-name"));
        assert!(!has_encoded_authority("no scheme"));
    }

    #[test]
    fn test_decode_encoded_authority() {
        let authority = decode_encoded_authority(LEGACY_SS).unwrap();
        assert_eq!(
            authority,
            EncodedAuthority {
                credentials: "aes-256-gcm:pass".to_string(),
                host: "1.2.3.4".to_string(),
                port: 8443,
            }
        );

        let ipv6 = format!("ss://{}", STANDARD.encode("aes-128-gcm:p@ss@[2001:db8::1]:8388"));
        let authority = decode_encoded_authority(&ipv6).unwrap();
        assert_eq!(authority.credentials, "aes-128-gcm:p@ss");
        assert_eq!(authority.host, "2001:db8::1");
        assert_eq!(authority.port, 8388);
    }

    #[test]
    fn test_decode_encoded_authority_rejects_malformed() {
        let no_port = format!("ss://{}", STANDARD.encode("aes-256-gcm:pass@1.2.3.4"));
        assert!(matches!(
            decode_encoded_authority(&no_port),
            Err(RewriteError::InvalidAuthority(_))
        ));
        assert!(matches!(
            decode_encoded_authority("ss://YWVzOnB3@1.2.3.4:8388"),
            Err(RewriteError::NotEncodedAuthority)
        ));
    }

    #[test]
    fn test_rewrite_encoded_authority() {
        let rewritten = rewrite_encoded_authority(LEGACY_SS, "5.6.7.8", 443, US_TAG).unwrap();
        assert_eq!(
            rewritten,
            format!(
                "ss://{}#{}",
                STANDARD.encode("aes-256-gcm:pass@5.6.7.8:443"),
                US_TAG_ENCODED
            )
        );

        let with_query = format!(
            "ss://{}?plugin=obfs#old",
            STANDARD.encode("chacha20:pw@node.example:8388")
        );
        let rewritten = rewrite_encoded_authority(&with_query, "2001:db8::1", 443, "tag").unwrap();
        assert_eq!(
            rewritten,
            format!(
                "ss://{}?plugin=obfs#tag",
                STANDARD.encode("chacha20:pw@[2001:db8::1]:443")
            )
        );
    }

    #[test]
    fn test_rewrite_link_handles_legacy_shadowsocks() {
        let ss = Protocol::new("ss");
        let rewritten = rewrite_link(&ss, LEGACY_SS, "5.6.7.8", 443, "t");
        assert_eq!(
            rewritten,
            format!("ss://{}#t", STANDARD.encode("aes-256-gcm:pass@5.6.7.8:443"))
        );

        let broken = "ss://bm90LWFuLWF1dGhvcml0eQ#x";
        assert_eq!(rewrite_link(&ss, broken, "5.6.7.8", 443, "t"), broken);
    }

    #[test]
    fn test_rewrite_link_returns_original_on_failure() {
        let vmess = Protocol::new("vmess");
        let broken = "vmess://not-base64-json!!";
        assert_eq!(rewrite_link(&vmess, broken, "1.2.3.4", 443, "tag"), broken);

        let trojan = Protocol::new("trojan");
        let not_a_uri = "trojan://secret@[not-an-ipv6]:443";
        assert_eq!(rewrite_link(&trojan, not_a_uri, "1.2.3.4", 443, "tag"), not_a_uri);

        let unknown = Protocol::unknown();
        assert_eq!(rewrite_link(&unknown, "plain text", "1.2.3.4", 443, "tag"), "plain text");
    }

    #[test]
    fn test_rewrite_link_dispatches_by_protocol() {
        let link = encode(r#"{"add":"example.com"}"#);
        let rewritten = rewrite_link(&Protocol::new("vmess"), &link, "1.2.3.4", 443, US_TAG);
        assert_eq!(decode_payload(&rewritten).unwrap()["add"], "1.2.3.4");

        let rewritten = rewrite_link(
            &Protocol::new("vless"),
            "vless://uuid@example.com:80?type=ws",
            "1.2.3.4",
            443,
            "tag",
        );
        assert_eq!(rewritten, "vless://uuid@1.2.3.4:443?type=ws#tag");
    }
}
