//! Canonical request construction.
//!
//! The canonical request is
//! `METHOD\nURI\nQUERY\nHEADERS\n\nSIGNED_HEADERS\nPAYLOAD_HASH`, where the
//! headers block already ends in a newline. Nothing here fails: missing headers
//! resolve to empty values so that the caller decides what a missing
//! `x-amz-date` means.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

/// Header carrying the client's payload hash.
pub const CONTENT_SHA256: &str = "x-amz-content-sha256";

/// The parts of a request that take part in signing.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalInput<'a> {
    pub method: &'a str,
    /// Path after one round of percent-decoding.
    pub path: &'a str,
    /// Raw query string, without the leading `?`.
    pub query: &'a str,
    pub headers: &'a HeaderMap,
    /// Authority from the request URI, used when no `Host` header was sent.
    pub authority: Option<&'a str>,
}

/// Where the value of a signed header comes from.
enum HeaderSource<'a> {
    Host,
    ContentType,
    AmzDate,
    ContentSha256,
    Generic(&'a str),
}

impl<'a> HeaderSource<'a> {
    fn for_name(name: &'a str) -> Self {
        match name {
            "host" => Self::Host,
            "content-type" => Self::ContentType,
            "x-amz-date" => Self::AmzDate,
            CONTENT_SHA256 => Self::ContentSha256,
            other => Self::Generic(other),
        }
    }

    fn resolve(&self, input: &CanonicalInput<'_>) -> String {
        match self {
            Self::Host => header_value(input.headers, "host")
                .or_else(|| input.authority.map(str::to_string))
                .unwrap_or_default(),
            Self::ContentType => header_value(input.headers, "content-type").unwrap_or_default(),
            Self::AmzDate => header_value(input.headers, "x-amz-date").unwrap_or_default(),
            Self::ContentSha256 => header_value(input.headers, CONTENT_SHA256).unwrap_or_default(),
            Self::Generic(name) => header_value(input.headers, name).unwrap_or_default(),
        }
    }
}

/// Build the canonical request string.
///
/// `signed_headers` is used in the order the client listed it.
pub fn canonical_request(
    input: &CanonicalInput<'_>,
    signed_headers: &[&str],
    payload_hash: &str,
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        input.method,
        uri_encode_path(input.path),
        canonical_query_string(input.query),
        canonical_headers(input, signed_headers),
        signed_headers.join(";"),
        payload_hash
    )
}

/// `name:value\n` for every signed header, in the given order.
pub fn canonical_headers(input: &CanonicalInput<'_>, signed_headers: &[&str]) -> String {
    signed_headers
        .iter()
        .map(|name| {
            let value = HeaderSource::for_name(name).resolve(input);
            // Trim header values (collapse spaces, trim)
            let trimmed = value.split_whitespace().collect::<Vec<_>>().join(" ");
            format!("{}:{}\n", name, trimmed)
        })
        .collect()
}

/// All values of a header joined with `,`, or `None` if it was not sent.
fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let values: Vec<String> = headers
        .get_all(name)
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(","))
    }
}

/// The `x-amz-content-sha256` header as sent, if any.
pub fn declared_payload_hash(headers: &HeaderMap) -> Option<&str> {
    headers.get(CONTENT_SHA256).and_then(|v| v.to_str().ok())
}

/// Hex SHA-256 of a request body.
pub fn hash_payload(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Build sorted canonical query string from raw query.
pub fn canonical_query_string(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            // Decode first, then re-encode to normalize
            (
                uri_encode(&percent_decode(k), true),
                uri_encode(&percent_decode(v), true),
            )
        })
        .collect();

    pairs.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-decode a query component; malformed escapes are kept literally.
fn percent_decode(input: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(input.as_bytes())).into_owned()
}

/// URI-encode a path, preserving '/' separators.
pub fn uri_encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| uri_encode(segment, false))
        .collect::<Vec<_>>()
        .join("/")
}

/// URI-encode a string (RFC 3986).
/// Unreserved characters: A-Z a-z 0-9 - _ . ~
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut encoded = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            b'/' if !encode_slash => encoded.push('/'),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}
