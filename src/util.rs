use std::collections::HashMap;

use http::header::{HeaderName, HeaderValue};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use url::Url;

use crate::error::Error;

// Everything except RFC 3986 unreserved characters.
const PATH_VALUE_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Replaces `{name}` placeholders in a request path with URL-path-escaped
/// values. Placeholders without a matching entry stay literal.
pub(crate) fn substitute_path_params(path: &str, params: &HashMap<String, String>) -> String {
    if params.is_empty() {
        return path.to_owned();
    }
    let mut prepared = path.to_owned();
    for (key, value) in params {
        let placeholder = format!("{{{key}}}");
        let escaped = utf8_percent_encode(value, PATH_VALUE_ESCAPE).to_string();
        prepared = prepared.replace(&placeholder, &escaped);
    }
    prepared
}

/// Lowercased hostname with any `:port` suffix removed. Accepts both bare
/// hosts and `host:port` strings (bracketed IPv6 included).
pub(crate) fn normalize_host(host: &str) -> String {
    let trimmed = host.trim();
    if let Some(rest) = trimmed.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return rest[..end].to_ascii_lowercase();
        }
        return trimmed.to_ascii_lowercase();
    }
    if let Some((name, port)) = trimmed.rsplit_once(':')
        && !port.is_empty()
        && port.bytes().all(|byte| byte.is_ascii_digit())
        && !name.contains(':')
    {
        return name.to_ascii_lowercase();
    }
    trimmed.to_ascii_lowercase()
}

pub(crate) fn url_host(url: &Url) -> String {
    url.host_str().unwrap_or_default().to_ascii_lowercase()
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

/// Merges builder query pairs into a parsed URL. Builder values replace any
/// URL-embedded values for the same key (set semantics); keys the builder
/// never touched keep their URL-embedded values.
pub(crate) fn overlay_queries(url: &mut Url, builder_queries: &[(String, String)]) {
    if builder_queries.is_empty() {
        return;
    }

    let mut merged: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    let mut seen_keys: Vec<&str> = Vec::new();
    for (key, _) in builder_queries {
        if !seen_keys.contains(&key.as_str()) {
            seen_keys.push(key);
            merged.retain(|(existing, _)| existing != key);
        }
    }
    for (key, value) in builder_queries {
        merged.push((key.clone(), value.clone()));
    }

    if merged.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(&merged);
    }
}
