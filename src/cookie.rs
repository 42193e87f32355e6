use http::HeaderMap;
use http::header::{COOKIE, HeaderValue, SET_COOKIE};

/// A name/value cookie pair carried on requests and parsed from responses.
///
/// Attribute handling (path, expiry, SameSite) is the jar's concern and out
/// of scope here; defaults set on the client plus per-request cookies are
/// folded into a single `Cookie` header in insertion order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Appends the given cookies to the request's `Cookie` header, preserving
/// any value middleware or the caller already set.
pub(crate) fn fold_into_header(headers: &mut HeaderMap, cookies: &[Cookie]) {
    if cookies.is_empty() {
        return;
    }

    let mut folded = String::new();
    if let Some(existing) = headers.get(COOKIE).and_then(|value| value.to_str().ok()) {
        folded.push_str(existing);
    }
    for cookie in cookies {
        if !folded.is_empty() {
            folded.push_str("; ");
        }
        folded.push_str(&cookie.name);
        folded.push('=');
        folded.push_str(&cookie.value);
    }

    if let Ok(value) = HeaderValue::from_str(&folded) {
        headers.insert(COOKIE, value);
    } else {
        tracing::warn!("dropping cookie header with invalid characters");
    }
}

/// Parses every `Set-Cookie` header into name/value pairs, ignoring
/// attributes after the first `;`.
pub(crate) fn parse_set_cookie(headers: &HeaderMap) -> Vec<Cookie> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|text| {
            let pair = text.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(Cookie::new(name, value.trim()))
        })
        .collect()
}
