use std::collections::HashSet;

use http::header::{
    AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName,
    PROXY_AUTHORIZATION, TRANSFER_ENCODING, WWW_AUTHENTICATE,
};
use http::{Method, StatusCode};
use url::Url;

use crate::error::Error;
use crate::util::{normalize_host, url_host};

const COOKIE2: HeaderName = HeaderName::from_static("cookie2");

// Credentials never cross a host boundary or an HTTPS->HTTP downgrade.
const SENSITIVE_HEADERS: [HeaderName; 5] = [
    AUTHORIZATION,
    COOKIE,
    COOKIE2,
    PROXY_AUTHORIZATION,
    WWW_AUTHENTICATE,
];

// Dropped when a redirect downgrades the method to GET and the body goes away.
const PAYLOAD_HEADERS: [HeaderName; 4] = [
    CONTENT_TYPE,
    CONTENT_LENGTH,
    CONTENT_ENCODING,
    TRANSFER_ENCODING,
];

/// One hop already taken while chasing redirects. `history[0]` is the
/// original request.
#[derive(Clone, Debug)]
pub struct RedirectRecord {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

/// The proposed next hop a policy inspects and may adjust: the engine
/// pre-fills the method (unchanged) and the hop headers (copied from the
/// previous hop, minus sensitive entries on cross-host or downgraded hops).
#[derive(Debug)]
pub struct RedirectAttempt {
    /// Status of the response that triggered this hop.
    pub status: StatusCode,
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub(crate) drop_body: bool,
}

/// Decides, per hop, whether a redirect is followed and how the next
/// request looks. Installed on the client; with no policy configured the
/// engine returns 3xx responses to the caller unfollowed.
#[derive(Clone, Debug)]
pub struct RedirectPolicy {
    inner: Policy,
}

#[derive(Clone, Debug)]
enum Policy {
    Prohibit,
    Bounded(usize),
    Domains(HashSet<String>),
    Smart(usize),
}

impl RedirectPolicy {
    /// Rejects every redirect with [`Error::AutoRedirectDisabled`].
    pub fn prohibit() -> Self {
        Self {
            inner: Policy::Prohibit,
        }
    }

    /// Follows up to `max_redirects` hops, method and body untouched.
    pub fn bounded(max_redirects: usize) -> Self {
        Self {
            inner: Policy::Bounded(max_redirects),
        }
    }

    /// Follows redirects only to the listed hosts (case-insensitive,
    /// port-agnostic).
    pub fn domains<I, S>(hostnames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            inner: Policy::Domains(
                hostnames
                    .into_iter()
                    .map(|host| normalize_host(host.as_ref()))
                    .collect(),
            ),
        }
    }

    /// Browser-style policy: bounded hop count, 301/302 POST and 303
    /// non-HEAD downgrade to GET with the body and payload headers
    /// dropped, 307/308 preserve method and body.
    pub fn smart(max_redirects: usize) -> Self {
        Self {
            inner: Policy::Smart(max_redirects),
        }
    }

    pub(crate) fn apply(
        &self,
        attempt: &mut RedirectAttempt,
        history: &[RedirectRecord],
    ) -> Result<(), Error> {
        match &self.inner {
            Policy::Prohibit => Err(Error::AutoRedirectDisabled),
            Policy::Bounded(max_redirects) => {
                enforce_cap(history.len(), *max_redirects)?;
                Ok(())
            }
            Policy::Domains(allowed) => {
                let host = url_host(&attempt.url);
                if allowed.contains(&host) {
                    Ok(())
                } else {
                    Err(Error::RedirectNotAllowed { host })
                }
            }
            Policy::Smart(max_redirects) => {
                enforce_cap(history.len(), *max_redirects)?;
                if downgrades_to_get(attempt.status, &attempt.method) {
                    attempt.method = Method::GET;
                    attempt.drop_body = true;
                    for name in PAYLOAD_HEADERS {
                        attempt.headers.remove(&name);
                    }
                }
                Ok(())
            }
        }
    }
}

fn enforce_cap(count: usize, max_redirects: usize) -> Result<(), Error> {
    if count >= max_redirects {
        return Err(Error::TooManyRedirects { count });
    }
    Ok(())
}

fn downgrades_to_get(status: StatusCode, method: &Method) -> bool {
    match status {
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => *method == Method::POST,
        StatusCode::SEE_OTHER => *method != Method::HEAD,
        _ => false,
    }
}

pub(crate) fn is_redirect_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Headers for the next hop: a full copy of the previous hop's headers when
/// the host matches and the scheme is not downgraded (HTTPS->HTTP), the
/// copy minus [`SENSITIVE_HEADERS`] otherwise.
pub(crate) fn hop_headers(previous: &RedirectRecord, next_url: &Url) -> HeaderMap {
    let mut headers = previous.headers.clone();
    let same_host = url_host(&previous.url) == url_host(next_url);
    let downgraded = previous.url.scheme() == "https" && next_url.scheme() == "http";
    if !same_host || downgraded {
        for name in SENSITIVE_HEADERS {
            headers.remove(&name);
        }
    }
    headers
}
