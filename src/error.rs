use http::Method;
use thiserror::Error;

/// Boxed error type used at the transport seam and in user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Rough classification of a transport-level failure, derived from the
/// error chain the connector/transport reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Stable machine-readable discriminant for [`Error`], independent of the
/// human-readable message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    UnsupportedContentType,
    Encode,
    Decode,
    RequestCreation,
    ReadBody,
    NoResponse,
    UnsupportedProxyScheme,
    NoProxies,
    InvalidProxyUrl,
    InvalidTransport,
    InvalidHeaderName,
    InvalidHeaderValue,
    AutoRedirectDisabled,
    TooManyRedirects,
    RedirectNotAllowed,
    MissingRedirectLocation,
    InvalidRedirectLocation,
    Transport,
    Timeout,
    Canceled,
    Attempt,
    Multiple,
    Io,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedContentType => "unsupported_content_type",
            Self::Encode => "encode",
            Self::Decode => "decode",
            Self::RequestCreation => "request_creation",
            Self::ReadBody => "read_body",
            Self::NoResponse => "no_response",
            Self::UnsupportedProxyScheme => "unsupported_proxy_scheme",
            Self::NoProxies => "no_proxies",
            Self::InvalidProxyUrl => "invalid_proxy_url",
            Self::InvalidTransport => "invalid_transport",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::AutoRedirectDisabled => "auto_redirect_disabled",
            Self::TooManyRedirects => "too_many_redirects",
            Self::RedirectNotAllowed => "redirect_not_allowed",
            Self::MissingRedirectLocation => "missing_redirect_location",
            Self::InvalidRedirectLocation => "invalid_redirect_location",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::Attempt => "attempt",
            Self::Multiple => "multiple",
            Self::Io => "io",
        }
    }
}

/// Every failure surfaced by this crate.
///
/// HTTP responses with status >= 400 are not errors; callers inspect the
/// [`Response`](crate::Response) instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("unsupported content type: {content_type}")]
    UnsupportedContentType { content_type: String },
    #[error("encoding {content_type} body failed: {source}")]
    Encode {
        content_type: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("decoding {content_type} body failed: {source}")]
    Decode {
        content_type: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("failed to create request for {url}: {message}")]
    RequestCreation { url: String, message: String },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error("transport returned neither a response nor an error")]
    NoResponse,
    #[error("unsupported proxy scheme: {scheme}")]
    UnsupportedProxyScheme { scheme: String },
    #[error("no proxy URLs provided")]
    NoProxies,
    #[error("invalid proxy URL: {url}")]
    InvalidProxyUrl { url: String },
    #[error("invalid transport for this operation: {message}")]
    InvalidTransport { message: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("auto redirect disabled")]
    AutoRedirectDisabled,
    #[error("stopped after {count} redirects")]
    TooManyRedirects { count: usize },
    #[error("redirect to {host} not allowed")]
    RedirectNotAllowed { host: String },
    #[error("redirect response {status} missing location header")]
    MissingRedirectLocation { status: u16 },
    #[error("invalid redirect location: {location}")]
    InvalidRedirectLocation { location: String },
    #[error("transport error ({kind}) for {method} {url}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        url: String,
        #[source]
        source: BoxError,
    },
    #[error("request timed out after {timeout_ms}ms for {method} {url}")]
    Timeout {
        timeout_ms: u128,
        method: Method,
        url: String,
    },
    #[error("request canceled")]
    Canceled,
    #[error("attempt {attempt}/{total}: {source}")]
    Attempt {
        attempt: usize,
        total: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("{}", join_messages(.0))]
    Multiple(Vec<Error>),
    #[error("io error: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },
}

fn join_messages(errors: &[Error]) -> String {
    let mut joined = String::new();
    for (index, error) in errors.iter().enumerate() {
        if index > 0 {
            joined.push_str("; ");
        }
        joined.push_str(&error.to_string());
    }
    joined
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedContentType { .. } => ErrorCode::UnsupportedContentType,
            Self::Encode { .. } => ErrorCode::Encode,
            Self::Decode { .. } => ErrorCode::Decode,
            Self::RequestCreation { .. } => ErrorCode::RequestCreation,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::NoResponse => ErrorCode::NoResponse,
            Self::UnsupportedProxyScheme { .. } => ErrorCode::UnsupportedProxyScheme,
            Self::NoProxies => ErrorCode::NoProxies,
            Self::InvalidProxyUrl { .. } => ErrorCode::InvalidProxyUrl,
            Self::InvalidTransport { .. } => ErrorCode::InvalidTransport,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::AutoRedirectDisabled => ErrorCode::AutoRedirectDisabled,
            Self::TooManyRedirects { .. } => ErrorCode::TooManyRedirects,
            Self::RedirectNotAllowed { .. } => ErrorCode::RedirectNotAllowed,
            Self::MissingRedirectLocation { .. } => ErrorCode::MissingRedirectLocation,
            Self::InvalidRedirectLocation { .. } => ErrorCode::InvalidRedirectLocation,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Canceled => ErrorCode::Canceled,
            Self::Attempt { .. } => ErrorCode::Attempt,
            Self::Multiple(_) => ErrorCode::Multiple,
            Self::Io { .. } => ErrorCode::Io,
        }
    }

    /// Whether this error is a timeout (request deadline or a
    /// timeout-shaped transport failure), chasing attempt annotations and
    /// joined accumulators so callers never unwrap layers themselves.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Transport { source, .. } | Self::ReadBody { source } => {
                source_is_timeout(source.as_ref())
            }
            Self::Attempt { source, .. } => source.is_timeout(),
            Self::Multiple(errors) => errors.iter().any(Error::is_timeout),
            _ => false,
        }
    }

    /// Whether this error is a connection-level failure (DNS resolution,
    /// TCP connect, TLS handshake), chasing wrapped layers like
    /// [`Error::is_timeout`].
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Transport { kind, .. } => matches!(
                kind,
                TransportErrorKind::Dns | TransportErrorKind::Connect | TransportErrorKind::Tls
            ),
            Self::Attempt { source, .. } => source.is_connection_error(),
            Self::Multiple(errors) => errors.iter().any(Error::is_connection_error),
            _ => false,
        }
    }
}

fn source_is_timeout(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(layer) = current {
        if let Some(io_error) = layer.downcast_ref::<std::io::Error>()
            && matches!(
                io_error.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        {
            return true;
        }
        if layer.to_string().to_ascii_lowercase().contains("timed out") {
            return true;
        }
        current = layer.source();
    }
    false
}

/// Classifies a transport failure by walking the error chain and matching
/// marker substrings. Unknown failures stay [`TransportErrorKind::Other`]
/// so callers do not mistake configuration problems for network flakiness.
pub(crate) fn classify_transport_error(error: &(dyn std::error::Error + 'static)) -> TransportErrorKind {
    let mut text = error.to_string().to_ascii_lowercase();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push(' ');
        text.push_str(&cause.to_string().to_ascii_lowercase());
        source = cause.source();
    }
    classify_transport_error_text(&text)
}

pub(crate) fn classify_transport_error_text(text: &str) -> TransportErrorKind {
    const DNS_MARKERS: &[&str] = &[
        "name or service not known",
        "failed to lookup address",
        "no such host",
        "temporary failure in name resolution",
        "nodename nor servname provided",
        "dns lookup failed",
    ];
    const TLS_MARKERS: &[&str] = &[
        "tls handshake",
        "certificate verify",
        "certificate unknown",
        "invalid certificate",
        "self signed certificate",
        "x509",
        "pkix",
        "peer certificate",
    ];
    const CONNECT_MARKERS: &[&str] = &[
        "connection refused",
        "connection aborted",
        "not connected",
        "network unreachable",
        "host unreachable",
        "connect error",
        "proxy connect",
        "connection timeout",
        "connect timeout",
    ];
    const READ_MARKERS: &[&str] = &[
        "connection reset",
        "broken pipe",
        "unexpected eof",
        "incomplete message",
        "connection closed before message completed",
        "body write aborted",
    ];

    if contains_marker(text, DNS_MARKERS) || contains_word(text, "dns") {
        return TransportErrorKind::Dns;
    }
    if contains_marker(text, TLS_MARKERS)
        || contains_word(text, "tls")
        || contains_word(text, "ssl")
        || contains_word(text, "certificate")
    {
        return TransportErrorKind::Tls;
    }
    if contains_marker(text, CONNECT_MARKERS) {
        return TransportErrorKind::Connect;
    }
    if contains_marker(text, READ_MARKERS) {
        return TransportErrorKind::Read;
    }
    TransportErrorKind::Other
}

fn contains_marker(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| text.contains(marker))
}

fn contains_word(text: &str, word: &str) -> bool {
    text.split(|character: char| !character.is_ascii_alphanumeric())
        .any(|token| token == word)
}
