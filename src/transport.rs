use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::{StreamExt, TryStreamExt};
use http::header::HeaderValue;
use http::{HeaderMap, Method, StatusCode, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, BodyStream, Empty, Full, StreamBody};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::connect::proxy::Tunnel;
use hyper_util::rt::TokioExecutor;
use rustls::pki_types::pem::PemObject;
use tower_service::Service;
use url::Url;

use crate::error::{BoxError, Error, classify_transport_error};
use crate::proxy::ProxySlot;

/// Streamable sequence of body chunks, the shape both request streaming
/// bodies and transport response bodies share.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send + Sync>>;

/// Outgoing request body. Buffered bodies replay cheaply across retry
/// attempts; streaming bodies are one-shot, and retrying a request that
/// carries one is undefined.
pub enum RequestBody {
    Empty,
    Bytes(Bytes),
    Stream(ByteStream),
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(bytes) => bytes.is_empty(),
            Self::Stream(_) => false,
        }
    }

    /// Produces the body for one attempt. Buffered contents clone; a stream
    /// is handed out once and later attempts see an empty body.
    pub(crate) fn take_for_attempt(&mut self) -> RequestBody {
        match self {
            Self::Empty => Self::Empty,
            Self::Bytes(bytes) => Self::Bytes(bytes.clone()),
            Self::Stream(_) => std::mem::replace(self, Self::Empty),
        }
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => formatter.write_str("Empty"),
            Self::Bytes(bytes) => formatter.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => formatter.write_str("Stream"),
        }
    }
}

/// The concrete request handed to middleware and ultimately to the
/// transport: method, absolute URL, canonical headers, and body.
#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl OutboundRequest {
    pub(crate) fn clone_for_attempt(&mut self) -> OutboundRequest {
        OutboundRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.take_for_attempt(),
        }
    }
}

/// The transport's answer: status, headers, the final URL, and a
/// streamable body. Dropping the body closes the underlying connection
/// resources.
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub url: Url,
    pub body: ByteStream,
}

impl TransportResponse {
    /// Builds a response around an already-materialized body; useful for
    /// middleware that synthesizes responses (caches, stubs) and for tests.
    pub fn buffered(status: StatusCode, headers: HeaderMap, url: Url, body: Bytes) -> Self {
        Self {
            status,
            headers,
            url,
            body: buffered_stream(body),
        }
    }

    /// Drains the body into owned bytes and reinstalls a replayable copy,
    /// so the response can keep flowing down the chain after inspection.
    pub async fn read_body(&mut self) -> Result<Bytes, Error> {
        let mut buffer = crate::pool::get();
        while let Some(chunk) = self.body.next().await {
            let chunk = chunk.map_err(|source| Error::ReadBody { source })?;
            buffer.extend_from_slice(&chunk);
        }
        let owned = crate::pool::copy_out(buffer);
        self.body = buffered_stream(owned.clone());
        Ok(owned)
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .finish()
    }
}

pub(crate) fn buffered_stream(bytes: Bytes) -> ByteStream {
    if bytes.is_empty() {
        return Box::pin(futures_util::stream::empty());
    }
    Box::pin(futures_util::stream::iter(std::iter::once(Ok(bytes))))
}

/// One HTTP exchange: send a request, receive a response with a streamable
/// body. Implementations do not follow redirects or retry; both belong to
/// the engine above them.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(&self, request: OutboundRequest) -> Result<TransportResponse, Error>;
}

/// TLS knobs the default transport honors at build time.
#[derive(Clone, Debug, Default)]
pub struct TlsOptions {
    root_certificates_pem: Vec<Vec<u8>>,
}

impl TlsOptions {
    /// Adds a PEM bundle of extra root CAs trusted alongside the built-in
    /// webpki roots.
    pub fn add_root_certificate_pem(&mut self, pem: impl Into<Vec<u8>>) -> &mut Self {
        self.root_certificates_pem.push(pem.into());
        self
    }

    pub(crate) fn is_default(&self) -> bool {
        self.root_certificates_pem.is_empty()
    }
}

/// Connection-level knobs for the default transport.
#[derive(Clone, Debug)]
pub(crate) struct TransportOptions {
    pub(crate) connect_timeout: Duration,
    pub(crate) pool_idle_timeout: Duration,
    pub(crate) pool_max_idle_per_host: usize,
    pub(crate) http2_only: bool,
    pub(crate) tls: TlsOptions,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 8,
            http2_only: false,
            tls: TlsOptions::default(),
        }
    }
}

type ConnectorResponse = <HttpConnector as Service<Uri>>::Response;
type ConnectorFuture =
    Pin<Box<dyn Future<Output = Result<ConnectorResponse, BoxError>> + Send>>;

/// Connector that consults the client's proxy slot per connection: bypassed
/// or unproxied targets dial direct, http/https proxies get a CONNECT
/// tunnel. Selection per connection is what makes rotating selectors
/// advance on every retry.
#[derive(Clone)]
pub(crate) struct ProxyConnector {
    direct: HttpConnector,
    slot: Arc<ProxySlot>,
}

impl ProxyConnector {
    pub(crate) fn new(slot: Arc<ProxySlot>, connect_timeout: Duration) -> Self {
        let mut direct = HttpConnector::new();
        direct.enforce_http(false);
        direct.set_connect_timeout(Some(connect_timeout));
        Self { direct, slot }
    }
}

impl Service<Uri> for ProxyConnector {
    type Response = ConnectorResponse;
    type Error = BoxError;
    type Future = ConnectorFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self.direct.poll_ready(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(error)) => Poll::Ready(Err(Box::new(error))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let selected = Url::parse(&dst.to_string())
            .ok()
            .map(|target| self.slot.select(&target))
            .unwrap_or(Ok(None));

        let proxy = match selected {
            Ok(proxy) => proxy,
            Err(error) => return Box::pin(std::future::ready(Err(Box::new(error) as BoxError))),
        };

        let Some(proxy) = proxy else {
            let connecting = self.direct.call(dst);
            return Box::pin(async move { connecting.await.map_err(|error| Box::new(error) as _) });
        };

        if proxy.scheme() == "socks5" {
            return Box::pin(std::future::ready(Err(
                "socks5 proxies require a socks-capable transport".into(),
            )));
        }

        let proxy_uri: Uri = match proxy.as_str().parse() {
            Ok(uri) => uri,
            Err(_) => {
                return Box::pin(std::future::ready(Err(format!(
                    "proxy URL is not a valid URI: {proxy}"
                )
                .into())));
            }
        };

        let mut tunnel = Tunnel::new(proxy_uri, self.direct.clone());
        if let Some(authorization) = proxy_authorization(&proxy) {
            tunnel = tunnel.with_auth(authorization);
        }
        let connecting = tunnel.call(normalize_tunnel_target_uri(dst));
        Box::pin(async move { connecting.await.map_err(|error| Box::new(error) as _) })
    }
}

fn proxy_authorization(proxy: &Url) -> Option<HeaderValue> {
    if proxy.username().is_empty() {
        return None;
    }
    use base64::Engine;
    let credentials = format!("{}:{}", proxy.username(), proxy.password().unwrap_or_default());
    let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
    HeaderValue::from_str(&format!("Basic {encoded}")).ok()
}

/// CONNECT targets need an explicit port; fill in the scheme default when
/// the URI omits it.
fn normalize_tunnel_target_uri(dst: Uri) -> Uri {
    if dst.port().is_some() {
        return dst;
    }

    let default_port = match dst.scheme_str() {
        Some("https") => 443,
        Some("http") => 80,
        _ => return dst,
    };
    let Some(host) = dst.host() else {
        return dst;
    };
    let authority_text = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{default_port}")
    } else {
        format!("{host}:{default_port}")
    };

    let Ok(authority) = authority_text.parse() else {
        return dst;
    };
    let original = dst.clone();
    let mut parts = dst.into_parts();
    parts.authority = Some(authority);
    Uri::from_parts(parts).unwrap_or(original)
}

type HyperRequestBody = BoxBody<Bytes, BoxError>;

/// The shipped transport: hyper's pooled client over the proxy-aware
/// connector with rustls.
pub struct HyperTransport {
    client: HyperClient<HttpsConnector<ProxyConnector>, HyperRequestBody>,
}

impl HyperTransport {
    pub(crate) fn new(options: &TransportOptions, slot: Arc<ProxySlot>) -> Result<Self, Error> {
        let connector = ProxyConnector::new(slot, options.connect_timeout);

        let mut root_store =
            rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        for pem in &options.tls.root_certificates_pem {
            let mut added = 0_usize;
            for item in rustls::pki_types::CertificateDer::pem_slice_iter(pem) {
                let certificate = item.map_err(|source| Error::InvalidTransport {
                    message: format!("failed to parse PEM root certificate: {source}"),
                })?;
                root_store
                    .add(certificate)
                    .map_err(|source| Error::InvalidTransport {
                        message: format!("failed to add root certificate: {source}"),
                    })?;
                added += 1;
            }
            if added == 0 {
                return Err(Error::InvalidTransport {
                    message: "no certificate blocks found in PEM root certificate".to_owned(),
                });
            }
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let https_builder = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http();
        let https = if options.http2_only {
            https_builder.enable_http2().wrap_connector(connector)
        } else {
            https_builder.enable_all_versions().wrap_connector(connector)
        };

        let mut builder = HyperClient::builder(TokioExecutor::new());
        builder
            .pool_idle_timeout(options.pool_idle_timeout)
            .pool_max_idle_per_host(options.pool_max_idle_per_host);
        if options.http2_only {
            builder.http2_only(true);
        }

        Ok(Self {
            client: builder.build(https),
        })
    }
}

#[async_trait::async_trait]
impl Transport for HyperTransport {
    async fn exchange(&self, request: OutboundRequest) -> Result<TransportResponse, Error> {
        let OutboundRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let uri: Uri = url.as_str().parse().map_err(|_| Error::RequestCreation {
            url: url.to_string(),
            message: "request URL is not a valid URI".to_owned(),
        })?;

        let mut http_request = http::Request::builder()
            .method(method.clone())
            .uri(uri)
            .body(into_hyper_body(body))
            .map_err(|source| Error::RequestCreation {
                url: url.to_string(),
                message: source.to_string(),
            })?;
        *http_request.headers_mut() = headers;

        let response = self.client.request(http_request).await.map_err(|error| {
            let kind = classify_transport_error(&error);
            Error::Transport {
                kind,
                method: method.clone(),
                url: url.to_string(),
                source: Box::new(error),
            }
        })?;

        let (parts, incoming) = response.into_parts();
        let body: ByteStream = Box::pin(BodyStream::new(incoming).filter_map(|frame| async move {
            match frame {
                Ok(frame) => frame.into_data().ok().map(Ok),
                Err(error) => Some(Err(Box::new(error) as BoxError)),
            }
        }));

        Ok(TransportResponse {
            status: parts.status,
            headers: parts.headers,
            url,
            body,
        })
    }
}

fn into_hyper_body(body: RequestBody) -> HyperRequestBody {
    match body {
        RequestBody::Empty => Empty::<Bytes>::new()
            .map_err(|never| match never {})
            .boxed(),
        RequestBody::Bytes(bytes) => Full::new(bytes).map_err(|never| match never {}).boxed(),
        RequestBody::Stream(stream) => {
            BodyExt::boxed(StreamBody::new(stream.map_ok(hyper::body::Frame::data)))
        }
    }
}
