use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use http::header::{ACCEPT, CONTENT_TYPE, HeaderName, HeaderValue, REFERER, USER_AGENT};
use http::{HeaderMap, Method};

use crate::auth::Auth;
use crate::codec::{CodecSet, MarshalFn, UnmarshalFn};
use crate::cookie::Cookie;
use crate::error::{BoxError, Error};
use crate::middleware::Middleware;
use crate::proxy::{ProxySelector, ProxySlot};
use crate::redirect::RedirectPolicy;
use crate::request::RequestBuilder;
use crate::retry::{BackoffStrategy, RetryConfig, RetryPredicate, default_retry_predicate};
use crate::transport::{HyperTransport, TlsOptions, Transport, TransportOptions};

/// Initial configuration for [`Client::create`]. Every field has a useful
/// default; construct with struct-update syntax:
///
/// ```no_run
/// # use courier::{Client, Config};
/// let client = Client::create(Config {
///     base_url: "https://api.example.com".into(),
///     max_retries: 2,
///     ..Config::default()
/// })?;
/// # Ok::<(), courier::Error>(())
/// ```
#[derive(Default)]
pub struct Config {
    /// Prepended verbatim to every request path.
    pub base_url: String,
    /// Default headers sent with each request, layered under builder headers.
    pub headers: HeaderMap,
    /// Default cookies sent with each request.
    pub cookies: HashMap<String, String>,
    /// Default deadline for each send; builder timeouts override it.
    pub timeout: Option<Duration>,
    /// Client middleware stack, outermost first.
    pub middlewares: Vec<Arc<dyn Middleware>>,
    /// Custom transport. Takes priority over `http2_only` and rules out the
    /// TLS and connection-pool knobs below.
    pub transport: Option<Arc<dyn Transport>>,
    pub auth: Option<Auth>,
    pub max_retries: usize,
    /// Defaults to a constant one-second backoff.
    pub backoff: Option<BackoffStrategy>,
    /// Defaults to retrying on status >= 500 (errors always retry).
    pub retry_if: Option<RetryPredicate>,
    /// No policy means 3xx responses are returned to the caller unfollowed.
    pub redirect: Option<RedirectPolicy>,
    pub proxy: Option<ProxySelector>,
    /// Restrict the default transport to HTTP/2.
    pub http2_only: bool,
    pub tls: TlsOptions,
    pub connect_timeout: Option<Duration>,
    pub pool_idle_timeout: Option<Duration>,
    pub pool_max_idle_per_host: Option<usize>,
}

pub(crate) struct ClientState {
    pub(crate) base_url: String,
    pub(crate) headers: HeaderMap,
    pub(crate) cookies: Vec<Cookie>,
    pub(crate) middlewares: Vec<Arc<dyn Middleware>>,
    pub(crate) codecs: CodecSet,
    pub(crate) auth: Option<Auth>,
    pub(crate) retry: RetryConfig,
    pub(crate) redirect: Option<RedirectPolicy>,
    pub(crate) timeout: Option<Duration>,
}

/// A point-in-time copy of the client configuration one `send()` runs
/// against. Two requests racing a setter may observe different snapshots,
/// never a torn one.
pub(crate) type ClientSnapshot = ClientState;

struct ClientCore {
    state: RwLock<ClientState>,
    transport: RwLock<Arc<dyn Transport>>,
    proxy_slot: Arc<ProxySlot>,
    transport_options: Mutex<TransportOptions>,
    custom_transport: AtomicBool,
}

/// Shared, concurrency-safe HTTP client. Cloning is cheap and clones share
/// configuration: setters take the write lock, request sends snapshot under
/// the read lock.
#[derive(Clone)]
pub struct Client {
    core: Arc<ClientCore>,
}

impl Client {
    /// Builds a client. Defaults: JSON/YAML codecs, constant one-second
    /// backoff, retry on status >= 500, no redirect policy, no proxy.
    /// Transport resolution: custom transport > `http2_only` > default.
    pub fn create(config: Config) -> Result<Self, Error> {
        let proxy_slot = Arc::new(ProxySlot::default());
        if let Some(selector) = config.proxy {
            proxy_slot.set(selector);
        }

        let mut transport_options = TransportOptions::default();
        if let Some(connect_timeout) = config.connect_timeout {
            transport_options.connect_timeout = connect_timeout;
        }
        if let Some(pool_idle_timeout) = config.pool_idle_timeout {
            transport_options.pool_idle_timeout = pool_idle_timeout;
        }
        if let Some(pool_max_idle_per_host) = config.pool_max_idle_per_host {
            transport_options.pool_max_idle_per_host = pool_max_idle_per_host;
        }
        transport_options.http2_only = config.http2_only;
        transport_options.tls = config.tls.clone();

        let custom_transport = config.transport.is_some();
        if custom_transport && !config.tls.is_default() {
            return Err(Error::InvalidTransport {
                message: "TLS options require the default transport".to_owned(),
            });
        }

        let transport: Arc<dyn Transport> = match config.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new(&transport_options, proxy_slot.clone())?),
        };

        let mut cookies: Vec<Cookie> = config
            .cookies
            .into_iter()
            .map(|(name, value)| Cookie::new(name, value))
            .collect();
        cookies.sort_by(|left, right| left.name.cmp(&right.name));

        let state = ClientState {
            base_url: config.base_url,
            headers: config.headers,
            cookies,
            middlewares: config.middlewares,
            codecs: CodecSet::default(),
            auth: config.auth.filter(Auth::is_valid),
            retry: RetryConfig {
                max_retries: config.max_retries,
                backoff: config
                    .backoff
                    .unwrap_or_else(|| BackoffStrategy::constant(Duration::from_secs(1))),
                retry_if: config.retry_if.unwrap_or_else(default_retry_predicate),
            },
            redirect: config.redirect,
            timeout: config.timeout,
        };

        Ok(Self {
            core: Arc::new(ClientCore {
                state: RwLock::new(state),
                transport: RwLock::new(transport),
                proxy_slot,
                transport_options: Mutex::new(transport_options),
                custom_transport: AtomicBool::new(custom_transport),
            }),
        })
    }

    /// Shorthand for [`Client::create`] with only a base URL.
    pub fn url(base_url: impl Into<String>) -> Result<Self, Error> {
        Self::create(Config {
            base_url: base_url.into(),
            ..Config::default()
        })
    }

    pub(crate) fn snapshot(&self) -> ClientSnapshot {
        let state = self.read_state();
        ClientState {
            base_url: state.base_url.clone(),
            headers: state.headers.clone(),
            cookies: state.cookies.clone(),
            middlewares: state.middlewares.clone(),
            codecs: state.codecs.clone(),
            auth: state.auth.clone(),
            retry: state.retry.clone(),
            redirect: state.redirect.clone(),
            timeout: state.timeout,
        }
    }

    pub(crate) fn codecs(&self) -> CodecSet {
        self.read_state().codecs.clone()
    }

    pub(crate) fn transport_handle(&self) -> Arc<dyn Transport> {
        match self.core.transport.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_base_url(&self, base_url: impl Into<String>) -> &Self {
        self.write_state().base_url = base_url.into();
        self
    }

    pub fn set_default_header(&self, name: HeaderName, value: HeaderValue) -> &Self {
        self.write_state().headers.insert(name, value);
        self
    }

    pub fn add_default_header(&self, name: HeaderName, value: HeaderValue) -> &Self {
        self.write_state().headers.append(name, value);
        self
    }

    pub fn try_set_default_header(&self, name: &str, value: &str) -> Result<&Self, Error> {
        let name = crate::util::parse_header_name(name)?;
        let value = crate::util::parse_header_value(name.as_str(), value)?;
        Ok(self.set_default_header(name, value))
    }

    pub fn del_default_header(&self, name: &HeaderName) -> &Self {
        self.write_state().headers.remove(name);
        self
    }

    pub fn set_default_content_type(&self, value: HeaderValue) -> &Self {
        self.set_default_header(CONTENT_TYPE, value)
    }

    pub fn set_default_accept(&self, value: HeaderValue) -> &Self {
        self.set_default_header(ACCEPT, value)
    }

    pub fn set_default_user_agent(&self, value: HeaderValue) -> &Self {
        self.set_default_header(USER_AGENT, value)
    }

    pub fn set_default_referer(&self, value: HeaderValue) -> &Self {
        self.set_default_header(REFERER, value)
    }

    pub fn set_default_cookie(&self, name: impl Into<String>, value: impl Into<String>) -> &Self {
        self.write_state().cookies.push(Cookie::new(name, value));
        self
    }

    pub fn set_default_cookies(&self, cookies: &HashMap<String, String>) -> &Self {
        let mut sorted: Vec<_> = cookies.iter().collect();
        sorted.sort();
        for (name, value) in sorted {
            self.set_default_cookie(name.clone(), value.clone());
        }
        self
    }

    pub fn del_default_cookie(&self, name: &str) -> &Self {
        self.write_state().cookies.retain(|cookie| cookie.name != name);
        self
    }

    /// Appends middleware to the client chain (outermost layers).
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) -> &Self {
        self.write_state().middlewares.push(middleware);
        self
    }

    /// Sets the client auth; invalid (empty) credentials are ignored.
    pub fn set_auth(&self, auth: Auth) -> &Self {
        if auth.is_valid() {
            self.write_state().auth = Some(auth);
        }
        self
    }

    pub fn set_max_retries(&self, max_retries: usize) -> &Self {
        self.write_state().retry.max_retries = max_retries;
        self
    }

    pub fn set_retry_strategy(&self, backoff: BackoffStrategy) -> &Self {
        self.write_state().retry.backoff = backoff;
        self
    }

    pub fn set_retry_if(&self, retry_if: RetryPredicate) -> &Self {
        self.write_state().retry.retry_if = retry_if;
        self
    }

    pub fn set_redirect_policy(&self, policy: RedirectPolicy) -> &Self {
        self.write_state().redirect = Some(policy);
        self
    }

    pub fn set_default_timeout(&self, timeout: Duration) -> &Self {
        self.write_state().timeout = Some(timeout);
        self
    }

    pub fn set_json_marshal(
        &self,
        marshal: impl Fn(&serde_json::Value) -> Result<Vec<u8>, BoxError> + Send + Sync + 'static,
    ) -> &Self {
        self.write_state()
            .codecs
            .with_json_marshal(Arc::new(marshal) as MarshalFn);
        self
    }

    pub fn set_json_unmarshal(
        &self,
        unmarshal: impl Fn(&[u8]) -> Result<serde_json::Value, BoxError> + Send + Sync + 'static,
    ) -> &Self {
        self.write_state()
            .codecs
            .with_json_unmarshal(Arc::new(unmarshal) as UnmarshalFn);
        self
    }

    pub fn set_yaml_marshal(
        &self,
        marshal: impl Fn(&serde_json::Value) -> Result<Vec<u8>, BoxError> + Send + Sync + 'static,
    ) -> &Self {
        self.write_state()
            .codecs
            .with_yaml_marshal(Arc::new(marshal) as MarshalFn);
        self
    }

    pub fn set_yaml_unmarshal(
        &self,
        unmarshal: impl Fn(&[u8]) -> Result<serde_json::Value, BoxError> + Send + Sync + 'static,
    ) -> &Self {
        self.write_state()
            .codecs
            .with_yaml_unmarshal(Arc::new(unmarshal) as UnmarshalFn);
        self
    }

    /// Replaces the transport. Proxy and TLS setters no longer apply after
    /// this; the new transport owns those concerns.
    pub fn set_transport(&self, transport: Arc<dyn Transport>) -> &Self {
        match self.core.transport.write() {
            Ok(mut guard) => *guard = transport,
            Err(poisoned) => *poisoned.into_inner() = transport,
        }
        self.core.custom_transport.store(true, Ordering::SeqCst);
        self
    }

    /// Rebuilds the default transport with the given TLS options. Rejected
    /// with [`Error::InvalidTransport`] once a custom transport is set.
    pub fn set_tls_options(&self, tls: TlsOptions) -> Result<&Self, Error> {
        if self.core.custom_transport.load(Ordering::SeqCst) {
            return Err(Error::InvalidTransport {
                message: "TLS options require the default transport".to_owned(),
            });
        }
        let options = {
            let mut guard = match self.core.transport_options.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.tls = tls;
            guard.clone()
        };
        let rebuilt: Arc<dyn Transport> =
            Arc::new(HyperTransport::new(&options, self.core.proxy_slot.clone())?);
        match self.core.transport.write() {
            Ok(mut guard) => *guard = rebuilt,
            Err(poisoned) => *poisoned.into_inner() = rebuilt,
        }
        Ok(self)
    }

    /// Routes requests through a single proxy (http, https or socks5).
    pub fn set_proxy(&self, proxy_url: &str) -> Result<&Self, Error> {
        self.install_proxy(ProxySelector::single(proxy_url)?)
    }

    /// Single proxy plus a NO_PROXY-style bypass list.
    pub fn set_proxy_with_bypass(&self, proxy_url: &str, bypass: &str) -> Result<&Self, Error> {
        self.install_proxy(ProxySelector::with_bypass(proxy_url, bypass)?)
    }

    /// Proxy from `HTTP_PROXY` / `HTTPS_PROXY` / `NO_PROXY`.
    pub fn set_proxy_from_env(&self) -> Result<&Self, Error> {
        self.install_proxy(ProxySelector::from_env())
    }

    /// Round-robin rotation over several proxies; retries advance the
    /// rotation because selection happens per connection.
    pub fn set_proxies<I, S>(&self, proxy_urls: I) -> Result<&Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.install_proxy(ProxySelector::round_robin(proxy_urls)?)
    }

    /// Uniform random proxy per connection.
    pub fn set_random_proxies<I, S>(&self, proxy_urls: I) -> Result<&Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.install_proxy(ProxySelector::random(proxy_urls)?)
    }

    /// Arbitrary selector; return `Ok(None)` for a direct connection.
    pub fn set_proxy_selector(&self, selector: ProxySelector) -> Result<&Self, Error> {
        self.install_proxy(selector)
    }

    /// Clears any configured proxy. A no-op on custom transports.
    pub fn remove_proxy(&self) -> &Self {
        self.core.proxy_slot.clear();
        self
    }

    fn install_proxy(&self, selector: ProxySelector) -> Result<&Self, Error> {
        if self.core.custom_transport.load(Ordering::SeqCst) {
            return Err(Error::InvalidTransport {
                message: "proxy selection requires the default transport".to_owned(),
            });
        }
        self.core.proxy_slot.set(selector);
        Ok(self)
    }

    pub fn get(&self, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::GET, path)
    }

    pub fn post(&self, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::POST, path)
    }

    pub fn put(&self, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::PUT, path)
    }

    pub fn delete(&self, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::DELETE, path)
    }

    pub fn patch(&self, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::PATCH, path)
    }

    pub fn options(&self, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::OPTIONS, path)
    }

    pub fn head(&self, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::HEAD, path)
    }

    pub fn connect(&self, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::CONNECT, path)
    }

    pub fn trace(&self, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::TRACE, path)
    }

    pub fn custom(&self, method: Method, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), method, path)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, ClientState> {
        match self.core.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, ClientState> {
        match self.core.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read_state();
        formatter
            .debug_struct("Client")
            .field("base_url", &state.base_url)
            .field("max_retries", &state.retry.max_retries)
            .finish()
    }
}
