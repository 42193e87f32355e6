use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use rand::Rng;
use url::Url;

use crate::error::Error;
use crate::util::normalize_host;

/// Maps an outgoing request's target to an optional proxy URL.
///
/// Selection happens per connection, so retries against a rotating selector
/// naturally advance the rotation.
#[derive(Clone)]
pub struct ProxySelector {
    inner: Inner,
}

#[derive(Clone)]
enum Inner {
    Single(Url),
    Bypass { proxy: Url, rules: NoProxy },
    Env,
    RoundRobin { proxies: Arc<Vec<Url>>, cursor: Arc<AtomicU64> },
    Random(Arc<Vec<Url>>),
    Custom(Arc<dyn Fn(&Url) -> Result<Option<Url>, Error> + Send + Sync>),
}

impl ProxySelector {
    /// Routes every request through one proxy. Schemes http, https and
    /// socks5 are accepted.
    pub fn single(proxy_url: &str) -> Result<Self, Error> {
        Ok(Self {
            inner: Inner::Single(validate_proxy_url(proxy_url)?),
        })
    }

    /// Like [`ProxySelector::single`], with a NO_PROXY-style bypass list:
    /// comma-separated domains (leading dot restricts to subdomains), bare
    /// IPs, CIDR subnets, and `*` for bypass-everything.
    pub fn with_bypass(proxy_url: &str, bypass: &str) -> Result<Self, Error> {
        Ok(Self {
            inner: Inner::Bypass {
                proxy: validate_proxy_url(proxy_url)?,
                rules: NoProxy::parse(bypass),
            },
        })
    }

    /// Defers to `HTTP_PROXY` / `HTTPS_PROXY` / `NO_PROXY` (and their
    /// lowercase variants), read at selection time.
    pub fn from_env() -> Self {
        Self { inner: Inner::Env }
    }

    /// Cycles through the proxies in order with an atomic cursor shared
    /// across all clones, so the rotation is monotonic across threads.
    pub fn round_robin<I, S>(proxy_urls: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            inner: Inner::RoundRobin {
                proxies: Arc::new(validate_proxy_urls(proxy_urls)?),
                cursor: Arc::new(AtomicU64::new(0)),
            },
        })
    }

    /// Picks a uniformly random proxy per selection.
    pub fn random<I, S>(proxy_urls: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            inner: Inner::Random(Arc::new(validate_proxy_urls(proxy_urls)?)),
        })
    }

    /// Arbitrary selection function; return `Ok(None)` for a direct
    /// connection.
    pub fn custom(select: impl Fn(&Url) -> Result<Option<Url>, Error> + Send + Sync + 'static) -> Self {
        Self {
            inner: Inner::Custom(Arc::new(select)),
        }
    }

    /// Resolves the proxy for one target. `Ok(None)` means connect direct.
    pub fn select(&self, target: &Url) -> Result<Option<Url>, Error> {
        match &self.inner {
            Inner::Single(proxy) => Ok(Some(proxy.clone())),
            Inner::Bypass { proxy, rules } => {
                let host = target.host_str().unwrap_or_default();
                if rules.matches(host) {
                    Ok(None)
                } else {
                    Ok(Some(proxy.clone()))
                }
            }
            Inner::Env => select_from_env(target),
            Inner::RoundRobin { proxies, cursor } => {
                let index = cursor.fetch_add(1, Ordering::Relaxed);
                Ok(Some(proxies[(index % proxies.len() as u64) as usize].clone()))
            }
            Inner::Random(proxies) => {
                let index = rand::rng().random_range(0..proxies.len());
                Ok(Some(proxies[index].clone()))
            }
            Inner::Custom(select) => select(target),
        }
    }
}

impl std::fmt::Debug for ProxySelector {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner {
            Inner::Single(_) => "single",
            Inner::Bypass { .. } => "bypass",
            Inner::Env => "env",
            Inner::RoundRobin { .. } => "round_robin",
            Inner::Random(_) => "random",
            Inner::Custom(_) => "custom",
        };
        formatter
            .debug_struct("ProxySelector")
            .field("kind", &kind)
            .finish()
    }
}

fn select_from_env(target: &Url) -> Result<Option<Url>, Error> {
    let no_proxy = read_env("NO_PROXY");
    if let Some(rules) = no_proxy.as_deref().map(NoProxy::parse)
        && rules.matches(target.host_str().unwrap_or_default())
    {
        return Ok(None);
    }

    let variable = if target.scheme() == "https" {
        read_env("HTTPS_PROXY")
    } else {
        read_env("HTTP_PROXY")
    };
    match variable {
        Some(raw) if !raw.trim().is_empty() => validate_proxy_url(raw.trim()).map(Some),
        _ => Ok(None),
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .or_else(|| std::env::var(name.to_ascii_lowercase()).ok())
}

/// Validates a proxy URL: parseable, scheme in {http, https, socks5}.
pub(crate) fn validate_proxy_url(raw: &str) -> Result<Url, Error> {
    let parsed = Url::parse(raw).map_err(|_| Error::InvalidProxyUrl {
        url: raw.to_owned(),
    })?;
    match parsed.scheme() {
        "http" | "https" | "socks5" => Ok(parsed),
        other => Err(Error::UnsupportedProxyScheme {
            scheme: other.to_owned(),
        }),
    }
}

fn validate_proxy_urls<I, S>(proxy_urls: I) -> Result<Vec<Url>, Error>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut proxies = Vec::new();
    for raw in proxy_urls {
        proxies.push(validate_proxy_url(raw.as_ref())?);
    }
    if proxies.is_empty() {
        return Err(Error::NoProxies);
    }
    Ok(proxies)
}

/// Parsed NO_PROXY bypass rules.
#[derive(Clone, Debug, Default)]
pub struct NoProxy {
    domains: Vec<String>,
    ips: Vec<IpAddr>,
    cidrs: Vec<Cidr>,
    wildcard: bool,
}

impl NoProxy {
    /// Parses a comma-separated bypass list. Entries are trimmed; empty
    /// entries are skipped; `*` short-circuits to bypass-everything.
    pub fn parse(bypass: &str) -> Self {
        let mut rules = Self::default();
        for entry in bypass.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if entry == "*" {
                rules.wildcard = true;
                return rules;
            }
            if let Some(cidr) = Cidr::parse(entry) {
                rules.cidrs.push(cidr);
                continue;
            }
            if let Ok(ip) = entry.parse::<IpAddr>() {
                rules.ips.push(ip);
                continue;
            }
            rules.domains.push(entry.to_ascii_lowercase());
        }
        rules
    }

    /// Whether a host (hostname or IP, optional `:port`) matches any rule.
    /// IP targets only consult IP/CIDR rules; hostnames only domain rules.
    pub fn matches(&self, host: &str) -> bool {
        if self.wildcard {
            return true;
        }

        let hostname = normalize_host(host);
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            return self.ips.contains(&ip) || self.cidrs.iter().any(|cidr| cidr.contains(ip));
        }

        self.domains.iter().any(|domain| {
            if domain.starts_with('.') {
                // ".example.com" matches subdomains only, never the apex.
                hostname.ends_with(domain.as_str())
            } else {
                hostname == *domain || hostname.ends_with(&format!(".{domain}"))
            }
        })
    }
}

/// CIDR prefix over v4 or v6 addresses. Hand-rolled prefix arithmetic; the
/// address families must match for containment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    fn parse(entry: &str) -> Option<Self> {
        let (address, prefix) = entry.split_once('/')?;
        let network: IpAddr = address.trim().parse().ok()?;
        let prefix: u8 = prefix.trim().parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max_prefix {
            return None;
        }
        Some(Self { network, prefix })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(network), IpAddr::V4(candidate)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(self.prefix))
                };
                u32::from_be_bytes(network.octets()) & mask
                    == u32::from_be_bytes(candidate.octets()) & mask
            }
            (IpAddr::V6(network), IpAddr::V6(candidate)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(self.prefix))
                };
                u128::from_be_bytes(network.octets()) & mask
                    == u128::from_be_bytes(candidate.octets()) & mask
            }
            _ => false,
        }
    }
}

/// Shared slot the default transport's connector consults per connection.
/// Swapping the selector on a live client affects in-flight clients
/// immediately, which is how proxy setters avoid rebuilding the transport.
#[derive(Debug, Default)]
pub(crate) struct ProxySlot {
    selector: RwLock<Option<ProxySelector>>,
}

impl ProxySlot {
    pub(crate) fn set(&self, selector: ProxySelector) {
        *self.write() = Some(selector);
    }

    pub(crate) fn clear(&self) {
        *self.write() = None;
    }

    pub(crate) fn select(&self, target: &Url) -> Result<Option<Url>, Error> {
        let guard = match self.selector.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(selector) => selector.select(target),
            None => Ok(None),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<ProxySelector>> {
        match self.selector.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
