use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::middleware::{Middleware, Next};
use crate::transport::{OutboundRequest, TransportResponse};

/// Storage backend for [`CacheMiddleware`].
pub trait Cacher: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);
    fn delete(&self, key: &str);
}

/// Serializable record of a cached exchange.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: String,
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Caches 200-status GET responses under `path?query` keys for the
/// configured TTL; hits never reach the layers below this middleware.
pub struct CacheMiddleware {
    cache: Arc<dyn Cacher>,
    ttl: Duration,
}

impl CacheMiddleware {
    pub fn new(cache: Arc<dyn Cacher>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }
}

#[async_trait::async_trait]
impl Middleware for CacheMiddleware {
    async fn handle(
        &self,
        request: OutboundRequest,
        next: Next<'_>,
    ) -> Result<TransportResponse, Error> {
        if request.method != Method::GET {
            return next.run(request).await;
        }

        let key = cache_key(&request);
        let url = request.url.clone();
        if let Some(data) = self.cache.get(&key) {
            match serde_json::from_slice::<CachedResponse>(&data) {
                Ok(cached) => {
                    tracing::debug!(url = %url, key = %key, "cache hit");
                    return Ok(response_from_cache(cached, url));
                }
                Err(error) => {
                    tracing::warn!(key = %key, error = %error, "dropping undecodable cache entry");
                    self.cache.delete(&key);
                }
            }
        }

        let mut response = next.run(request).await?;

        if response.status == StatusCode::OK {
            let body = response.read_body().await?;
            let record = CachedResponse {
                status: format!(
                    "{} {}",
                    response.status.as_u16(),
                    response.status.canonical_reason().unwrap_or_default()
                ),
                status_code: response.status.as_u16(),
                headers: response
                    .headers
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|value| (name.as_str().to_owned(), value.to_owned()))
                    })
                    .collect(),
                body: body.to_vec(),
            };
            match serde_json::to_vec(&record) {
                Ok(data) => {
                    self.cache.set(&key, data, self.ttl);
                    tracing::debug!(url = %url, key = %key, "cached response");
                }
                Err(error) => tracing::warn!(key = %key, error = %error, "failed to encode cache entry"),
            }
        }

        Ok(response)
    }
}

fn cache_key(request: &OutboundRequest) -> String {
    match request.url.query() {
        Some(query) => format!("{}?{query}", request.url.path()),
        None => request.url.path().to_owned(),
    }
}

fn response_from_cache(cached: CachedResponse, url: url::Url) -> TransportResponse {
    let status = StatusCode::from_u16(cached.status_code).unwrap_or(StatusCode::OK);
    let mut headers = HeaderMap::new();
    for (name, value) in cached.headers {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(&value),
        ) {
            headers.append(name, value);
        }
    }
    TransportResponse::buffered(status, headers, url, bytes::Bytes::from(cached.body))
}

struct CacheEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-memory [`Cacher`] with TTL expiry. One background task sweeps
/// expired entries every minute until [`MemoryCache::close`] is called.
/// Construct inside a tokio runtime.
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    shutdown: CancellationToken,
}

impl MemoryCache {
    pub fn new() -> Self {
        let entries: Arc<RwLock<HashMap<String, CacheEntry>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let sweeper_entries = entries.clone();
        let sweeper_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sweeper_shutdown.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {
                        let now = Instant::now();
                        let mut entries = write_entries(&sweeper_entries);
                        entries.retain(|_, entry| entry.expires_at > now);
                    }
                }
            }
        });

        Self { entries, shutdown }
    }

    /// Stops the background sweeper. Entries stay readable until dropped.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Cacher for MemoryCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = entries.get(key)?;
        // Expired entries read as misses; the sweeper deletes them.
        if Instant::now() < entry.expires_at {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let mut entries = write_entries(&self.entries);
        entries.insert(
            key.to_owned(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn delete(&self, key: &str) {
        let mut entries = write_entries(&self.entries);
        entries.remove(key);
    }
}

fn write_entries(
    entries: &Arc<RwLock<HashMap<String, CacheEntry>>>,
) -> std::sync::RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
    match entries.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
