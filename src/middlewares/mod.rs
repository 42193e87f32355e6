//! Reusable middleware: response caching, default-header injection, and
//! cookie injection.

mod cache;

pub use cache::{CacheMiddleware, CachedResponse, Cacher, MemoryCache};

use http::HeaderMap;

use crate::cookie::Cookie;
use crate::error::Error;
use crate::middleware::{Middleware, Next};
use crate::transport::{OutboundRequest, TransportResponse};

/// Adds the configured headers to every request passing through.
pub struct HeaderMiddleware {
    headers: HeaderMap,
}

impl HeaderMiddleware {
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }
}

#[async_trait::async_trait]
impl Middleware for HeaderMiddleware {
    async fn handle(
        &self,
        mut request: OutboundRequest,
        next: Next<'_>,
    ) -> Result<TransportResponse, Error> {
        for (name, value) in &self.headers {
            request.headers.append(name.clone(), value.clone());
        }
        next.run(request).await
    }
}

/// Adds the configured cookies to every request passing through.
pub struct CookieMiddleware {
    cookies: Vec<Cookie>,
}

impl CookieMiddleware {
    pub fn new(cookies: Vec<Cookie>) -> Self {
        Self { cookies }
    }
}

#[async_trait::async_trait]
impl Middleware for CookieMiddleware {
    async fn handle(
        &self,
        mut request: OutboundRequest,
        next: Next<'_>,
    ) -> Result<TransportResponse, Error> {
        crate::cookie::fold_into_header(&mut request.headers, &self.cookies);
        next.run(request).await
    }
}
