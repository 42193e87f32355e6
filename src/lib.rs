//! `courier` is a general-purpose async HTTP client: a fluent request
//! builder, a composable middleware chain, a retrying terminal handler,
//! redirect policies, proxy rotation with NO_PROXY semantics, and
//! buffered or streaming responses with content-negotiated decoding.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use courier::{BackoffStrategy, Client, Config};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Item {
//!     id: String,
//! }
//!
//! # async fn demo() -> courier::Result<()> {
//! let client = Client::create(Config {
//!     base_url: "https://api.example.com".into(),
//!     max_retries: 2,
//!     backoff: Some(BackoffStrategy::exponential(
//!         Duration::from_millis(100),
//!         2.0,
//!         Duration::from_secs(2),
//!     )),
//!     ..Config::default()
//! })?;
//!
//! let response = client
//!     .post("/v1/items/{kind}")
//!     .path_param("kind", "demo")
//!     .json_body(&serde_json::json!({ "name": "demo" }))?
//!     .timeout(Duration::from_secs(5))
//!     .send()
//!     .await?;
//!
//! let item: Item = response.scan()?;
//! println!("created id={}", item.id);
//! # Ok(())
//! # }
//! ```
//!
//! Responses with status >= 400 are not errors; inspect them with
//! [`Response::is_error`] and friends. Transport failures, timeouts and
//! policy rejections surface as [`Error`], classifiable via
//! [`Error::is_timeout`] and [`Error::is_connection_error`].

mod auth;
mod body;
mod client;
mod codec;
mod cookie;
mod error;
mod execute;
mod middleware;
pub mod middlewares;
mod pool;
mod proxy;
mod redirect;
mod request;
mod response;
mod retry;
mod stream;
mod transport;
mod util;

pub use crate::auth::Auth;
pub use crate::body::{BodyPayload, FileContent, FilePart};
pub use crate::client::{Client, Config};
pub use crate::codec::{CodecSet, MarshalFn, UnmarshalFn, ValueCodec};
pub use crate::cookie::Cookie;
pub use crate::error::{BoxError, Error, ErrorCode, TransportErrorKind};
pub use crate::middleware::{Middleware, Next};
pub use crate::proxy::{NoProxy, ProxySelector};
pub use crate::redirect::{RedirectAttempt, RedirectPolicy, RedirectRecord};
pub use crate::request::RequestBuilder;
pub use crate::response::{Lines, Response};
pub use crate::retry::{BackoffStrategy, RetryPredicate, default_retry_predicate};
pub use crate::stream::{StreamCallback, StreamDoneCallback, StreamErrCallback};
pub use crate::transport::{
    ByteStream, HyperTransport, OutboundRequest, RequestBody, TlsOptions, Transport,
    TransportResponse,
};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Auth, BackoffStrategy, Client, Config, Error, ErrorCode, ProxySelector, RedirectPolicy,
        Response, Result,
    };
}

#[cfg(test)]
mod tests;
