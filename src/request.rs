use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE, HeaderName, HeaderValue, REFERER, USER_AGENT};
use http::{HeaderMap, Method};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::Auth;
use crate::body::{self, BodyPayload, FilePart};
use crate::client::Client;
use crate::codec;
use crate::cookie::{self, Cookie};
use crate::error::Error;
use crate::execute::Terminal;
use crate::middleware::{Middleware, Next};
use crate::response::Response;
use crate::retry::{BackoffStrategy, RetryConfig, RetryPredicate};
use crate::stream::{StreamCallback, StreamCallbacks, StreamDoneCallback, StreamErrCallback};
use crate::transport::OutboundRequest;
use crate::util;

/// Per-request accumulator produced by the client's verb factories and
/// consumed by [`RequestBuilder::send`].
///
/// Cloning copies headers, cookies, queries, path params, form fields, the
/// multipart boundary and the timeout; the body, files, stream callbacks,
/// per-request middlewares, retry overrides and cancellation token are
/// deliberately left behind (they may be one-shot or non-idempotent).
pub struct RequestBuilder {
    client: Client,
    method: Method,
    path: String,
    pub(crate) path_params: HashMap<String, String>,
    pub(crate) queries: Vec<(String, String)>,
    pub(crate) headers: HeaderMap,
    pub(crate) cookies: Vec<Cookie>,
    pub(crate) form_fields: Vec<(String, String)>,
    pub(crate) form_files: Vec<FilePart>,
    boundary: Option<String>,
    pub(crate) body: Option<BodyPayload>,
    timeout: Option<Duration>,
    pub(crate) max_retries: Option<usize>,
    backoff: Option<BackoffStrategy>,
    retry_if: Option<RetryPredicate>,
    middlewares: Vec<Arc<dyn Middleware>>,
    auth: Option<Auth>,
    cancel: Option<CancellationToken>,
    pub(crate) stream: Option<StreamCallback>,
    stream_err: Option<StreamErrCallback>,
    stream_done: Option<StreamDoneCallback>,
}

impl RequestBuilder {
    pub(crate) fn new(client: Client, method: Method, path: impl Into<String>) -> Self {
        Self {
            client,
            method,
            path: path.into(),
            path_params: HashMap::new(),
            queries: Vec::new(),
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            form_fields: Vec::new(),
            form_files: Vec::new(),
            boundary: None,
            body: None,
            timeout: None,
            max_retries: None,
            backoff: None,
            retry_if: None,
            middlewares: Vec::new(),
            auth: None,
            cancel: None,
            stream: None,
            stream_err: None,
            stream_done: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Registers a value for a `{name}` placeholder in the path. Values are
    /// URL-path-escaped at send time; placeholders with no registered value
    /// stay literal in the final URL.
    pub fn path_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(key.into(), value.into());
        self
    }

    pub fn path_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.path_params
            .extend(params.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    pub fn del_path_param<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            self.path_params.remove(key.as_ref());
        }
        self
    }

    /// Appends one query pair. At send time builder queries replace any
    /// same-key values already embedded in the URL.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.queries.push((key.into(), value.into()));
        self
    }

    pub fn queries<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.queries
            .extend(pairs.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    /// Appends query pairs from a struct with serde field attributes.
    pub fn query_struct<T>(mut self, params: &T) -> Result<Self, Error>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_urlencoded::to_string(params).map_err(|source| Error::Encode {
            content_type: "application/x-www-form-urlencoded",
            source: Box::new(source),
        })?;
        self.queries.extend(
            url::form_urlencoded::parse(encoded.as_bytes())
                .map(|(name, value)| (name.into_owned(), value.into_owned())),
        );
        Ok(self)
    }

    pub fn del_query<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            let key = key.as_ref();
            self.queries.retain(|(name, _)| name != key);
        }
        self
    }

    /// Sets a header, replacing builder-level values for the same name.
    /// Client default headers are layered underneath at send time, so a
    /// same-named default still goes out alongside this one; use
    /// `del_header` plus the client setters to reshape defaults.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header without replacing existing builder values.
    pub fn add_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Parses and sets a header from string name/value.
    pub fn try_header(self, name: &str, value: &str) -> Result<Self, Error> {
        let name = util::parse_header_name(name)?;
        let value = util::parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    /// Bulk-sets headers; each name in the map replaces builder values.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        let mut current_name: Option<HeaderName> = None;
        for (name, value) in headers {
            if let Some(name) = name {
                self.headers.remove(&name);
                current_name = Some(name);
            }
            if let Some(name) = &current_name {
                self.headers.append(name.clone(), value);
            }
        }
        self
    }

    pub fn del_header<I>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = HeaderName>,
    {
        for name in names {
            self.headers.remove(&name);
        }
        self
    }

    pub fn content_type(self, value: HeaderValue) -> Self {
        self.header(CONTENT_TYPE, value)
    }

    pub fn accept(self, value: HeaderValue) -> Self {
        self.header(ACCEPT, value)
    }

    pub fn user_agent(self, value: HeaderValue) -> Self {
        self.header(USER_AGENT, value)
    }

    pub fn referer(self, value: HeaderValue) -> Self {
        self.header(REFERER, value)
    }

    /// Appends a cookie; client default cookies are sent first, builder
    /// cookies after them.
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push(Cookie::new(name, value));
        self
    }

    pub fn cookies<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.cookies
            .extend(pairs.into_iter().map(|(name, value)| Cookie::new(name, value)));
        self
    }

    /// Removes every cookie whose name matches any of the given keys in a
    /// single pass, so consecutive matches are handled correctly.
    pub fn del_cookie<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys: Vec<String> = keys.into_iter().map(|key| key.as_ref().to_owned()).collect();
        self.cookies.retain(|cookie| !keys.contains(&cookie.name));
        self
    }

    /// Sets a deferred body whose encoding is picked at send time from the
    /// explicit `Content-Type` header or the payload's shape.
    pub fn body(mut self, payload: impl Into<BodyPayload>) -> Self {
        self.body = Some(payload.into());
        self
    }

    /// Captures a typed value to be encoded by the effective content type.
    pub fn body_struct<T>(mut self, value: &T) -> Result<Self, Error>
    where
        T: Serialize + ?Sized,
    {
        self.body = Some(BodyPayload::from_struct(value)?);
        Ok(self)
    }

    /// Encodes the value as JSON now and sets the `Content-Type` header.
    pub fn json_body<T>(mut self, value: &T) -> Result<Self, Error>
    where
        T: Serialize + ?Sized,
    {
        let encoded = self.client.codecs().encode_json(value)?;
        self.body = Some(BodyPayload::Binary(encoded));
        Ok(self.content_type(HeaderValue::from_static("application/json")))
    }

    /// Encodes the value as XML now and sets the `Content-Type` header.
    pub fn xml_body<T>(mut self, value: &T) -> Result<Self, Error>
    where
        T: Serialize + ?Sized,
    {
        let encoded = codec::encode_xml(value)?;
        self.body = Some(BodyPayload::Binary(encoded));
        Ok(self.content_type(HeaderValue::from_static("application/xml")))
    }

    /// Encodes the value as YAML now and sets the `Content-Type` header.
    pub fn yaml_body<T>(mut self, value: &T) -> Result<Self, Error>
    where
        T: Serialize + ?Sized,
    {
        let encoded = self.client.codecs().encode_yaml(value)?;
        self.body = Some(BodyPayload::Binary(encoded));
        Ok(self.content_type(HeaderValue::from_static("application/yaml")))
    }

    pub fn text_body(mut self, text: impl Into<String>) -> Self {
        self.body = Some(BodyPayload::Text(text.into()));
        self.content_type(HeaderValue::from_static("text/plain"))
    }

    /// Raw bytes, content type left to inference or an explicit header.
    pub fn raw_body(mut self, bytes: impl Into<Bytes>) -> Self {
        self.body = Some(BodyPayload::Binary(bytes.into()));
        self
    }

    pub fn form_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form_fields.push((key.into(), value.into()));
        self
    }

    pub fn form_fields<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.form_fields
            .extend(pairs.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    /// Appends form fields from a struct with serde field attributes.
    pub fn form_struct<T>(mut self, fields: &T) -> Result<Self, Error>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_urlencoded::to_string(fields).map_err(|source| Error::Encode {
            content_type: "application/x-www-form-urlencoded",
            source: Box::new(source),
        })?;
        self.form_fields.extend(
            url::form_urlencoded::parse(encoded.as_bytes())
                .map(|(name, value)| (name.into_owned(), value.into_owned())),
        );
        Ok(self)
    }

    pub fn del_form_field<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            let key = key.as_ref();
            self.form_fields.retain(|(name, _)| name != key);
        }
        self
    }

    /// Adds a file part; any file present switches the form to multipart.
    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content: impl Into<crate::body::FileContent>,
    ) -> Self {
        self.form_files.push(FilePart::new(name, file_name, content));
        self
    }

    pub fn files<I>(mut self, parts: I) -> Self
    where
        I: IntoIterator<Item = FilePart>,
    {
        self.form_files.extend(parts);
        self
    }

    /// Removes every file whose form name matches any of the given keys in
    /// a single pass.
    pub fn del_file<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys: Vec<String> = keys.into_iter().map(|key| key.as_ref().to_owned()).collect();
        self.form_files.retain(|file| !keys.contains(&file.name));
        self
    }

    /// Custom multipart boundary; a random one is generated otherwise.
    pub fn multipart_boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    /// Deadline for the whole send, including retries and body buffering.
    /// Falls back to the client's default timeout when unset.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn retry_strategy(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn retry_if(mut self, retry_if: RetryPredicate) -> Self {
        self.retry_if = Some(retry_if);
        self
    }

    /// Appends a request-level middleware; these run inside the client's
    /// middlewares and outside the terminal retry engine.
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Overrides the client's auth for this request. Invalid (empty)
    /// credentials are ignored.
    pub fn auth(mut self, auth: Auth) -> Self {
        if auth.is_valid() {
            self.auth = Some(auth);
        }
        self
    }

    /// Token observed before every attempt and during backoff waits;
    /// canceling it aborts the send with [`Error::Canceled`].
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Switches the response to streaming mode: the callback receives each
    /// newline-delimited record on a background worker.
    pub fn stream(mut self, callback: StreamCallback) -> Self {
        self.stream = Some(callback);
        self
    }

    pub fn stream_err(mut self, callback: StreamErrCallback) -> Self {
        self.stream_err = Some(callback);
        self
    }

    pub fn stream_done(mut self, callback: StreamDoneCallback) -> Self {
        self.stream_done = Some(callback);
        self
    }

    /// Executes the request: encodes the body, resolves the URL, layers
    /// auth/headers/cookies, runs the middleware chain around the retry
    /// engine, and wraps the outcome as a [`Response`].
    pub async fn send(mut self) -> Result<Response, Error> {
        let snapshot = self.client.snapshot();
        let transport = self.client.transport_handle();

        let explicit_content_type = self
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let prepared = body::prepare_body(
            &self.form_fields,
            std::mem::take(&mut self.form_files),
            self.boundary.as_deref(),
            self.body.take(),
            explicit_content_type.as_deref(),
            &snapshot.codecs,
        )
        .await?;
        if let Some(content_type) = &prepared.content_type {
            let value = util::parse_header_value(CONTENT_TYPE.as_str(), content_type)?;
            self.headers.insert(CONTENT_TYPE, value);
        }

        let prepared_path = util::substitute_path_params(&self.path, &self.path_params);
        let raw_url = format!("{}{}", snapshot.base_url, prepared_path);
        let mut url = Url::parse(&raw_url).map_err(|source| Error::RequestCreation {
            url: raw_url.clone(),
            message: source.to_string(),
        })?;
        util::overlay_queries(&mut url, &self.queries);

        let timeout = self.timeout.or(snapshot.timeout);
        let deadline = timeout.map(|timeout| tokio::time::Instant::now() + timeout);
        let cancel = self.cancel.clone().unwrap_or_default();

        let mut headers = HeaderMap::new();
        if let Some(auth) = self.auth.clone().or_else(|| snapshot.auth.clone()) {
            auth.apply(&mut headers);
        }
        for (name, value) in &snapshot.headers {
            headers.append(name.clone(), value.clone());
        }
        for (name, value) in &self.headers {
            headers.append(name.clone(), value.clone());
        }

        let mut all_cookies = snapshot.cookies.clone();
        all_cookies.extend(self.cookies.iter().cloned());
        cookie::fold_into_header(&mut headers, &all_cookies);

        let request = OutboundRequest {
            method: self.method.clone(),
            url,
            headers,
            body: prepared.body,
        };

        let mut stack = snapshot.middlewares.clone();
        stack.extend(self.middlewares.iter().cloned());

        let retry = RetryConfig {
            max_retries: self.max_retries.unwrap_or(snapshot.retry.max_retries),
            backoff: self
                .backoff
                .clone()
                .unwrap_or_else(|| snapshot.retry.backoff.clone()),
            retry_if: self
                .retry_if
                .clone()
                .unwrap_or_else(|| snapshot.retry.retry_if.clone()),
        };
        let terminal = Terminal {
            transport,
            retry,
            redirect: snapshot.redirect.clone(),
            deadline,
            timeout,
            cancel: cancel.clone(),
        };

        let response = Next::new(&stack, &terminal).run(request).await?;

        match self.stream.take() {
            Some(chunk) => Ok(Response::streaming(
                response,
                snapshot.codecs,
                StreamCallbacks {
                    chunk,
                    error: self.stream_err.take(),
                    done: self.stream_done.take(),
                },
                cancel,
            )),
            None => Response::buffered(response, snapshot.codecs, deadline).await,
        }
    }
}

impl Clone for RequestBuilder {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            method: self.method.clone(),
            path: self.path.clone(),
            path_params: self.path_params.clone(),
            queries: self.queries.clone(),
            headers: self.headers.clone(),
            cookies: self.cookies.clone(),
            form_fields: self.form_fields.clone(),
            form_files: Vec::new(),
            boundary: self.boundary.clone(),
            body: None,
            timeout: self.timeout,
            max_retries: None,
            backoff: None,
            retry_if: None,
            middlewares: Vec::new(),
            auth: None,
            cancel: None,
            stream: None,
            stream_err: None,
            stream_done: None,
        }
    }
}
