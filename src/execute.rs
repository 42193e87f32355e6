use std::sync::Arc;
use std::time::Duration;

use http::Method;
use http::header::LOCATION;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::redirect::{
    RedirectAttempt, RedirectPolicy, RedirectRecord, hop_headers, is_redirect_status,
};
use crate::retry::RetryConfig;
use crate::transport::{OutboundRequest, RequestBody, Transport, TransportResponse};

/// The innermost handler of the middleware chain: drives the retry loop,
/// and inside each attempt chases redirects under the configured policy.
pub(crate) struct Terminal {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) retry: RetryConfig,
    pub(crate) redirect: Option<RedirectPolicy>,
    pub(crate) deadline: Option<tokio::time::Instant>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: CancellationToken,
}

impl Terminal {
    pub(crate) async fn run(&self, mut request: OutboundRequest) -> Result<TransportResponse, Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        let max_retries = self.retry.max_retries;
        if max_retries < 1 {
            let attempt_request = request.clone_for_attempt();
            return self.exchange_once(attempt_request).await;
        }

        let total = max_retries + 1;
        let mut annotated: Vec<Error> = Vec::new();
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Canceled);
            }

            match self.exchange_once(request.clone_for_attempt()).await {
                Ok(response) => {
                    let should_retry = (self.retry.retry_if)(&request, &response);
                    if !should_retry || attempt == max_retries {
                        return Ok(response);
                    }
                    tracing::debug!(
                        attempt = attempt + 1,
                        status = response.status.as_u16(),
                        "retrying request after backoff"
                    );
                    drop(response);
                }
                Err(error) => {
                    tracing::debug!(attempt = attempt + 1, error = %error, "request attempt failed");
                    annotated.push(Error::Attempt {
                        attempt: attempt + 1,
                        total,
                        source: Box::new(error),
                    });
                    if attempt == max_retries {
                        return Err(finish_errors(annotated));
                    }
                }
            }

            self.wait_backoff(attempt, &request.method, &request.url).await?;
            attempt += 1;
        }
    }

    /// One attempt: a transport exchange plus the redirect chase. Every
    /// superseded response is dropped (closed) before the next hop.
    async fn exchange_once(&self, request: OutboundRequest) -> Result<TransportResponse, Error> {
        let mut current = request;
        let mut history: Vec<RedirectRecord> = Vec::new();

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Canceled);
            }

            let hop_request = current.clone_for_attempt();
            let response = self.exchange_bounded(hop_request).await?;

            let Some(policy) = &self.redirect else {
                return Ok(response);
            };
            if !is_redirect_status(response.status) {
                return Ok(response);
            }

            let Some(location) = response
                .headers
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
            else {
                return Err(Error::MissingRedirectLocation {
                    status: response.status.as_u16(),
                });
            };
            let next_url = current
                .url
                .join(&location)
                .map_err(|_| Error::InvalidRedirectLocation {
                    location: location.clone(),
                })?;

            let previous = RedirectRecord {
                method: current.method.clone(),
                url: current.url.clone(),
                headers: current.headers.clone(),
            };
            let next_headers = hop_headers(&previous, &next_url);
            history.push(previous);

            let mut attempt = RedirectAttempt {
                status: response.status,
                method: current.method.clone(),
                url: next_url,
                headers: next_headers,
                drop_body: false,
            };
            policy.apply(&mut attempt, &history)?;

            tracing::debug!(
                status = response.status.as_u16(),
                location = %attempt.url,
                "following redirect"
            );
            drop(response);

            let body = if attempt.drop_body {
                RequestBody::Empty
            } else {
                std::mem::replace(&mut current.body, RequestBody::Empty)
            };
            current = OutboundRequest {
                method: attempt.method,
                url: attempt.url,
                headers: attempt.headers,
                body,
            };
        }
    }

    async fn exchange_bounded(&self, request: OutboundRequest) -> Result<TransportResponse, Error> {
        let method = request.method.clone();
        let url = request.url.clone();
        let exchange = self.transport.exchange(request);

        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => Err(Error::Canceled),
                outcome = tokio::time::timeout_at(deadline, exchange) => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(self.timeout_error(&method, &url)),
                },
            },
            None => tokio::select! {
                _ = self.cancel.cancelled() => Err(Error::Canceled),
                result = exchange => result,
            },
        }
    }

    async fn wait_backoff(&self, attempt: usize, method: &Method, url: &Url) -> Result<(), Error> {
        let delay = self.retry.backoff.delay(attempt);
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => Err(Error::Canceled),
                _ = tokio::time::sleep_until(deadline) => Err(self.timeout_error(method, url)),
                _ = tokio::time::sleep(delay) => Ok(()),
            },
            None => tokio::select! {
                _ = self.cancel.cancelled() => Err(Error::Canceled),
                _ = tokio::time::sleep(delay) => Ok(()),
            },
        }
    }

    fn timeout_error(&self, method: &Method, url: &Url) -> Error {
        Error::Timeout {
            timeout_ms: self.timeout.map(|timeout| timeout.as_millis()).unwrap_or(0),
            method: method.clone(),
            url: url.to_string(),
        }
    }
}

/// More than one accumulated failure joins into [`Error::Multiple`] with
/// stable ordering; a single failure is returned verbatim, without its
/// attempt annotation.
fn finish_errors(mut annotated: Vec<Error>) -> Error {
    if annotated.len() > 1 {
        return Error::Multiple(annotated);
    }
    match annotated.pop() {
        Some(Error::Attempt { source, .. }) => *source,
        Some(other) => other,
        None => Error::NoResponse,
    }
}
