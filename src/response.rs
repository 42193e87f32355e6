use std::path::Path;

use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::codec::{self, CodecSet};
use crate::cookie::{Cookie, parse_set_cookie};
use crate::error::Error;
use crate::stream::{StreamCallbacks, spawn_worker};
use crate::transport::TransportResponse;

/// A completed HTTP exchange.
///
/// Buffered responses own their body bytes; streaming responses hand the
/// body to a background worker at construction and keep an empty body, so
/// decode and save operations on them report an empty body.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    body_bytes: Bytes,
    streaming: bool,
    codecs: CodecSet,
}

impl Response {
    /// Drains the transport body through a pooled buffer into owned bytes.
    /// The copy-out happens before the buffer returns to the pool, so
    /// concurrent responses can never alias each other's data.
    pub(crate) async fn buffered(
        response: TransportResponse,
        codecs: CodecSet,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<Self, Error> {
        let TransportResponse {
            status,
            headers,
            url,
            mut body,
        } = response;

        let drain = async {
            let mut buffer = crate::pool::get();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(chunk) => buffer.extend_from_slice(&chunk),
                    Err(source) => {
                        crate::pool::put(buffer);
                        return Err(Error::ReadBody { source });
                    }
                }
            }
            Ok(crate::pool::copy_out(buffer))
        };

        let body_bytes = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, drain).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Error::ReadBody {
                        source: "timed out reading response body".into(),
                    });
                }
            },
            None => drain.await?,
        };

        Ok(Self {
            status,
            headers,
            url,
            body_bytes,
            streaming: false,
            codecs,
        })
    }

    /// Hands the body to the stream worker and returns immediately with an
    /// empty buffered view.
    pub(crate) fn streaming(
        response: TransportResponse,
        codecs: CodecSet,
        callbacks: StreamCallbacks,
        cancel: CancellationToken,
    ) -> Self {
        let TransportResponse {
            status,
            headers,
            url,
            body,
        } = response;
        spawn_worker(body, callbacks, cancel);
        Self {
            status,
            headers,
            url,
            body_bytes: Bytes::new(),
            streaming: true,
            codecs,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// The status line, e.g. `"200 OK"`.
    pub fn status(&self) -> String {
        match self.status.canonical_reason() {
            Some(reason) => format!("{} {reason}", self.status.as_u16()),
            None => self.status.as_u16().to_string(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Cookies the server set on this response.
    pub fn cookies(&self) -> Vec<Cookie> {
        parse_set_cookie(&self.headers)
    }

    /// The `Location` header resolved against the request URL.
    pub fn location(&self) -> Option<Url> {
        let location = self.headers.get(LOCATION)?.to_str().ok()?;
        self.url.join(location).ok()
    }

    /// The URL that elicited this response.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn content_type(&self) -> &str {
        self.header(CONTENT_TYPE.as_str()).unwrap_or_default()
    }

    pub fn is_content_type(&self, content_type: &str) -> bool {
        self.content_type().contains(content_type)
    }

    pub fn is_json(&self) -> bool {
        self.is_content_type("application/json")
    }

    pub fn is_xml(&self) -> bool {
        self.is_content_type("application/xml")
    }

    pub fn is_yaml(&self) -> bool {
        self.is_content_type("application/yaml")
    }

    /// Length of the buffered body; zero in streaming mode.
    pub fn content_length(&self) -> usize {
        self.body_bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body_bytes.is_empty()
    }

    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status_code())
    }

    pub fn is_error(&self) -> bool {
        self.status_code() >= 400
    }

    pub fn is_client_error(&self) -> bool {
        (400..=499).contains(&self.status_code())
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    pub fn is_redirect(&self) -> bool {
        (300..=399).contains(&self.status_code())
    }

    pub fn body(&self) -> &[u8] {
        &self.body_bytes
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body_bytes).into_owned()
    }

    /// Decodes the buffered body by its content type.
    pub fn scan<T>(&self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        if self.is_json() {
            return self.scan_json();
        }
        if self.is_xml() {
            return self.scan_xml();
        }
        if self.is_yaml() {
            return self.scan_yaml();
        }
        Err(Error::UnsupportedContentType {
            content_type: self.content_type().to_owned(),
        })
    }

    pub fn scan_json<T>(&self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        self.codecs.decode_json(&self.body_bytes)
    }

    pub fn scan_xml<T>(&self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        codec::decode_xml(&self.body_bytes)
    }

    pub fn scan_yaml<T>(&self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        self.codecs.decode_yaml(&self.body_bytes)
    }

    /// Writes the buffered body to a file, creating missing parent
    /// directories first.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all_restricted(parent).await?;
        }
        tokio::fs::write(path, &self.body_bytes)
            .await
            .map_err(|source| Error::Io { source })
    }

    /// Copies the buffered body into the writer, flushes it, and shuts it
    /// down best-effort.
    pub async fn save_to_writer<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        writer
            .write_all(&self.body_bytes)
            .await
            .map_err(|source| Error::Io { source })?;
        writer
            .flush()
            .await
            .map_err(|source| Error::Io { source })?;
        if let Err(error) = writer.shutdown().await {
            tracing::warn!(error = %error, "failed to close save writer");
        }
        Ok(())
    }

    /// Iterates the buffered body line by line; empty in streaming mode.
    pub fn lines(&self) -> Lines<'_> {
        Lines {
            remaining: &self.body_bytes,
        }
    }

    /// Whether this response's body was handed to a stream worker.
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Releases the buffered body.
    pub fn close(self) {}
}

/// Lazy line iterator over the buffered body. Lines are split on `\n` with
/// a trailing `\r` trimmed; a final unterminated line is yielded as-is.
pub struct Lines<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.remaining.is_empty() {
            return None;
        }
        let line = match self.remaining.iter().position(|&byte| byte == b'\n') {
            Some(position) => {
                let line = &self.remaining[..position];
                self.remaining = &self.remaining[position + 1..];
                line
            }
            None => std::mem::take(&mut self.remaining),
        };
        Some(line.strip_suffix(b"\r").unwrap_or(line))
    }
}

#[cfg(unix)]
const SAVE_DIR_MODE: u32 = 0o750;

async fn create_dir_all_restricted(parent: &Path) -> Result<(), Error> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        let parent = parent.to_owned();
        tokio::task::spawn_blocking(move || {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(SAVE_DIR_MODE)
                .create(parent)
        })
        .await
        .map_err(|join_error| Error::Io {
            source: std::io::Error::other(join_error),
        })?
        .map_err(|source| Error::Io { source })
    }
    #[cfg(not(unix))]
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| Error::Io { source })
    }
}
