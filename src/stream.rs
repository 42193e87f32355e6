use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::{BoxError, Error};
use crate::transport::ByteStream;

/// Largest newline-delimited record the stream scanner will hold before
/// giving up on the stream.
pub(crate) const MAX_STREAM_BUFFER_SIZE: usize = 512 * 1024;

/// Called once per newline-delimited record. Returning an error stops the
/// worker without invoking the error callback.
pub type StreamCallback = Arc<dyn Fn(&[u8]) -> Result<(), BoxError> + Send + Sync>;
/// Called when the scanner fails (read error or an over-long record).
pub type StreamErrCallback = Arc<dyn Fn(&Error) + Send + Sync>;
/// Called exactly once when the worker terminates, on every exit path.
pub type StreamDoneCallback = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct StreamCallbacks {
    pub(crate) chunk: StreamCallback,
    pub(crate) error: Option<StreamErrCallback>,
    pub(crate) done: Option<StreamDoneCallback>,
}

/// Spawns the single background worker a streaming response owns. The
/// worker scans records, fires callbacks, and closes the body when it
/// stops, whether it stopped cleanly, on error, or by cancellation.
pub(crate) fn spawn_worker(body: ByteStream, callbacks: StreamCallbacks, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut body = body;
        let outcome = scan_records(&mut body, &callbacks.chunk, &cancel).await;
        if let Err(error) = outcome {
            if let Some(on_error) = &callbacks.error {
                on_error(&error);
            } else {
                tracing::debug!(error = %error, "response stream failed");
            }
        }
        if let Some(on_done) = &callbacks.done {
            on_done();
        }
        drop(body);
    });
}

async fn scan_records(
    body: &mut ByteStream,
    on_chunk: &StreamCallback,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let mut buffer: Vec<u8> = Vec::new();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = body.next() => next,
        };
        match next {
            Some(Ok(data)) => {
                buffer.extend_from_slice(&data);
                while let Some(position) = buffer.iter().position(|&byte| byte == b'\n') {
                    let mut record: Vec<u8> = buffer.drain(..=position).collect();
                    record.pop();
                    if record.last() == Some(&b'\r') {
                        record.pop();
                    }
                    if on_chunk(&record).is_err() {
                        return Ok(());
                    }
                }
                if buffer.len() > MAX_STREAM_BUFFER_SIZE {
                    return Err(Error::ReadBody {
                        source: "stream record exceeds the 512 KiB scan buffer".into(),
                    });
                }
            }
            Some(Err(source)) => return Err(Error::ReadBody { source }),
            None => {
                if !buffer.is_empty() {
                    let _ = on_chunk(&buffer);
                }
                return Ok(());
            }
        }
    }
}
