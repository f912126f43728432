use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use super::ApiError;

/// Body of a successful streaming response, yielded chunk by chunk.
///
/// When the request carried a cancellation signal, triggering it ends the stream with a single
/// [`ApiError::Cancelled`] item.
pub struct ByteStream {
    status: StatusCode,
    headers: HeaderMap,
    body: BoxStream<'static, Result<Bytes, ApiError>>,
}

impl ByteStream {
    pub(crate) fn new(response: reqwest::Response, signal: Option<CancellationToken>) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let chunks = response.bytes_stream().map(|chunk| chunk.map_err(ApiError::network));
        let body = match signal {
            Some(signal) => cancellable(chunks, signal).boxed(),
            None => chunks.boxed(),
        };
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Drain the remaining body into memory.
    pub async fn collect_bytes(mut self) -> Result<Vec<u8>, ApiError> {
        let mut buffer = Vec::new();
        while let Some(chunk) = self.body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer)
    }
}

impl Stream for ByteStream {
    type Item = Result<Bytes, ApiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.body.as_mut().poll_next(cx)
    }
}

fn cancellable<S>(
    chunks: S,
    signal: CancellationToken,
) -> impl Stream<Item = Result<Bytes, ApiError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, ApiError>> + Send + 'static,
{
    let chunks = chunks.boxed();
    stream::unfold(Some((chunks, signal)), |state| async move {
        let (mut chunks, signal) = state?;
        tokio::select! {
            biased;
            _ = signal.cancelled() => Some((Err(ApiError::Cancelled), None)),
            next = chunks.next() => next.map(|item| (item, Some((chunks, signal)))),
        }
    })
}
