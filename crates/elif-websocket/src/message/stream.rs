//! Single-consumption chunk streams and the inbound feed that backs them

use crate::error::{WebSocketError, WebSocketResult};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{ready, Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// Lazy, finite, single-consumption sequence of payload chunks
///
/// Ownership enforces single consumption: reading the stream moves it out of the
/// message. Dropping it before exhaustion discards the rest of the payload.
pub struct ChunkStream<T> {
    inner: BoxStream<'static, WebSocketResult<T>>,
}

impl<T: Send + 'static> ChunkStream<T> {
    /// Wrap an application-owned chunk producer
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = WebSocketResult<T>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
        }
    }

    /// Stream over chunks that are already in memory
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::new(stream::iter(chunks.into_iter().map(Ok)))
    }

    /// One-element stream
    pub fn once(chunk: T) -> Self {
        Self::new(stream::once(async move { Ok(chunk) }))
    }

    /// Stream that fails immediately
    pub fn failed(err: WebSocketError) -> Self {
        Self::new(stream::once(async move { Err(err) }))
    }

    /// Convert every chunk, keeping errors as they are
    pub fn map_chunks<U, F>(self, f: F) -> ChunkStream<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        let mut f = f;
        ChunkStream::new(self.inner.map(move |chunk| chunk.map(&mut f)))
    }

    /// Release the payload without reading it
    pub fn discard(self) {}
}

impl<T> Stream for ChunkStream<T> {
    type Item = WebSocketResult<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl<T> fmt::Debug for ChunkStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStream").finish_non_exhaustive()
    }
}

pub(crate) enum FeedItem<T> {
    Chunk(T),
    End,
}

/// Producer half of an inbound streamed payload, driven by the inbound pump
pub(crate) struct Feeder<T> {
    tx: Option<mpsc::Sender<FeedItem<T>>>,
    error: Arc<OnceLock<WebSocketError>>,
}

impl<T> Feeder<T> {
    /// Whether the consumer still wants chunks
    pub(crate) fn is_attached(&self) -> bool {
        self.tx.is_some()
    }

    /// Push one chunk, waiting for room in the feed
    pub(crate) async fn push(&mut self, chunk: T) {
        if let Some(tx) = &self.tx {
            if tx.send(FeedItem::Chunk(chunk)).await.is_err() {
                self.tx = None;
            }
        }
    }

    /// Mark the end of the payload
    pub(crate) async fn end(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(FeedItem::End).await;
        }
    }

    /// Fail the payload; the consumer sees `err` after the chunks already queued
    pub(crate) fn fail(&mut self, err: WebSocketError) {
        if let Some(tx) = self.tx.take() {
            let _ = self.error.set(err);
            drop(tx);
        }
    }
}

/// Consumer half of an inbound streamed payload
pub(crate) struct FeedReceiver<T> {
    rx: mpsc::Receiver<FeedItem<T>>,
    error: Arc<OnceLock<WebSocketError>>,
    done: Option<oneshot::Sender<()>>,
}

impl<T> FeedReceiver<T> {
    fn finish(&mut self) {
        self.rx.close();
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

impl<T> Stream for FeedReceiver<T> {
    type Item = WebSocketResult<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done.is_none() {
            return Poll::Ready(None);
        }

        match ready!(self.rx.poll_recv(cx)) {
            Some(FeedItem::Chunk(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Some(FeedItem::End) => {
                self.finish();
                Poll::Ready(None)
            }
            // Sender gone without an end marker: never report a truncated payload
            // as a successful end of stream.
            None => {
                let err = self
                    .error
                    .get()
                    .cloned()
                    .unwrap_or(WebSocketError::ConnectionClosed);
                self.finish();
                Poll::Ready(Some(Err(err)))
            }
        }
    }
}

/// Create a bounded feed for one inbound message.
///
/// The returned oneshot resolves once the consumer has read the payload to the
/// end or dropped the stream.
pub(crate) fn feed<T>(capacity: usize) -> (Feeder<T>, FeedReceiver<T>, oneshot::Receiver<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (done_tx, done_rx) = oneshot::channel();
    let error = Arc::new(OnceLock::new());

    let feeder = Feeder {
        tx: Some(tx),
        error: error.clone(),
    };
    let receiver = FeedReceiver {
        rx,
        error,
        done: Some(done_tx),
    };
    (feeder, receiver, done_rx)
}

/// Incremental UTF-8 decoder for text payloads split at arbitrary byte offsets
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode as much of `chunk` as forms complete code points
    pub(crate) fn decode(&mut self, chunk: &[u8]) -> WebSocketResult<String> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        match std::str::from_utf8(&buf) {
            Ok(_) => String::from_utf8(buf).map_err(|_| WebSocketError::InvalidUtf8),
            Err(e) if e.error_len().is_some() => Err(WebSocketError::InvalidUtf8),
            Err(e) => {
                let valid = e.valid_up_to();
                self.pending = buf.split_off(valid);
                String::from_utf8(buf).map_err(|_| WebSocketError::InvalidUtf8)
            }
        }
    }

    /// Fail if the payload ended inside a code point
    pub(crate) fn finish(&mut self) -> WebSocketResult<()> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(WebSocketError::InvalidUtf8)
        }
    }
}
