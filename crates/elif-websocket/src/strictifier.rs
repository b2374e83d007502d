//! Opportunistic materialization of inbound messages
//!
//! When the whole payload of a message is already available (or arrives within the
//! configured collect window) and is small enough, it is handed to the application
//! as a strict value. Otherwise the message is exposed as a stream that yields the
//! chunks buffered so far followed by the live remainder, which a [`StreamPump`]
//! forwards from the chunk source.

use crate::config::WebSocketConfig;
use crate::error::{WebSocketError, WebSocketResult};
use crate::frame::{DataKind, FrameChunk};
use crate::message::{feed, BinaryMessage, ChunkStream, Feeder, Message, TextMessage, Utf8Decoder};
use bytes::{Bytes, BytesMut};
use futures_util::{FutureExt, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

/// Outcome of strictifying one inbound message
pub(crate) enum Strictified {
    Strict(Message),
    Streamed(Message, StreamPump),
}

/// Strictification policy for one connection
#[derive(Debug, Clone)]
pub(crate) struct Strictifier {
    max_strict_bytes: usize,
    collect_window: Option<Duration>,
    max_message_size: Option<usize>,
    stream_buffer: usize,
}

impl Strictifier {
    pub(crate) fn new(config: &WebSocketConfig) -> Self {
        Self {
            max_strict_bytes: config.max_strict_bytes,
            collect_window: config.strict_collect_window,
            max_message_size: config.max_message_size,
            stream_buffer: config.stream_buffer,
        }
    }

    /// Build the message that starts with `first`.
    ///
    /// Errors are connection-fatal: a source failure, a kind change in the middle
    /// of a message, an oversized message, or the source ending before the message
    /// is complete (`ConnectionClosed`).
    pub(crate) async fn strictify<S>(
        &self,
        first: FrameChunk,
        source: &mut S,
    ) -> WebSocketResult<Strictified>
    where
        S: Stream<Item = WebSocketResult<FrameChunk>> + Unpin,
    {
        let kind = first.kind;
        let mut size = first.len();
        let mut complete = first.is_final;
        let mut buffered = vec![first.payload];
        check_size(size, self.max_message_size)?;

        let deadline = self.collect_window.map(|window| Instant::now() + window);

        while !complete && size <= self.max_strict_bytes {
            let ready = match deadline {
                Some(deadline) => timeout_at(deadline, source.next()).await.ok(),
                None => source.next().now_or_never(),
            };
            let chunk = match ready {
                // Nothing more without waiting: stream the message.
                None => break,
                Some(None) => return Err(WebSocketError::ConnectionClosed),
                Some(Some(chunk)) => chunk?,
            };
            check_kind(kind, &chunk)?;
            size += chunk.len();
            check_size(size, self.max_message_size)?;
            complete = chunk.is_final;
            buffered.push(chunk.payload);
        }

        if complete && size <= self.max_strict_bytes {
            trace!("Strict {:?} message of {} bytes", kind, size);
            return Ok(Strictified::Strict(assemble(kind, buffered, size)));
        }

        debug!(
            "Streaming {:?} message ({} bytes buffered, complete: {})",
            kind, size, complete
        );
        let (message, pump) = StreamPump::start(
            kind,
            buffered,
            complete,
            size,
            self.max_message_size,
            self.stream_buffer,
        );
        Ok(Strictified::Streamed(message, pump))
    }
}

fn check_kind(kind: DataKind, chunk: &FrameChunk) -> WebSocketResult<()> {
    if chunk.kind == kind {
        Ok(())
    } else {
        Err(WebSocketError::Protocol(format!(
            "{:?} chunk inside a {:?} message",
            chunk.kind, kind
        )))
    }
}

fn check_size(size: usize, limit: Option<usize>) -> WebSocketResult<()> {
    match limit {
        Some(limit) if size > limit => Err(WebSocketError::MessageTooLarge { limit }),
        _ => Ok(()),
    }
}

fn assemble(kind: DataKind, buffered: Vec<Bytes>, size: usize) -> Message {
    let payload = if buffered.len() == 1 {
        buffered.into_iter().next().unwrap_or_default()
    } else {
        let mut payload = BytesMut::with_capacity(size);
        for chunk in &buffered {
            payload.extend_from_slice(chunk);
        }
        payload.freeze()
    };

    match kind {
        DataKind::Binary => Message::Binary(BinaryMessage::Strict(payload)),
        DataKind::Text => match String::from_utf8(payload.to_vec()) {
            Ok(text) => Message::Text(TextMessage::Strict(text)),
            // Invalid text fails this message only; the application sees it on read.
            Err(_) => Message::Text(TextMessage::Streamed(ChunkStream::failed(
                WebSocketError::InvalidUtf8,
            ))),
        },
    }
}

enum PumpFeed {
    Text(Feeder<String>, Utf8Decoder),
    Binary(Feeder<Bytes>),
}

impl PumpFeed {
    fn is_attached(&self) -> bool {
        match self {
            Self::Text(feeder, _) => feeder.is_attached(),
            Self::Binary(feeder) => feeder.is_attached(),
        }
    }

    async fn push(&mut self, payload: Bytes) {
        match self {
            Self::Binary(feeder) => feeder.push(payload).await,
            Self::Text(feeder, decoder) => match decoder.decode(&payload) {
                Ok(text) if text.is_empty() => {}
                Ok(text) => feeder.push(text).await,
                Err(err) => feeder.fail(err),
            },
        }
    }

    async fn end(&mut self) {
        match self {
            Self::Binary(feeder) => feeder.end().await,
            Self::Text(feeder, decoder) => match decoder.finish() {
                Ok(()) => feeder.end().await,
                Err(err) => feeder.fail(err),
            },
        }
    }

    fn fail(&mut self, err: WebSocketError) {
        match self {
            Self::Text(feeder, _) => feeder.fail(err),
            Self::Binary(feeder) => feeder.fail(err),
        }
    }
}

/// Forwards the remainder of a streamed inbound message from the chunk source
pub(crate) struct StreamPump {
    kind: DataKind,
    buffered: Vec<Bytes>,
    complete: bool,
    size: usize,
    max_message_size: Option<usize>,
    feed: PumpFeed,
    done: oneshot::Receiver<()>,
}

impl StreamPump {
    fn start(
        kind: DataKind,
        buffered: Vec<Bytes>,
        complete: bool,
        size: usize,
        max_message_size: Option<usize>,
        capacity: usize,
    ) -> (Message, Self) {
        let (message, feed, done) = match kind {
            DataKind::Text => {
                let (feeder, receiver, done) = feed::<String>(capacity);
                let message = Message::Text(TextMessage::Streamed(ChunkStream::new(receiver)));
                (message, PumpFeed::Text(feeder, Utf8Decoder::default()), done)
            }
            DataKind::Binary => {
                let (feeder, receiver, done) = feed::<Bytes>(capacity);
                let message =
                    Message::Binary(BinaryMessage::Streamed(ChunkStream::new(receiver)));
                (message, PumpFeed::Binary(feeder), done)
            }
        };

        let pump = Self {
            kind,
            buffered,
            complete,
            size,
            max_message_size,
            feed,
            done,
        };
        (message, pump)
    }

    /// Drive the message to its final chunk, then wait until the consumer has
    /// drained or dropped the stream.
    ///
    /// Returns an error only for connection-fatal conditions; the consumer sees the
    /// same error on its stream.
    pub(crate) async fn run<S>(mut self, source: &mut S) -> WebSocketResult<()>
    where
        S: Stream<Item = WebSocketResult<FrameChunk>> + Unpin,
    {
        for payload in std::mem::take(&mut self.buffered) {
            if !self.feed.is_attached() {
                break;
            }
            self.feed.push(payload).await;
        }

        while !self.complete {
            let chunk = match source.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(err)) => return Err(self.abort(err)),
                None => return Err(self.abort(WebSocketError::ConnectionClosed)),
            };
            if let Err(err) = check_kind(self.kind, &chunk) {
                return Err(self.abort(err));
            }
            self.size += chunk.len();
            if let Err(err) = check_size(self.size, self.max_message_size) {
                return Err(self.abort(err));
            }
            self.complete = chunk.is_final;

            // A detached consumer still needs the rest of the message skipped.
            if self.feed.is_attached() {
                self.feed.push(chunk.payload).await;
            }
        }

        self.feed.end().await;
        let _ = self.done.await;
        trace!("Streamed {:?} message finished ({} bytes)", self.kind, self.size);
        Ok(())
    }

    fn abort(&mut self, err: WebSocketError) -> WebSocketError {
        debug!("Streamed {:?} message failed: {}", self.kind, err);
        self.feed.fail(err.clone());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_channel::mpsc;
    use futures_util::stream;

    fn strictifier(max_strict_bytes: usize) -> Strictifier {
        Strictifier::new(&WebSocketConfig::default().with_max_strict_bytes(max_strict_bytes))
    }

    fn ready_source(
        chunks: Vec<FrameChunk>,
    ) -> impl Stream<Item = WebSocketResult<FrameChunk>> + Unpin {
        stream::iter(chunks.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn test_available_message_is_strict() {
        let mut source = ready_source(vec![
            FrameChunk::text("Hello, ", false),
            FrameChunk::text("World!", true),
        ]);
        let first = source.next().await.unwrap().unwrap();

        let result = strictifier(1024).strictify(first, &mut source).await.unwrap();
        let Strictified::Strict(message) = result else {
            panic!("expected strict message");
        };
        assert_eq!(message.as_text().unwrap(), "Hello, World!");
    }

    #[tokio::test]
    async fn test_oversized_message_is_streamed() {
        let mut source = ready_source(vec![
            FrameChunk::binary(vec![1u8; 8], false),
            FrameChunk::binary(vec![2u8; 8], true),
        ]);
        let first = source.next().await.unwrap().unwrap();

        let result = strictifier(4).strictify(first, &mut source).await.unwrap();
        let Strictified::Streamed(message, pump) = result else {
            panic!("expected streamed message");
        };
        assert!(!message.is_strict());

        let consumer = tokio::spawn(async move {
            let Message::Binary(binary) = message else {
                panic!("expected binary");
            };
            binary.collect().await
        });
        pump.run(&mut source).await.unwrap();

        let payload = consumer.await.unwrap().unwrap();
        let mut expected = vec![1u8; 8];
        expected.extend(vec![2u8; 8]);
        assert_eq!(&payload[..], &expected[..]);
    }

    #[tokio::test]
    async fn test_pending_remainder_is_streamed() {
        let (tx, mut source) = mpsc::unbounded::<WebSocketResult<FrameChunk>>();
        tx.unbounded_send(Ok(FrameChunk::text("abc", false))).unwrap();
        let first = source.next().await.unwrap().unwrap();

        let result = strictifier(1024).strictify(first, &mut source).await.unwrap();
        let Strictified::Streamed(message, pump) = result else {
            panic!("expected streamed message");
        };

        let pump = tokio::spawn(async move { pump.run(&mut source).await });
        tx.unbounded_send(Ok(FrameChunk::text("def", true))).unwrap();

        let Message::Text(text) = message else {
            panic!("expected text");
        };
        assert_eq!(text.collect().await.unwrap(), "abcdef");
        pump.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_collect_window_waits_for_remainder() {
        let (tx, mut source) = mpsc::unbounded::<WebSocketResult<FrameChunk>>();
        tx.unbounded_send(Ok(FrameChunk::text("ab", false))).unwrap();
        let first = source.next().await.unwrap().unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = tx.unbounded_send(Ok(FrameChunk::text("cd", true)));
        });

        let strictifier = Strictifier::new(
            &WebSocketConfig::default().with_strict_collect_window(Some(Duration::from_secs(5))),
        );
        let result = strictifier.strictify(first, &mut source).await.unwrap();
        let Strictified::Strict(message) = result else {
            panic!("expected strict message");
        };
        assert_eq!(message.as_text().unwrap(), "abcd");
    }

    #[tokio::test]
    async fn test_invalid_utf8_fails_only_the_message() {
        let mut source = ready_source(vec![FrameChunk::new(
            DataKind::Text,
            vec![0xffu8, 0xfe],
            true,
        )]);
        let first = source.next().await.unwrap().unwrap();

        let result = strictifier(1024).strictify(first, &mut source).await.unwrap();
        let Strictified::Strict(Message::Text(text)) = result else {
            panic!("expected a text message");
        };
        assert_eq!(text.collect().await, Err(WebSocketError::InvalidUtf8));
    }

    #[tokio::test]
    async fn test_kind_change_is_protocol_error() {
        let mut source = ready_source(vec![
            FrameChunk::text("a", false),
            FrameChunk::binary(vec![1u8], true),
        ]);
        let first = source.next().await.unwrap().unwrap();

        let result = strictifier(1024).strictify(first, &mut source).await;
        assert!(matches!(result, Err(WebSocketError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_transport_error_fails_streamed_message() {
        let (tx, mut source) = mpsc::unbounded::<WebSocketResult<FrameChunk>>();
        tx.unbounded_send(Ok(FrameChunk::binary(vec![7u8], false))).unwrap();
        let first = source.next().await.unwrap().unwrap();

        let result = strictifier(1024).strictify(first, &mut source).await.unwrap();
        let Strictified::Streamed(Message::Binary(BinaryMessage::Streamed(mut chunks)), pump) =
            result
        else {
            panic!("expected streamed binary message");
        };

        tx.unbounded_send(Err(WebSocketError::Transport("reset".into())))
            .unwrap();
        let pump_result = pump.run(&mut source).await;

        assert_eq!(pump_result, Err(WebSocketError::Transport("reset".into())));
        assert_eq!(chunks.next().await, Some(Ok(Bytes::from_static(&[7]))));
        assert_eq!(
            chunks.next().await,
            Some(Err(WebSocketError::Transport("reset".into())))
        );
    }

    #[tokio::test]
    async fn test_message_size_limit() {
        let mut source = ready_source(vec![FrameChunk::binary(vec![0u8; 32], true)]);
        let first = source.next().await.unwrap().unwrap();
        let strictifier = Strictifier::new(
            &WebSocketConfig::default()
                .with_max_strict_bytes(8)
                .with_max_message_size(Some(16)),
        );

        let result = strictifier.strictify(first, &mut source).await;
        assert!(matches!(
            result,
            Err(WebSocketError::MessageTooLarge { limit: 16 })
        ));
    }
}
