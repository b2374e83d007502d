//! Application-level WebSocket messages
//!
//! A [`Message`] is tagged twice: by content kind (text or binary) and by
//! materialization (strict or streamed). Any inbound message may arrive in either
//! materialization; code that reads messages must handle both.

mod stream;

pub use stream::ChunkStream;
pub(crate) use stream::{feed, Feeder, Utf8Decoder};

use crate::error::{WebSocketError, WebSocketResult};
use crate::frame::DataKind;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use std::fmt;

/// One complete application-level unit of WebSocket data
#[derive(Debug)]
pub enum Message {
    Text(TextMessage),
    Binary(BinaryMessage),
}

/// Text payload, either materialized or streamed
pub enum TextMessage {
    Strict(String),
    Streamed(ChunkStream<String>),
}

/// Binary payload, either materialized or streamed
pub enum BinaryMessage {
    Strict(Bytes),
    Streamed(ChunkStream<Bytes>),
}

impl Message {
    pub fn text<T: Into<String>>(content: T) -> Self {
        Self::Text(TextMessage::Strict(content.into()))
    }

    /// Streamed text message over an application-owned chunk producer
    pub fn text_stream<S>(chunks: S) -> Self
    where
        S: Stream<Item = WebSocketResult<String>> + Send + 'static,
    {
        Self::Text(TextMessage::Streamed(ChunkStream::new(chunks)))
    }

    pub fn text_chunks<I, T>(chunks: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let chunks: Vec<String> = chunks.into_iter().map(Into::into).collect();
        Self::Text(TextMessage::Streamed(ChunkStream::from_chunks(chunks)))
    }

    pub fn binary<T: Into<Bytes>>(data: T) -> Self {
        Self::Binary(BinaryMessage::Strict(data.into()))
    }

    /// Streamed binary message over an application-owned chunk producer
    pub fn binary_stream<S>(chunks: S) -> Self
    where
        S: Stream<Item = WebSocketResult<Bytes>> + Send + 'static,
    {
        Self::Binary(BinaryMessage::Streamed(ChunkStream::new(chunks)))
    }

    pub fn binary_chunks<I, T>(chunks: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        let chunks: Vec<Bytes> = chunks.into_iter().map(Into::into).collect();
        Self::Binary(BinaryMessage::Streamed(ChunkStream::from_chunks(chunks)))
    }

    pub fn kind(&self) -> DataKind {
        match self {
            Self::Text(_) => DataKind::Text,
            Self::Binary(_) => DataKind::Binary,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    pub fn is_strict(&self) -> bool {
        match self {
            Self::Text(text) => text.is_strict(),
            Self::Binary(binary) => binary.is_strict(),
        }
    }

    /// Strict text payload
    pub fn as_text(&self) -> WebSocketResult<&str> {
        match self {
            Self::Text(text) => text.as_strict(),
            Self::Binary(_) => Err(WebSocketError::InvalidMessageType),
        }
    }

    /// Strict binary payload
    pub fn as_binary(&self) -> WebSocketResult<&[u8]> {
        match self {
            Self::Binary(binary) => binary.as_strict(),
            Self::Text(_) => Err(WebSocketError::InvalidMessageType),
        }
    }

    /// Payload as raw bytes, whatever the kind and materialization
    pub fn into_data_stream(self) -> ChunkStream<Bytes> {
        match self {
            Self::Text(text) => text.into_stream().map_chunks(Bytes::from),
            Self::Binary(binary) => binary.into_stream(),
        }
    }

    /// Materialize the payload, failing once it grows past `limit` bytes
    pub async fn into_strict(self, limit: Option<usize>) -> WebSocketResult<Self> {
        let limit = limit.unwrap_or(usize::MAX);
        match self {
            Self::Text(text) => Ok(Self::text(text.collect_limited(limit).await?)),
            Self::Binary(binary) => Ok(Self::binary(binary.collect_limited(limit).await?)),
        }
    }

    /// Release the payload without reading it
    pub fn discard(self) {
        if !self.is_strict() {
            tracing::trace!("Discarding streamed {:?} message", self.kind());
        }
    }
}

impl TextMessage {
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Strict(_))
    }

    pub fn as_strict(&self) -> WebSocketResult<&str> {
        match self {
            Self::Strict(text) => Ok(text.as_str()),
            Self::Streamed(_) => Err(WebSocketError::NotStrict),
        }
    }

    /// Payload as a chunk stream; a strict payload yields one chunk
    pub fn into_stream(self) -> ChunkStream<String> {
        match self {
            Self::Strict(text) => ChunkStream::once(text),
            Self::Streamed(chunks) => chunks,
        }
    }

    pub async fn collect(self) -> WebSocketResult<String> {
        self.collect_limited(usize::MAX).await
    }

    pub async fn collect_limited(self, limit: usize) -> WebSocketResult<String> {
        match self {
            Self::Strict(text) if text.len() > limit => {
                Err(WebSocketError::MessageTooLarge { limit })
            }
            Self::Strict(text) => Ok(text),
            Self::Streamed(mut chunks) => {
                let mut text = String::new();
                while let Some(chunk) = chunks.next().await {
                    let chunk = chunk?;
                    if text.len() + chunk.len() > limit {
                        return Err(WebSocketError::MessageTooLarge { limit });
                    }
                    text.push_str(&chunk);
                }
                Ok(text)
            }
        }
    }

    pub fn discard(self) {}
}

impl BinaryMessage {
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Strict(_))
    }

    pub fn as_strict(&self) -> WebSocketResult<&[u8]> {
        match self {
            Self::Strict(data) => Ok(&data[..]),
            Self::Streamed(_) => Err(WebSocketError::NotStrict),
        }
    }

    /// Payload as a chunk stream; a strict payload yields one chunk
    pub fn into_stream(self) -> ChunkStream<Bytes> {
        match self {
            Self::Strict(data) => ChunkStream::once(data),
            Self::Streamed(chunks) => chunks,
        }
    }

    pub async fn collect(self) -> WebSocketResult<Bytes> {
        self.collect_limited(usize::MAX).await
    }

    pub async fn collect_limited(self, limit: usize) -> WebSocketResult<Bytes> {
        match self {
            Self::Strict(data) if data.len() > limit => {
                Err(WebSocketError::MessageTooLarge { limit })
            }
            Self::Strict(data) => Ok(data),
            Self::Streamed(mut chunks) => {
                let mut data = BytesMut::new();
                while let Some(chunk) = chunks.next().await {
                    let chunk = chunk?;
                    if data.len() + chunk.len() > limit {
                        return Err(WebSocketError::MessageTooLarge { limit });
                    }
                    data.extend_from_slice(&chunk);
                }
                Ok(data.freeze())
            }
        }
    }

    pub fn discard(self) {}
}

impl fmt::Debug for TextMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict(text) => f.debug_tuple("Strict").field(text).finish(),
            Self::Streamed(_) => f.write_str("Streamed(..)"),
        }
    }
}

impl fmt::Debug for BinaryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict(data) => write!(f, "Strict({} bytes)", data.len()),
            Self::Streamed(_) => f.write_str("Streamed(..)"),
        }
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::binary(data)
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Self::binary(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[test]
    fn test_strict_message_accessors() {
        let message = Message::text("hello");

        assert!(message.is_text());
        assert!(!message.is_binary());
        assert!(message.is_strict());
        assert_eq!(message.as_text().unwrap(), "hello");
        // strict values can be read repeatedly
        assert_eq!(message.as_text().unwrap(), "hello");
        assert_eq!(message.as_binary(), Err(WebSocketError::InvalidMessageType));
    }

    #[test]
    fn test_streamed_message_rejects_strict_accessor() {
        let message = Message::binary_chunks(vec![Bytes::from_static(b"ab")]);

        assert!(message.is_binary());
        assert!(!message.is_strict());
        assert_eq!(message.as_binary(), Err(WebSocketError::NotStrict));
    }

    #[tokio::test]
    async fn test_strict_message_streams_as_single_chunk() {
        let chunks: Vec<_> = Message::binary(vec![1u8, 2, 3])
            .into_data_stream()
            .collect()
            .await;
        assert_eq!(chunks, vec![Ok(Bytes::from_static(&[1, 2, 3]))]);
    }

    #[tokio::test]
    async fn test_collect_streamed_text() {
        let message = Message::text_chunks(["Hel", "lo, ", "World!"]);
        let Message::Text(text) = message else {
            panic!("expected text");
        };
        assert_eq!(text.collect().await.unwrap(), "Hello, World!");
    }

    #[tokio::test]
    async fn test_collect_limited_rejects_oversized_payload() {
        let message = Message::binary_chunks([vec![0u8; 6], vec![0u8; 6]]);
        let err = message.into_strict(Some(10)).await.unwrap_err();
        assert_eq!(err, WebSocketError::MessageTooLarge { limit: 10 });
    }

    #[tokio::test]
    async fn test_into_strict_materializes_stream() {
        let message = Message::text_stream(stream::iter(vec![
            Ok("a".to_string()),
            Ok("b".to_string()),
        ]));
        let strict = message.into_strict(None).await.unwrap();
        assert!(strict.is_strict());
        assert_eq!(strict.as_text().unwrap(), "ab");
    }

    #[tokio::test]
    async fn test_stream_error_surfaces_on_collect() {
        let message = Message::text_stream(stream::iter(vec![
            Ok("a".to_string()),
            Err(WebSocketError::ConnectionClosed),
        ]));
        let Message::Text(text) = message else {
            panic!("expected text");
        };
        assert_eq!(text.collect().await, Err(WebSocketError::ConnectionClosed));
    }
}
