//! Frame-level interface shared with the codec
//!
//! The codec resolves masking, control frames and continuation opcodes; what reaches
//! the message layer is an ordered sequence of payload chunks, each tagged with the
//! kind of the message it belongs to and whether it is the final chunk.

use crate::error::{WebSocketError, WebSocketResult};
use crate::types::CloseFrame;
use bytes::Bytes;
use futures_util::{Sink, Stream};

/// Content kind of a data message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Text,
    Binary,
}

/// One opcode-tagged payload chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameChunk {
    pub kind: DataKind,
    /// Raw payload; for text this is UTF-8 that may split a code point
    pub payload: Bytes,
    pub is_final: bool,
}

impl FrameChunk {
    pub fn new(kind: DataKind, payload: impl Into<Bytes>, is_final: bool) -> Self {
        Self {
            kind,
            payload: payload.into(),
            is_final,
        }
    }

    pub fn text(text: impl Into<String>, is_final: bool) -> Self {
        Self::new(DataKind::Text, Bytes::from(text.into()), is_final)
    }

    pub fn binary(data: impl Into<Bytes>, is_final: bool) -> Self {
        Self::new(DataKind::Binary, data, is_final)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Unit exchanged with the codec in both directions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(FrameChunk),
    Close(Option<CloseFrame>),
}

impl From<FrameChunk> for Frame {
    fn from(chunk: FrameChunk) -> Self {
        Self::Data(chunk)
    }
}

/// Inbound side of a codec
pub trait FrameSource: Stream<Item = WebSocketResult<Frame>> + Send + Unpin + 'static {}

impl<T> FrameSource for T where T: Stream<Item = WebSocketResult<Frame>> + Send + Unpin + 'static {}

/// Outbound side of a codec
pub trait FrameSink: Sink<Frame, Error = WebSocketError> + Send + Unpin + 'static {}

impl<T> FrameSink for T where T: Sink<Frame, Error = WebSocketError> + Send + Unpin + 'static {}
