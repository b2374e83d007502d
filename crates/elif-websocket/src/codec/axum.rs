//! Codec over an axum `WebSocket`
//!
//! axum only exchanges whole messages, so outbound chunks of a fragmented message
//! are buffered here until the final chunk arrives.

use crate::error::{WebSocketError, WebSocketResult};
use crate::frame::{DataKind, Frame, FrameChunk};
use crate::types::CloseFrame;
use ::axum::extract::ws::{CloseFrame as AxumCloseFrame, Message, WebSocket};
use bytes::BytesMut;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::borrow::Cow;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

pub struct AxumCodec {
    socket: WebSocket,
    pending: Option<(DataKind, BytesMut)>,
}

impl AxumCodec {
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            pending: None,
        }
    }

    /// Negotiated sub-protocol, as seen by axum
    pub fn protocol(&self) -> Option<&str> {
        self.socket
            .protocol()
            .and_then(|value| value.to_str().ok())
    }

    fn assemble(&mut self, chunk: FrameChunk) -> WebSocketResult<Option<Message>> {
        let (kind, payload) = match self.pending.take() {
            None if chunk.is_final => (chunk.kind, BytesMut::from(&chunk.payload[..])),
            None => {
                self.pending = Some((chunk.kind, BytesMut::from(&chunk.payload[..])));
                return Ok(None);
            }
            Some((kind, mut buffered)) => {
                buffered.extend_from_slice(&chunk.payload);
                if !chunk.is_final {
                    self.pending = Some((kind, buffered));
                    return Ok(None);
                }
                (kind, buffered)
            }
        };

        let message = match kind {
            DataKind::Text => Message::Text(
                String::from_utf8(payload.to_vec()).map_err(|_| WebSocketError::InvalidUtf8)?,
            ),
            DataKind::Binary => Message::Binary(payload.to_vec()),
        };
        Ok(Some(message))
    }
}

impl Stream for AxumCodec {
    type Item = WebSocketResult<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let message = match ready!(self.socket.poll_next_unpin(cx)) {
                Some(Ok(message)) => message,
                Some(Err(err)) => return Poll::Ready(Some(Err(err.into()))),
                None => return Poll::Ready(None),
            };

            let frame = match message {
                Message::Text(text) => FrameChunk::text(text, true).into(),
                Message::Binary(data) => FrameChunk::binary(data, true).into(),
                Message::Close(frame) => Frame::Close(
                    frame.map(|frame| CloseFrame::new(frame.code, frame.reason.into_owned())),
                ),
                Message::Ping(_) | Message::Pong(_) => continue,
            };
            return Poll::Ready(Some(Ok(frame)));
        }
    }
}

impl Sink<Frame> for AxumCodec {
    type Error = WebSocketError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.socket.poll_ready_unpin(cx).map_err(Into::into)
    }

    fn start_send(mut self: Pin<&mut Self>, frame: Frame) -> Result<(), Self::Error> {
        let message = match frame {
            Frame::Data(chunk) => match self.assemble(chunk)? {
                Some(message) => message,
                None => return Ok(()),
            },
            Frame::Close(frame) => Message::Close(frame.map(|frame| AxumCloseFrame {
                code: frame.code,
                reason: Cow::Owned(frame.reason),
            })),
        };
        self.socket.start_send_unpin(message).map_err(Into::into)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.socket.poll_flush_unpin(cx).map_err(Into::into)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.socket.poll_close_unpin(cx).map_err(Into::into)
    }
}
