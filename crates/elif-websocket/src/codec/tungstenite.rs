//! tokio-tungstenite codec and server handshake

use crate::error::{WebSocketError, WebSocketResult};
use crate::frame::{DataKind, Frame, FrameChunk};
use crate::server::WebSocketEndpoint;
use crate::types::{CloseFrame, CloseReason};
use crate::upgrade::{AcceptedUpgrade, UpgradeRequest, UpgradeResponse};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::borrow::Cow;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::{CloseCode, Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::Frame as WireFrame;
use tokio_tungstenite::tungstenite::protocol::{
    CloseFrame as WireCloseFrame, WebSocketConfig as WireConfig,
};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tracing::{debug, trace};

/// Frame codec over a tokio-tungstenite stream
pub struct TungsteniteCodec<S> {
    inner: WebSocketStream<S>,
    fragmenting: bool,
}

impl<S> TungsteniteCodec<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self {
            inner,
            fragmenting: false,
        }
    }

    pub fn into_inner(self) -> WebSocketStream<S> {
        self.inner
    }
}

impl<S> Stream for TungsteniteCodec<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = WebSocketResult<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let message = match ready!(self.inner.poll_next_unpin(cx)) {
                Some(Ok(message)) => message,
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                    return Poll::Ready(None)
                }
                Some(Err(err)) => return Poll::Ready(Some(Err(err.into()))),
            };

            let frame = match message {
                Message::Text(text) => FrameChunk::text(text, true).into(),
                Message::Binary(data) => FrameChunk::binary(data, true).into(),
                Message::Close(frame) => Frame::Close(frame.map(from_wire_close)),
                // tungstenite answers pings itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            return Poll::Ready(Some(Ok(frame)));
        }
    }
}

impl<S> Sink<Frame> for TungsteniteCodec<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Error = WebSocketError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready_unpin(cx).map_err(Into::into)
    }

    fn start_send(mut self: Pin<&mut Self>, frame: Frame) -> Result<(), Self::Error> {
        let message = match frame {
            Frame::Data(chunk) => {
                let data = if self.fragmenting {
                    Data::Continue
                } else {
                    match chunk.kind {
                        DataKind::Text => Data::Text,
                        DataKind::Binary => Data::Binary,
                    }
                };
                self.fragmenting = !chunk.is_final;
                Message::Frame(WireFrame::message(
                    chunk.payload.to_vec(),
                    OpCode::Data(data),
                    chunk.is_final,
                ))
            }
            Frame::Close(frame) => Message::Close(frame.map(to_wire_close)),
        };
        self.inner.start_send_unpin(message).map_err(Into::into)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_flush_unpin(cx).map_err(Into::into)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match ready!(self.inner.poll_close_unpin(cx)) {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Poll::Ready(Ok(())),
            Err(err) => Poll::Ready(Err(err.into())),
        }
    }
}

fn from_wire_close(frame: WireCloseFrame<'static>) -> CloseFrame {
    CloseFrame::new(u16::from(frame.code), frame.reason.into_owned())
}

fn to_wire_close(frame: CloseFrame) -> WireCloseFrame<'static> {
    WireCloseFrame {
        code: CloseCode::from(frame.code),
        reason: Cow::Owned(frame.reason),
    }
}

/// Perform the server handshake on `stream` and run the endpoint's handler on it.
///
/// Sub-protocols are negotiated the same way as through axum; a rejected upgrade
/// is answered with the rejection status before the error is returned.
pub async fn serve<S>(stream: S, endpoint: &WebSocketEndpoint) -> WebSocketResult<CloseReason>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut accepted: Option<AcceptedUpgrade> = None;

    let callback = |request: &Request, mut response: Response| {
        match endpoint.upgrade(UpgradeRequest::from_headers(request.headers())) {
            UpgradeResponse::Accepted(upgrade) => {
                if let Some(protocol) = upgrade.protocol() {
                    match HeaderValue::from_str(protocol) {
                        Ok(value) => {
                            response
                                .headers_mut()
                                .insert("Sec-WebSocket-Protocol", value);
                        }
                        Err(_) => return Err(rejection(StatusCode::BAD_REQUEST, "invalid protocol")),
                    }
                }
                accepted = Some(upgrade);
                Ok(response)
            }
            UpgradeResponse::Rejected(rejection_reason) => {
                debug!("Rejecting WebSocket handshake: {}", rejection_reason);
                Err(rejection(
                    StatusCode::from_u16(rejection_reason.status().as_u16())
                        .unwrap_or(StatusCode::BAD_REQUEST),
                    &rejection_reason.to_string(),
                ))
            }
        }
    };

    let ws = accept_hdr_async_with_config(stream, callback, Some(wire_config(endpoint)))
        .await?;

    let connection = accepted
        .take()
        .ok_or_else(|| WebSocketError::Upgrade("handshake completed without a handler".into()))?
        .into_connection();
    trace!("Handshake complete for connection {}", connection.id());

    Ok(connection.run_codec(TungsteniteCodec::new(ws)).await)
}

fn wire_config(endpoint: &WebSocketEndpoint) -> WireConfig {
    let mut config = WireConfig::default();
    config.max_message_size = endpoint.config().max_message_size;
    config
}

fn rejection(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CloseCode as Codes;
    use bytes::Bytes;

    #[test]
    fn test_close_frame_conversion() {
        let frame = CloseFrame::new(Codes::GOING_AWAY, "idle timeout");
        let wire = to_wire_close(frame.clone());

        assert_eq!(u16::from(wire.code), Codes::GOING_AWAY);
        assert_eq!(from_wire_close(wire), frame);
    }

    async fn stream_pair() -> (
        WebSocketStream<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let server = WebSocketStream::from_raw_socket(
            server_io,
            tungstenite::protocol::Role::Server,
            None,
        )
        .await;
        let client = WebSocketStream::from_raw_socket(
            client_io,
            tungstenite::protocol::Role::Client,
            None,
        )
        .await;
        (server, client)
    }

    #[tokio::test]
    async fn test_fragmented_send_uses_continuation_frames() {
        let (server, mut client) = stream_pair().await;

        let mut codec = TungsteniteCodec::new(server);
        codec.send(FrameChunk::text("Hel", false).into()).await.unwrap();
        codec.send(FrameChunk::text("lo", false).into()).await.unwrap();
        codec.send(FrameChunk::text("", true).into()).await.unwrap();

        let received = client.next().await.unwrap().unwrap();
        assert_eq!(received, Message::Text("Hello".to_string()));

        client.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
        assert_eq!(
            codec.next().await,
            Some(Ok(Frame::Data(FrameChunk::binary(Bytes::from_static(&[1, 2, 3]), true))))
        );
    }

    #[tokio::test]
    async fn test_fragmented_receive_arrives_as_one_chunk() {
        let (server, mut client) = stream_pair().await;
        let mut codec = TungsteniteCodec::new(server);

        client
            .send(Message::Frame(WireFrame::message(
                b"Hel".to_vec(),
                OpCode::Data(Data::Text),
                false,
            )))
            .await
            .unwrap();
        client
            .send(Message::Frame(WireFrame::message(
                b"lo".to_vec(),
                OpCode::Data(Data::Continue),
                true,
            )))
            .await
            .unwrap();

        // Reassembled by tungstenite before the message layer sees it.
        assert_eq!(
            codec.next().await,
            Some(Ok(Frame::Data(FrameChunk::text("Hello", true))))
        );
    }
}
