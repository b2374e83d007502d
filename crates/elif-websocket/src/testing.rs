//! In-memory transport for exercising connections without a socket
//!
//! ```rust,no_run
//! use elif_websocket::testing::transport;
//! use elif_websocket::{Handler, WebSocketConfig, WebSocketConnection};
//!
//! # async fn demo() {
//! let (source, sink, mut peer) = transport(8);
//! let connection = WebSocketConnection::new(Handler::uppercase_echo(), WebSocketConfig::default());
//! tokio::spawn(connection.run(source, sink));
//!
//! peer.send_text("hello", true).await.unwrap();
//! let reply = peer.recv_message().await;
//! # }
//! ```

use crate::error::{WebSocketError, WebSocketResult};
use crate::frame::{DataKind, Frame, FrameChunk};
use crate::types::CloseFrame;
use bytes::{Bytes, BytesMut};
use futures_channel::mpsc;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Frames sent by the test peer, as seen by the connection
#[derive(Debug)]
pub struct TestSource {
    rx: mpsc::Receiver<WebSocketResult<Frame>>,
}

impl Stream for TestSource {
    type Item = WebSocketResult<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx)
    }
}

/// Frames written by the connection, delivered to the test peer
#[derive(Debug)]
pub struct TestSink {
    tx: mpsc::Sender<Frame>,
}

impl Sink<Frame> for TestSink {
    type Error = WebSocketError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.tx
            .poll_ready_unpin(cx)
            .map_err(|_| WebSocketError::ConnectionClosed)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        self.tx
            .start_send_unpin(item)
            .map_err(|_| WebSocketError::ConnectionClosed)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.tx
            .poll_flush_unpin(cx)
            .map_err(|_| WebSocketError::ConnectionClosed)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.tx
            .poll_close_unpin(cx)
            .map_err(|_| WebSocketError::ConnectionClosed)
    }
}

/// A message reassembled by the test peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Text(String),
    Binary(Vec<u8>),
    Close(Option<CloseFrame>),
}

/// The remote end of an in-memory transport
#[derive(Debug)]
pub struct TestPeer {
    tx: mpsc::Sender<WebSocketResult<Frame>>,
    rx: mpsc::Receiver<Frame>,
}

impl TestPeer {
    pub async fn send_frame(&mut self, frame: Frame) -> WebSocketResult<()> {
        self.tx
            .send(Ok(frame))
            .await
            .map_err(|_| WebSocketError::ConnectionClosed)
    }

    pub async fn send_text(&mut self, text: &str, is_final: bool) -> WebSocketResult<()> {
        self.send_frame(FrameChunk::text(text, is_final).into())
            .await
    }

    pub async fn send_binary(
        &mut self,
        data: impl Into<Bytes>,
        is_final: bool,
    ) -> WebSocketResult<()> {
        self.send_frame(FrameChunk::binary(data, is_final).into())
            .await
    }

    /// Make the connection's frame source fail with `err`
    pub async fn send_error(&mut self, err: WebSocketError) -> WebSocketResult<()> {
        self.tx
            .send(Err(err))
            .await
            .map_err(|_| WebSocketError::ConnectionClosed)
    }

    /// Send a close frame and stop sending
    pub async fn close(&mut self, frame: Option<CloseFrame>) {
        let _ = self.tx.send(Ok(Frame::Close(frame))).await;
        self.tx.close_channel();
    }

    /// Drop the inbound side without a close frame
    pub fn disconnect(&mut self) {
        self.tx.close_channel();
    }

    /// Next frame written by the connection
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.rx.next().await
    }

    /// Next complete message or close frame written by the connection
    pub async fn recv_message(&mut self) -> Option<PeerMessage> {
        let mut kind = None;
        let mut payload = BytesMut::new();

        while let Some(frame) = self.next_frame().await {
            match frame {
                Frame::Close(close) => return Some(PeerMessage::Close(close)),
                Frame::Data(chunk) => {
                    let kind = *kind.get_or_insert(chunk.kind);
                    payload.extend_from_slice(&chunk.payload);
                    if chunk.is_final {
                        return Some(match kind {
                            DataKind::Text => {
                                PeerMessage::Text(String::from_utf8_lossy(&payload).into_owned())
                            }
                            DataKind::Binary => PeerMessage::Binary(payload.to_vec()),
                        });
                    }
                }
            }
        }
        None
    }
}

/// Connected source, sink and peer, each direction buffering `capacity` frames
pub fn transport(capacity: usize) -> (TestSource, TestSink, TestPeer) {
    let (peer_tx, source_rx) = mpsc::channel(capacity);
    let (sink_tx, peer_rx) = mpsc::channel(capacity);

    (
        TestSource { rx: source_rx },
        TestSink { tx: sink_tx },
        TestPeer {
            tx: peer_tx,
            rx: peer_rx,
        },
    )
}
