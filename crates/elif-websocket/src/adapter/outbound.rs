//! Outbound direction: handler messages become codec frames

use crate::connection::stats::Activity;
use crate::error::{WebSocketError, WebSocketResult};
use crate::frame::{DataKind, Frame, FrameChunk, FrameSink};
use crate::handler::OutboundItem;
use crate::message::{BinaryMessage, ChunkStream, Message, TextMessage};
use crate::types::{CloseFrame, CloseReason};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

/// Writes whole messages to a frame sink, one frame at a time
pub(crate) struct MessageSink<K> {
    sink: K,
    max_frame_size: Option<usize>,
    activity: Arc<Activity>,
}

impl<K: FrameSink> MessageSink<K> {
    pub(crate) fn new(sink: K, max_frame_size: Option<usize>, activity: Arc<Activity>) -> Self {
        Self {
            sink,
            max_frame_size,
            activity,
        }
    }

    /// Write every frame of `message`, waiting for sink readiness before each one
    pub(crate) async fn write_message(&mut self, message: Message) -> WebSocketResult<()> {
        let kind = message.kind();
        match message {
            Message::Text(TextMessage::Strict(text)) => {
                self.write_strict(kind, Bytes::from(text)).await?
            }
            Message::Binary(BinaryMessage::Strict(data)) => self.write_strict(kind, data).await?,
            Message::Text(TextMessage::Streamed(chunks)) => {
                self.write_streamed(kind, chunks.map_chunks(Bytes::from))
                    .await?
            }
            Message::Binary(BinaryMessage::Streamed(chunks)) => {
                self.write_streamed(kind, chunks).await?
            }
        }
        self.activity.message_sent();
        Ok(())
    }

    async fn write_strict(&mut self, kind: DataKind, payload: Bytes) -> WebSocketResult<()> {
        let pieces = self.split(payload);
        let last = pieces.len().saturating_sub(1);
        for (index, piece) in pieces.into_iter().enumerate() {
            self.write_frame(FrameChunk::new(kind, piece, index == last))
                .await?;
        }
        Ok(())
    }

    async fn write_streamed(
        &mut self,
        kind: DataKind,
        mut chunks: ChunkStream<Bytes>,
    ) -> WebSocketResult<()> {
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|err| match err {
                WebSocketError::ConnectionClosed => err,
                other => WebSocketError::Handler(format!("outbound stream failed: {}", other)),
            })?;
            if chunk.is_empty() {
                continue;
            }
            for piece in self.split(chunk) {
                self.write_frame(FrameChunk::new(kind, piece, false)).await?;
            }
        }
        self.write_frame(FrameChunk::new(kind, Bytes::new(), true))
            .await
    }

    fn split(&self, payload: Bytes) -> Vec<Bytes> {
        match self.max_frame_size {
            Some(max) if max > 0 && payload.len() > max => (0..payload.len())
                .step_by(max)
                .map(|start| payload.slice(start..(start + max).min(payload.len())))
                .collect(),
            _ => vec![payload],
        }
    }

    async fn write_frame(&mut self, chunk: FrameChunk) -> WebSocketResult<()> {
        let len = chunk.len();
        self.sink.send(Frame::Data(chunk)).await?;
        self.activity.frame_sent(len);
        Ok(())
    }

    /// Send a close frame and close the sink; failures only get logged
    pub(crate) async fn close(&mut self, frame: CloseFrame) {
        trace!("Sending close frame {}", frame.code);
        if let Err(err) = self.sink.send(Frame::Close(Some(frame))).await {
            debug!("Failed to send close frame: {}", err);
        }
        if let Err(err) = self.sink.close().await {
            debug!("Failed to close frame sink: {}", err);
        }
    }
}

/// How the outbound direction stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutboundExit {
    /// Every sender was dropped and the queue was flushed
    Completed,
    /// The controller asked for a close
    Shutdown,
}

/// Completes once a close frame has been requested
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<Option<CloseFrame>>) {
    let signalled = shutdown.wait_for(Option::is_some).await.is_ok();
    if !signalled {
        std::future::pending::<()>().await;
    }
}

/// Write queued messages until the senders are gone or a close is requested,
/// then send the close frame.
///
/// A strict message is acknowledged with the result of its write, a streamed one
/// as soon as writing starts. Messages still queued at a close request are
/// dropped unwritten, which fails their sends.
pub(crate) async fn run_outbound<K: FrameSink>(
    mut sink: MessageSink<K>,
    mut queue: mpsc::Receiver<OutboundItem>,
    mut shutdown: watch::Receiver<Option<CloseFrame>>,
) -> WebSocketResult<OutboundExit> {
    let exit = loop {
        let OutboundItem { message, written } = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break OutboundExit::Shutdown,
            item = queue.recv() => match item {
                Some(item) => item,
                None => break OutboundExit::Completed,
            },
        };

        // A streamed payload may be fed by the sender itself.
        let ack = if message.is_strict() {
            Some(written)
        } else {
            let _ = written.send(Ok(()));
            None
        };

        // A close request abandons the message being written.
        let result = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break OutboundExit::Shutdown,
            result = sink.write_message(message) => result,
        };
        if let Some(ack) = ack {
            let _ = ack.send(result.clone());
        }

        if let Err(err) = result {
            if !matches!(
                err,
                WebSocketError::Transport(_) | WebSocketError::ConnectionClosed
            ) {
                sink.close(CloseReason::from_error(err.clone()).close_frame())
                    .await;
            }
            return Err(err);
        }
    };

    queue.close();
    let mut dropped = 0usize;
    while queue.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!("Dropped {} queued messages at close", dropped);
    }

    let frame = shutdown
        .borrow()
        .clone()
        .unwrap_or_else(CloseFrame::normal);
    sink.close(frame).await;
    Ok(exit)
}
