//! Inbound direction: frames from the codec become messages for the handler

use crate::connection::stats::Activity;
use crate::error::{WebSocketError, WebSocketResult};
use crate::frame::{Frame, FrameChunk, FrameSource};
use crate::handler::InboundSender;
use crate::message::Message;
use crate::strictifier::{Strictified, Strictifier};
use crate::types::CloseFrame;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tracing::{debug, trace};

/// Payload chunks of the data frames read from a codec.
///
/// A close frame ends the sequence; the peer's close frame is kept for the
/// close reason.
pub(crate) struct ChunkSource<S> {
    inner: S,
    activity: Arc<Activity>,
    peer_close: Option<CloseFrame>,
    ended: bool,
}

impl<S: FrameSource> ChunkSource<S> {
    pub(crate) fn new(inner: S, activity: Arc<Activity>) -> Self {
        Self {
            inner,
            activity,
            peer_close: None,
            ended: false,
        }
    }

    pub(crate) fn take_peer_close(&mut self) -> Option<CloseFrame> {
        self.peer_close.take()
    }
}

impl<S: FrameSource> Stream for ChunkSource<S> {
    type Item = WebSocketResult<FrameChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.ended {
            return Poll::Ready(None);
        }

        match ready!(this.inner.poll_next_unpin(cx)) {
            Some(Ok(Frame::Data(chunk))) => {
                this.activity.frame_received(chunk.len());
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Ok(Frame::Close(frame))) => {
                this.activity.touch();
                trace!("Peer close frame: {:?}", frame);
                this.peer_close = frame;
                this.ended = true;
                Poll::Ready(None)
            }
            Some(Err(err)) => {
                this.ended = true;
                Poll::Ready(Some(Err(err)))
            }
            None => {
                this.ended = true;
                Poll::Ready(None)
            }
        }
    }
}

/// Read messages from `source` until the peer closes.
///
/// Messages are handed over one at a time; a streamed message must be drained or
/// dropped by its consumer before the next one is read. A closed `deliver`
/// channel discards everything that follows. Returns the peer's close frame on a
/// clean close; any other error is also reported to the handler as the end of its
/// inbound sequence.
pub(crate) async fn run_inbound<S: FrameSource>(
    source: S,
    strictifier: Strictifier,
    deliver: InboundSender,
    activity: Arc<Activity>,
) -> WebSocketResult<Option<CloseFrame>> {
    let mut chunks = ChunkSource::new(source, activity.clone());

    match read_messages(&mut chunks, &strictifier, &deliver, &activity).await {
        Ok(()) | Err(WebSocketError::ConnectionClosed) => Ok(chunks.take_peer_close()),
        Err(err) => {
            debug!("Inbound direction failed: {}", err);
            deliver.fail(err.clone());
            Err(err)
        }
    }
}

async fn read_messages<S: FrameSource>(
    chunks: &mut ChunkSource<S>,
    strictifier: &Strictifier,
    deliver: &InboundSender,
    activity: &Activity,
) -> WebSocketResult<()> {
    while let Some(first) = chunks.next().await {
        let first = first?;
        match strictifier.strictify(first, chunks).await? {
            Strictified::Strict(message) => {
                activity.message_received();
                hand_over(deliver, message).await;
            }
            Strictified::Streamed(message, pump) => {
                activity.message_received();
                hand_over(deliver, message).await;
                pump.run(chunks).await?;
            }
        }
    }
    Ok(())
}

async fn hand_over(deliver: &InboundSender, message: Message) {
    if let Err(message) = deliver.deliver(message).await {
        debug!("No inbound consumer; discarding {:?} message", message.kind());
        message.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebSocketConfig;
    use crate::handler::inbound_channel;
    use futures_util::stream;

    fn frames(frames: Vec<Frame>) -> impl FrameSource {
        stream::iter(frames.into_iter().map(Ok::<Frame, WebSocketError>))
    }

    #[tokio::test]
    async fn test_messages_delivered_in_order() {
        let source = frames(vec![
            FrameChunk::text("one", true).into(),
            FrameChunk::binary(vec![2u8], true).into(),
            FrameChunk::text("th", false).into(),
            FrameChunk::text("ree", true).into(),
            Frame::Close(Some(CloseFrame::normal())),
        ]);
        let (tx, mut rx) = inbound_channel(8);
        let activity = Arc::new(Activity::new());
        let strictifier = Strictifier::new(&WebSocketConfig::default());

        let close = run_inbound(source, strictifier, tx, activity.clone())
            .await
            .unwrap();

        assert_eq!(close, Some(CloseFrame::normal()));
        assert_eq!(rx.recv().await.unwrap().unwrap().as_text().unwrap(), "one");
        assert_eq!(rx.recv().await.unwrap().unwrap().as_binary().unwrap(), &[2u8]);
        assert_eq!(rx.recv().await.unwrap().unwrap().as_text().unwrap(), "three");
        assert!(rx.recv().await.is_none());

        let stats = activity.snapshot();
        assert_eq!(stats.frames_received, 4);
        assert_eq!(stats.messages_received, 3);
    }

    #[tokio::test]
    async fn test_end_inside_message_is_clean_close() {
        let source = frames(vec![FrameChunk::text("partial", false).into()]);
        let (tx, _rx) = inbound_channel(8);
        let strictifier = Strictifier::new(&WebSocketConfig::default());

        let close = run_inbound(source, strictifier, tx, Arc::new(Activity::new())).await;
        assert_eq!(close, Ok(None));
    }

    #[tokio::test]
    async fn test_codec_error_is_returned() {
        let source = stream::iter(vec![
            Ok(FrameChunk::text("fine", true).into()),
            Err::<Frame, _>(WebSocketError::Protocol("bad opcode".into())),
        ]);
        let (tx, mut rx) = inbound_channel(8);
        let strictifier = Strictifier::new(&WebSocketConfig::default());

        let result = run_inbound(source, strictifier, tx, Arc::new(Activity::new())).await;
        assert_eq!(result, Err(WebSocketError::Protocol("bad opcode".into())));

        assert_eq!(rx.recv().await.unwrap().unwrap().as_text().unwrap(), "fine");
        assert!(matches!(
            rx.recv().await,
            Some(Err(WebSocketError::Protocol(reason))) if reason == "bad opcode"
        ));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_messages_discarded_without_consumer() {
        let source = frames(vec![
            FrameChunk::binary(vec![0u8; 32], false).into(),
            FrameChunk::binary(vec![0u8; 32], true).into(),
            FrameChunk::text("after", true).into(),
        ]);
        let (tx, rx) = inbound_channel(1);
        drop(rx);
        let strictifier =
            Strictifier::new(&WebSocketConfig::default().with_max_strict_bytes(16));

        let close = run_inbound(source, strictifier, tx, Arc::new(Activity::new())).await;
        assert_eq!(close, Ok(None));
    }
}
