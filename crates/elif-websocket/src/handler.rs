//! Application handlers and the two message channels they work with
//!
//! A handler is either one combined transform that owns both directions, or a
//! producer/consumer pair that runs them independently.

use crate::error::{WebSocketError, WebSocketResult};
use crate::message::{Message, TextMessage};
use crate::types::{CloseFrame, ConnectionState};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{ready, Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};

/// Result returned by application handlers
pub type HandlerResult = anyhow::Result<()>;

/// Why the inbound sequence ended, if it did not end cleanly
pub(crate) type InboundFailure = Arc<OnceLock<WebSocketError>>;

/// Create the inbound channel between the inbound pump and the handler
pub(crate) fn inbound_channel(capacity: usize) -> (InboundSender, Inbound) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let failure = InboundFailure::default();
    (
        InboundSender {
            tx,
            failure: failure.clone(),
        },
        Inbound {
            rx,
            failure,
            finished: false,
        },
    )
}

/// Pump side of [`Inbound`]
#[derive(Debug)]
pub(crate) struct InboundSender {
    tx: mpsc::Sender<Message>,
    failure: InboundFailure,
}

impl InboundSender {
    /// Hand a message to the handler; gives it back if nobody is listening
    pub(crate) async fn deliver(&self, message: Message) -> Result<(), Message> {
        self.tx
            .send(message)
            .await
            .map_err(|mpsc::error::SendError(message)| message)
    }

    /// Record the error the handler sees after the last delivered message
    pub(crate) fn fail(&self, err: WebSocketError) {
        let _ = self.failure.set(err);
    }

    pub(crate) fn failure(&self) -> InboundFailure {
        self.failure.clone()
    }
}

/// Messages received from the peer, in arrival order.
///
/// Every streamed payload must be read to the end or dropped. The next message is
/// not read from the connection until then, so a streamed message that is held
/// without being consumed stalls the inbound direction.
///
/// A clean close ends the sequence with `None`. A malformed frame sequence, a
/// transport failure or a local teardown yields one final `Err` first.
#[derive(Debug)]
pub struct Inbound {
    rx: mpsc::Receiver<Message>,
    failure: InboundFailure,
    finished: bool,
}

impl Inbound {
    /// Next message, the error that ended the sequence, or `None` once it is over
    pub async fn recv(&mut self) -> Option<WebSocketResult<Message>> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(message) => Some(Ok(message)),
            None => self.finish(),
        }
    }

    fn finish(&mut self) -> Option<WebSocketResult<Message>> {
        self.finished = true;
        self.failure.get().cloned().map(Err)
    }
}

impl Stream for Inbound {
    type Item = WebSocketResult<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match ready!(self.rx.poll_recv(cx)) {
            Some(message) => Poll::Ready(Some(Ok(message))),
            None => Poll::Ready(self.finish()),
        }
    }
}

/// A queued outbound message and the acknowledgement its sender waits for
#[derive(Debug)]
pub(crate) struct OutboundItem {
    pub(crate) message: Message,
    pub(crate) written: oneshot::Sender<WebSocketResult<()>>,
}

/// Sends messages to the peer; clones share the same bounded queue.
///
/// `send` resolves once a strict message has been written to the codec, or once
/// the writer has started on a streamed one. A message that never makes it out
/// fails with `ConnectionClosed`, including messages still queued when the
/// connection closes. New sends are rejected once the connection is closing,
/// except while the outbound direction is flushed after the peer closed.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<OutboundItem>,
    state: watch::Receiver<ConnectionState>,
    close_requested: watch::Receiver<Option<CloseFrame>>,
}

impl Outbound {
    pub(crate) fn new(
        tx: mpsc::Sender<OutboundItem>,
        state: watch::Receiver<ConnectionState>,
        close_requested: watch::Receiver<Option<CloseFrame>>,
    ) -> Self {
        Self {
            tx,
            state,
            close_requested,
        }
    }

    /// Send a message, waiting while the outbound buffer is full
    pub async fn send(&self, message: impl Into<Message>) -> WebSocketResult<()> {
        if !self.is_open() {
            return Err(WebSocketError::ConnectionClosed);
        }

        let (written, ack) = oneshot::channel();
        let item = OutboundItem {
            message: message.into(),
            written,
        };
        self.tx
            .send(item)
            .await
            .map_err(|_| WebSocketError::ConnectionClosed)?;
        ack.await.unwrap_or(Err(WebSocketError::ConnectionClosed))
    }

    pub async fn send_text<T: Into<String>>(&self, text: T) -> WebSocketResult<()> {
        self.send(Message::text(text)).await
    }

    pub async fn send_binary<T: Into<Bytes>>(&self, data: T) -> WebSocketResult<()> {
        self.send(Message::binary(data)).await
    }

    /// Whether new messages are still accepted
    pub fn is_open(&self) -> bool {
        // Closing without a close request is the flush that follows a peer close.
        let accepting = matches!(
            *self.state.borrow(),
            ConnectionState::Open | ConnectionState::Closing
        );
        accepting && self.close_requested.borrow().is_none() && !self.tx.is_closed()
    }
}

/// Handler owning both directions of a connection
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, inbound: Inbound, outbound: Outbound) -> HandlerResult;
}

/// Outbound half of a split handler
#[async_trait]
pub trait MessageProducer: Send + Sync + 'static {
    async fn produce(&self, outbound: Outbound) -> HandlerResult;
}

/// Inbound half of a split handler
#[async_trait]
pub trait MessageConsumer: Send + Sync + 'static {
    async fn consume(&self, inbound: Inbound) -> HandlerResult;
}

/// Application handler attached to a connection
#[derive(Clone)]
pub enum Handler {
    /// One transform over both channels
    Combined(Arc<dyn MessageHandler>),
    /// Independent producer and consumer
    Split {
        producer: Arc<dyn MessageProducer>,
        consumer: Arc<dyn MessageConsumer>,
    },
}

impl Handler {
    pub fn combined<H: MessageHandler>(handler: H) -> Self {
        Self::Combined(Arc::new(handler))
    }

    pub fn split<P, C>(producer: P, consumer: C) -> Self
    where
        P: MessageProducer,
        C: MessageConsumer,
    {
        Self::Split {
            producer: Arc::new(producer),
            consumer: Arc::new(consumer),
        }
    }

    /// Combined handler from an async closure
    pub fn from_fn<F, Fut>(handler: F) -> Self
    where
        F: Fn(Inbound, Outbound) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::combined(FnHandler { handler })
    }

    /// Split handler from two async closures
    pub fn split_fn<P, PFut, C, CFut>(producer: P, consumer: C) -> Self
    where
        P: Fn(Outbound) -> PFut + Send + Sync + 'static,
        PFut: Future<Output = HandlerResult> + Send + 'static,
        C: Fn(Inbound) -> CFut + Send + Sync + 'static,
        CFut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::split(FnProducer { producer }, FnConsumer { consumer })
    }

    /// Reply to each inbound message with at most one outbound message.
    ///
    /// A streamed reply built from a streamed inbound payload is forwarded chunk
    /// by chunk.
    pub fn map<F>(f: F) -> Self
    where
        F: Fn(Message) -> Option<Message> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::from_fn(move |mut inbound: Inbound, outbound: Outbound| {
            let f = f.clone();
            async move {
                while let Some(message) = inbound.recv().await {
                    if let Some(reply) = f(message?) {
                        outbound.send(reply).await?;
                    }
                }
                Ok(())
            }
        })
    }

    /// Echo every message back, upper-casing text
    pub fn uppercase_echo() -> Self {
        Self::map(|message| match message {
            Message::Text(TextMessage::Strict(text)) => Some(Message::text(text.to_uppercase())),
            Message::Text(TextMessage::Streamed(chunks)) => Some(Message::Text(
                TextMessage::Streamed(chunks.map_chunks(|chunk| chunk.to_uppercase())),
            )),
            binary => Some(binary),
        })
    }

    pub(crate) async fn run(&self, inbound: Inbound, outbound: Outbound) -> HandlerResult {
        match self {
            Self::Combined(handler) => handler.handle(inbound, outbound).await,
            Self::Split { producer, consumer } => {
                tokio::try_join!(producer.produce(outbound), consumer.consume(inbound))?;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Combined(_) => f.write_str("Handler::Combined"),
            Self::Split { .. } => f.write_str("Handler::Split"),
        }
    }
}

struct FnHandler<F> {
    handler: F,
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Inbound, Outbound) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, inbound: Inbound, outbound: Outbound) -> HandlerResult {
        (self.handler)(inbound, outbound).await
    }
}

struct FnProducer<F> {
    producer: F,
}

#[async_trait]
impl<F, Fut> MessageProducer for FnProducer<F>
where
    F: Fn(Outbound) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn produce(&self, outbound: Outbound) -> HandlerResult {
        (self.producer)(outbound).await
    }
}

struct FnConsumer<F> {
    consumer: F,
}

#[async_trait]
impl<F, Fut> MessageConsumer for FnConsumer<F>
where
    F: Fn(Inbound) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn consume(&self, inbound: Inbound) -> HandlerResult {
        (self.consumer)(inbound).await
    }
}
