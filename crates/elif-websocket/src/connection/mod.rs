//! Connection lifecycle: Negotiating -> Open -> Closing -> Closed
//!
//! A running connection is three tasks (inbound pump, outbound writer, handler)
//! supervised by [`WebSocketConnection::run`], which decides why and how the
//! connection closes.

pub mod stats;

pub use stats::ConnectionStats;

use crate::adapter::{run_inbound, run_outbound, shutdown_requested, MessageSink, OutboundExit};
use crate::config::WebSocketConfig;
use crate::error::{WebSocketError, WebSocketResult};
use crate::frame::{Frame, FrameSink, FrameSource};
use crate::handler::{inbound_channel, Handler, Outbound};
use crate::logging::connection_closed_event;
use crate::strictifier::Strictifier;
use crate::types::{CloseFrame, CloseReason, ConnectionId, ConnectionState};
use futures_util::{FutureExt, Sink, Stream, StreamExt};
use stats::Activity;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

/// Close request shared by the controller and every [`ConnectionHandle`].
///
/// The first request wins; its frame is what the outbound writer sends.
#[derive(Debug, Clone)]
struct Shutdown {
    tx: Arc<watch::Sender<Option<CloseFrame>>>,
}

impl Shutdown {
    fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    fn trigger(&self, frame: CloseFrame) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(frame);
            true
        })
    }

    fn subscribe(&self) -> watch::Receiver<Option<CloseFrame>> {
        self.tx.subscribe()
    }
}

/// Cloneable view of a connection for observers outside the handler
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    state: watch::Receiver<ConnectionState>,
    activity: Arc<Activity>,
    shutdown: Shutdown,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.activity.snapshot()
    }

    /// Wait until the connection has reached `Closed`
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(ConnectionState::is_closed).await;
    }

    /// Ask for a normal close from this side
    pub fn close(&self) {
        if self.shutdown.trigger(CloseFrame::normal()) {
            debug!("Close requested for connection: {}", self.id);
        }
    }
}

/// One WebSocket connection with its handler attached
pub struct WebSocketConnection {
    id: ConnectionId,
    handler: Handler,
    config: WebSocketConfig,
    protocol: Option<String>,
    state: watch::Sender<ConnectionState>,
    activity: Arc<Activity>,
    shutdown: Shutdown,
}

impl WebSocketConnection {
    pub fn new(handler: Handler, config: WebSocketConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Negotiating);
        Self {
            id: ConnectionId::new(),
            handler,
            config,
            protocol: None,
            state,
            activity: Arc::new(Activity::new()),
            shutdown: Shutdown::new(),
        }
    }

    pub(crate) fn with_protocol(mut self, protocol: Option<String>) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Negotiated sub-protocol
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id,
            state: self.state.subscribe(),
            activity: self.activity.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Run over a codec that is both the frame source and the frame sink
    pub async fn run_codec<C>(self, codec: C) -> CloseReason
    where
        C: Stream<Item = WebSocketResult<Frame>>
            + Sink<Frame, Error = WebSocketError>
            + Send
            + 'static,
    {
        let (sink, source) = codec.split();
        self.run(source, sink).await
    }

    /// Open the connection and run it to `Closed`
    pub async fn run<S, K>(self, source: S, sink: K) -> CloseReason
    where
        S: FrameSource,
        K: FrameSink,
    {
        let id = self.id;
        let config = self.config.clone();

        if let Err(err) = config.validate() {
            warn!("WebSocket connection {} running with adjusted config: {}", id, err);
        }

        self.activity.reset();
        let (deliver, inbound) = inbound_channel(1);
        let inbound_failure = deliver.failure();
        let (queue_tx, queue) = mpsc::channel(config.outbound_buffer.max(1));

        self.state.send_replace(ConnectionState::Open);
        info!("WebSocket connection opened: {}", id);

        let mut inbound_task = Some(tokio::spawn(run_inbound(
            source,
            Strictifier::new(&config),
            deliver,
            self.activity.clone(),
        )));
        let mut outbound_task = Some(tokio::spawn(run_outbound(
            MessageSink::new(sink, config.max_frame_size, self.activity.clone()),
            queue,
            self.shutdown.subscribe(),
        )));

        let handler = self.handler.clone();
        let outbound = Outbound::new(
            queue_tx.clone(),
            self.state.subscribe(),
            self.shutdown.subscribe(),
        );
        let mut handler_task = Some(tokio::spawn(async move {
            match AssertUnwindSafe(handler.run(inbound, outbound))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(format!("{:#}", err)),
                Err(panic) => Err(panic_message(panic)),
            }
        }));

        // Keeps the outbound direction open until the handler has finished.
        let mut queue_guard = Some(queue_tx);
        let mut close_requests = self.shutdown.subscribe();

        let reason = loop {
            tokio::select! {
                biased;
                result = join(&mut handler_task) => match flatten(result) {
                    Ok(()) => {
                        debug!("Handler finished for connection: {}", id);
                        drop(queue_guard.take());
                    }
                    // A handler that gave up on a failed inbound sequence closes for that failure.
                    Err(msg) => break match inbound_failure.get() {
                        Some(err) => CloseReason::from_error(err.clone()),
                        None => CloseReason::HandlerFailed(msg),
                    },
                },
                result = join(&mut inbound_task) => break match result {
                    Ok(Ok(frame)) => CloseReason::PeerClosed(frame),
                    Ok(Err(err)) => CloseReason::from_error(err),
                    Err(err) => CloseReason::Transport(err.to_string()),
                },
                result = join(&mut outbound_task) => break match result {
                    Ok(Ok(_)) => CloseReason::Completed,
                    Ok(Err(err)) => CloseReason::from_error(err),
                    Err(err) => CloseReason::Transport(err.to_string()),
                },
                _ = shutdown_requested(&mut close_requests) => break CloseReason::Completed,
                _ = idle_expired(&self.activity, config.idle_timeout) => break CloseReason::IdleTimeout,
            }
        };

        // Sends stop being accepted as soon as Closing is observable, except while
        // answering a peer close.
        if !matches!(reason, CloseReason::PeerClosed(_)) {
            self.shutdown.trigger(reason.close_frame());
        }
        self.state.send_replace(ConnectionState::Closing);
        if reason.is_error() {
            warn!("WebSocket connection {} closing: {}", id, reason);
        } else {
            info!("WebSocket connection {} closing: {}", id, reason);
        }

        let grace = config.close_timeout;
        match reason {
            CloseReason::PeerClosed(_) => {
                // The handler may still be answering the last messages.
                drop(queue_guard.take());
                if let Some(exit) = wait(&mut outbound_task, grace).await {
                    log_outbound_exit(id, exit);
                }
            }
            CloseReason::Completed => {
                if let Some(result) = wait(&mut inbound_task, grace).await {
                    debug!("Peer close observed for {}: {:?}", id, result.ok());
                }
            }
            _ => {}
        }

        self.shutdown.trigger(reason.close_frame());
        if inbound_task.as_ref().is_some_and(|task| !task.is_finished()) {
            let _ = inbound_failure.set(WebSocketError::ConnectionClosed);
        }
        abort(&mut inbound_task);
        drop(queue_guard);

        if let Some(exit) = wait(&mut outbound_task, grace).await {
            log_outbound_exit(id, exit);
        }
        abort(&mut outbound_task);

        if let Some(result) = wait(&mut handler_task, grace).await {
            if let Err(msg) = flatten(result) {
                debug!("Handler for {} ended with an error after close: {}", id, msg);
            }
        }
        abort(&mut handler_task);

        self.state.send_replace(ConnectionState::Closed);
        let stats = self.activity.snapshot();
        info!(
            target: "elif::websocket",
            "{}",
            connection_closed_event(id, &reason, &stats)
        );

        reason
    }
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("protocol", &self.protocol)
            .field("handler", &self.handler)
            .finish()
    }
}

/// Completes when `task` does; pends forever once it has already been joined
async fn join<T>(task: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match task.as_mut() {
        Some(handle) => {
            let result = handle.await;
            *task = None;
            result
        }
        None => std::future::pending().await,
    }
}

async fn wait<T>(task: &mut Option<JoinHandle<T>>, grace: Duration) -> Option<Result<T, JoinError>> {
    if task.is_none() {
        return None;
    }
    timeout(grace, join(task)).await.ok()
}

fn abort<T>(task: &mut Option<JoinHandle<T>>) {
    if let Some(handle) = task.take() {
        handle.abort();
    }
}

fn flatten(result: Result<Result<(), String>, JoinError>) -> Result<(), String> {
    match result {
        Ok(outcome) => outcome,
        Err(err) => Err(err.to_string()),
    }
}

fn log_outbound_exit(id: ConnectionId, exit: Result<WebSocketResult<OutboundExit>, JoinError>) {
    match exit {
        Ok(Ok(exit)) => debug!("Outbound direction of {} stopped: {:?}", id, exit),
        Ok(Err(err)) => debug!("Outbound direction of {} failed: {}", id, err),
        Err(err) => debug!("Outbound task of {} did not finish: {}", id, err),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", msg)
    } else {
        "handler panicked".to_string()
    }
}

/// Completes once nothing crossed the connection for `idle_timeout`
async fn idle_expired(activity: &Activity, idle_timeout: Option<Duration>) {
    let Some(idle_timeout) = idle_timeout else {
        return std::future::pending().await;
    };

    loop {
        let deadline = activity.last_activity() + idle_timeout;
        if Instant::now() >= deadline {
            return;
        }
        sleep_until(deadline).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::transport;
    use crate::types::CloseCode;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_shutdown_first_request_wins() {
        let shutdown = Shutdown::new();
        let rx = shutdown.subscribe();

        assert!(shutdown.trigger(CloseFrame::new(CloseCode::GOING_AWAY, "idle timeout")));
        assert!(!shutdown.trigger(CloseFrame::normal()));
        assert_eq!(rx.borrow().as_ref().map(|f| f.code), Some(CloseCode::GOING_AWAY));
    }

    #[tokio::test]
    async fn test_new_connection_is_negotiating() {
        let connection = WebSocketConnection::new(Handler::uppercase_echo(), WebSocketConfig::default());
        let handle = connection.handle();

        assert_eq!(connection.state(), ConnectionState::Negotiating);
        assert_eq!(handle.state(), ConnectionState::Negotiating);
        assert_eq!(handle.id(), connection.id());
        assert!(connection.protocol().is_none());
    }

    #[tokio::test]
    async fn test_local_close_request() {
        let connection = WebSocketConnection::new(
            Handler::from_fn(|_inbound, _outbound| async move {
                std::future::pending::<()>().await;
                Ok(())
            }),
            WebSocketConfig::default().with_close_timeout(Duration::from_millis(50)),
        );
        let handle = connection.handle();
        let (source, sink, mut peer) = transport(8);
        let running = tokio::spawn(connection.run(source, sink));

        handle.close();
        let close = peer.next_frame().await;
        assert_eq!(close, Some(Frame::Close(Some(CloseFrame::normal()))));
        peer.close(None).await;

        assert_eq!(running.await.unwrap(), CloseReason::Completed);
        handle.closed().await;
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_lifecycle_is_logged() {
        let connection = WebSocketConnection::new(Handler::uppercase_echo(), WebSocketConfig::default());
        let (source, sink, mut peer) = transport(8);
        let running = tokio::spawn(connection.run(source, sink));

        peer.close(Some(CloseFrame::normal())).await;
        assert_eq!(
            running.await.unwrap(),
            CloseReason::PeerClosed(Some(CloseFrame::normal()))
        );

        assert!(logs_contain("WebSocket connection opened"));
        assert!(logs_contain("closing: peer closed (1000)"));
    }

    #[test]
    fn test_panic_message_extraction() {
        let panic: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(panic), "handler panicked: boom");

        let panic: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(panic), "handler panicked");
    }
}
