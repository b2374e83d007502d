//! # elif-websocket
//!
//! WebSocket message layer for the elif.rs framework.
//!
//! ## Features
//!
//! - **Strict or streamed messages**: small messages that arrive at once are
//!   materialized, everything else is exposed as a chunk stream
//! - **Backpressure in both directions**: one open message per direction, bounded
//!   buffers between the socket and the handler
//! - **Two handler shapes**: a combined transform or a producer/consumer pair
//! - **Lifecycle control**: idle timeout, close grace period, close codes per failure
//! - **axum and tokio-tungstenite**: upgrade through axum or run the handshake directly
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use elif_websocket::{Handler, WebSocketEndpoint};
//!
//! # async fn serve() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = WebSocketEndpoint::new(Handler::uppercase_echo()).protocols(["chat"]);
//! let app: axum::Router = endpoint.into_router("/ws");
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

mod adapter;
mod strictifier;

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handler;
pub mod logging;
pub mod message;
pub mod server;
pub mod testing;
pub mod types;
pub mod upgrade;

// Re-export main types
pub use codec::{serve, AxumCodec, TungsteniteCodec};
pub use config::{WebSocketConfig, WebSocketDefaults};
pub use connection::{ConnectionHandle, ConnectionStats, WebSocketConnection};
pub use error::{ConfigError, WebSocketError, WebSocketResult};
pub use frame::{DataKind, Frame, FrameChunk, FrameSink, FrameSource};
pub use handler::{
    Handler, HandlerResult, Inbound, MessageConsumer, MessageHandler, MessageProducer, Outbound,
};
pub use logging::{init_logging, LoggingConfig};
pub use message::{BinaryMessage, ChunkStream, Message, TextMessage};
pub use server::WebSocketEndpoint;
pub use types::{CloseCode, CloseFrame, CloseReason, ConnectionId, ConnectionState};
pub use upgrade::{AcceptedUpgrade, UpgradeRejection, UpgradeRequest, UpgradeResponse};
