//! Frame codecs over real sockets
//!
//! Both codecs present a connection as a stream of [`Frame`](crate::frame::Frame)s
//! and a sink accepting them; control frames other than close never reach the
//! message layer.
//!
//! Neither socket library exposes inbound fragments. Each received message is
//! reassembled by tungstenite (or axum) and handed over as a single final chunk,
//! so the whole payload is buffered, up to `max_message_size`, before the
//! strictifier sees it. Incremental inbound streaming only takes effect over
//! transports that yield partial frames, such as [`testing`](crate::testing).
//! Outbound fragmentation is unaffected on the tungstenite codec.

pub mod axum;
pub mod tungstenite;

pub use self::axum::AxumCodec;
pub use self::tungstenite::{serve, TungsteniteCodec};
