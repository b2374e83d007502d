//! Connection-level types: identifiers, state machine, close frames and close reasons

use crate::error::WebSocketError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for WebSocket connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Upgrade accepted, handler attached, not running yet
    Negotiating,
    /// Both directions are live
    Open,
    /// Directions are being flushed or terminated
    Closing,
    /// Terminal
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::Negotiating => "negotiating",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(state)
    }
}

/// Standard close codes used by the message layer
pub struct CloseCode;

impl CloseCode {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const INVALID_PAYLOAD: u16 = 1007;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Close frame information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal() -> Self {
        Self::new(CloseCode::NORMAL, "")
    }
}

/// Why a connection left the `Open` state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection or the inbound stream ended
    PeerClosed(Option<CloseFrame>),
    /// This side finished its outbound direction or requested a close
    Completed,
    /// No frame in either direction within the configured idle timeout
    IdleTimeout,
    /// Malformed frame sequence
    Protocol(String),
    /// Underlying I/O failure
    Transport(String),
    /// An inbound message grew past the configured limit
    MessageTooLarge { limit: usize },
    /// The application handler returned an error or panicked
    HandlerFailed(String),
}

impl CloseReason {
    /// Classify a connection-fatal error
    pub fn from_error(err: WebSocketError) -> Self {
        match err {
            WebSocketError::ConnectionClosed => Self::PeerClosed(None),
            WebSocketError::Transport(msg) => Self::Transport(msg),
            WebSocketError::MessageTooLarge { limit } => Self::MessageTooLarge { limit },
            WebSocketError::Handler(msg) => Self::HandlerFailed(msg),
            WebSocketError::Protocol(msg) => Self::Protocol(msg),
            other => Self::Protocol(other.to_string()),
        }
    }

    /// Close frame sent to the peer for this reason
    pub fn close_frame(&self) -> CloseFrame {
        match self {
            Self::PeerClosed(_) | Self::Completed => CloseFrame::normal(),
            Self::IdleTimeout => CloseFrame::new(CloseCode::GOING_AWAY, "idle timeout"),
            Self::Protocol(_) => CloseFrame::new(CloseCode::PROTOCOL_ERROR, "protocol error"),
            Self::MessageTooLarge { .. } => {
                CloseFrame::new(CloseCode::MESSAGE_TOO_BIG, "message too big")
            }
            Self::Transport(_) | Self::HandlerFailed(_) => {
                CloseFrame::new(CloseCode::INTERNAL_ERROR, "internal error")
            }
        }
    }

    /// Whether the close was caused by a failure rather than a normal shutdown
    pub fn is_error(&self) -> bool {
        !matches!(
            self,
            Self::PeerClosed(_) | Self::Completed | Self::IdleTimeout
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed(Some(frame)) => write!(f, "peer closed ({})", frame.code),
            Self::PeerClosed(None) => f.write_str("peer closed"),
            Self::Completed => f.write_str("completed"),
            Self::IdleTimeout => f.write_str("idle timeout"),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::MessageTooLarge { limit } => write!(f, "message exceeded {} bytes", limit),
            Self::HandlerFailed(msg) => write!(f, "handler failed: {}", msg),
        }
    }
}
