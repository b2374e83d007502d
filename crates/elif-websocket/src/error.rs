//! Error types for the WebSocket message layer

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// WebSocket errors - clean API over codec, transport and application failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebSocketError {
    /// A strict accessor was called on a streamed message
    #[error("Message is streamed; use the streaming accessor")]
    NotStrict,

    /// A text accessor was called on a binary message or the other way around
    #[error("Invalid message type")]
    InvalidMessageType,

    /// Malformed frame sequence reported by the codec
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Underlying I/O failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection closed while a message or write was in flight
    #[error("Connection closed")]
    ConnectionClosed,

    /// A text message carried bytes that are not valid UTF-8
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    /// A message grew past the configured limit
    #[error("Message exceeds the limit of {limit} bytes")]
    MessageTooLarge { limit: usize },

    /// The application handler failed
    #[error("Handler failed: {0}")]
    Handler(String),

    /// The upgrade request could not be accepted
    #[error("Upgrade rejected: {0}")]
    Upgrade(String),
}

impl WebSocketError {
    /// Whether the error tears down the whole connection rather than one message
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::NotStrict | Self::InvalidMessageType | Self::InvalidUtf8
        )
    }
}

impl From<std::io::Error> for WebSocketError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<tungstenite::Error> for WebSocketError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::ConnectionClosed
            }
            tungstenite::Error::Protocol(msg) => Self::Protocol(msg.to_string()),
            tungstenite::Error::Utf8 => Self::InvalidUtf8,
            tungstenite::Error::Capacity(msg) => Self::Protocol(msg.to_string()),
            tungstenite::Error::Io(io_err) => Self::Transport(io_err.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<axum::Error> for WebSocketError {
    fn from(err: axum::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result type for WebSocket operations
pub type WebSocketResult<T> = Result<T, WebSocketError>;

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },
}

impl ConfigError {
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_local_errors_are_not_fatal() {
        assert!(!WebSocketError::NotStrict.is_fatal());
        assert!(!WebSocketError::InvalidUtf8.is_fatal());
        assert!(WebSocketError::Protocol("bad opcode".into()).is_fatal());
        assert!(WebSocketError::ConnectionClosed.is_fatal());
    }

    #[test]
    fn test_io_error_maps_to_transport() {
        let err: WebSocketError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into();
        assert!(matches!(err, WebSocketError::Transport(msg) if msg.contains("pipe closed")));
    }

    #[test]
    fn test_tungstenite_error_mapping() {
        assert_eq!(
            WebSocketError::from(tungstenite::Error::ConnectionClosed),
            WebSocketError::ConnectionClosed
        );
        assert_eq!(
            WebSocketError::from(tungstenite::Error::Utf8),
            WebSocketError::InvalidUtf8
        );
    }
}
