//! WebSocket connection configuration
//!
//! Every knob of the message layer lives here: idle teardown, close grace period,
//! the strictification threshold and collect window, frame splitting and buffer
//! sizes. Values load from the environment the same way `HttpConfig` does.

use super::defaults::WebSocketDefaults;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// WebSocket message layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Close the connection after this long without a frame in either direction
    pub idle_timeout: Option<Duration>,
    /// Grace period for flushing and draining once the connection is closing
    pub close_timeout: Duration,
    /// Largest inbound message that may be delivered as a strict value
    pub max_strict_bytes: usize,
    /// How long the strictifier waits for the rest of a message; `None` means
    /// only chunks already available are collected
    pub strict_collect_window: Option<Duration>,
    /// Outbound payloads larger than this are split across frames
    pub max_frame_size: Option<usize>,
    /// Largest inbound message accepted on the connection
    pub max_message_size: Option<usize>,
    /// Outbound messages queued between the handler and the writer
    pub outbound_buffer: usize,
    /// Chunks buffered per streamed inbound message
    pub stream_buffer: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(WebSocketDefaults::IDLE_TIMEOUT_SECS)),
            close_timeout: Duration::from_secs(WebSocketDefaults::CLOSE_TIMEOUT_SECS),
            max_strict_bytes: WebSocketDefaults::MAX_STRICT_BYTES,
            strict_collect_window: None,
            max_frame_size: Some(WebSocketDefaults::MAX_FRAME_SIZE),
            max_message_size: Some(WebSocketDefaults::MAX_MESSAGE_SIZE),
            outbound_buffer: WebSocketDefaults::OUTBOUND_BUFFER,
            stream_buffer: WebSocketDefaults::STREAM_BUFFER,
        }
    }
}

impl WebSocketConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let idle_timeout = match parse_env::<u64>("WS_IDLE_TIMEOUT", "number of seconds")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.idle_timeout,
        };

        let close_timeout = parse_env::<u64>("WS_CLOSE_TIMEOUT", "number of seconds")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.close_timeout);

        let max_strict_bytes = parse_env::<usize>("WS_MAX_STRICT_BYTES", "number of bytes")?
            .unwrap_or(defaults.max_strict_bytes);

        let strict_collect_window =
            match parse_env::<u64>("WS_STRICT_COLLECT_WINDOW_MS", "number of milliseconds")? {
                Some(0) => None,
                Some(ms) => Some(Duration::from_millis(ms)),
                None => defaults.strict_collect_window,
            };

        let max_frame_size = parse_env::<usize>("WS_MAX_FRAME_SIZE", "number of bytes")?
            .or(defaults.max_frame_size);

        let max_message_size = parse_env::<usize>("WS_MAX_MESSAGE_SIZE", "number of bytes")?
            .or(defaults.max_message_size);

        let outbound_buffer = parse_env::<usize>("WS_OUTBOUND_BUFFER", "number of messages")?
            .unwrap_or(defaults.outbound_buffer);

        let stream_buffer = parse_env::<usize>("WS_STREAM_BUFFER", "number of chunks")?
            .unwrap_or(defaults.stream_buffer);

        let config = Self {
            idle_timeout,
            close_timeout,
            max_strict_bytes,
            strict_collect_window,
            max_frame_size,
            max_message_size,
            outbound_buffer,
            stream_buffer,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.close_timeout.is_zero() {
            return Err(ConfigError::validation_failed(
                "Close timeout must be greater than 0",
            ));
        }

        if self.outbound_buffer == 0 || self.stream_buffer == 0 {
            return Err(ConfigError::validation_failed(
                "Outbound and stream buffers must hold at least one item",
            ));
        }

        if self.max_frame_size == Some(0) {
            return Err(ConfigError::validation_failed(
                "Maximum frame size must be greater than 0",
            ));
        }

        if let Some(max_message_size) = self.max_message_size {
            if self.max_strict_bytes > max_message_size {
                return Err(ConfigError::validation_failed(
                    "Strictification threshold cannot exceed the maximum message size",
                ));
            }
        }

        Ok(())
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn with_max_strict_bytes(mut self, bytes: usize) -> Self {
        self.max_strict_bytes = bytes;
        self
    }

    pub fn with_strict_collect_window(mut self, window: Option<Duration>) -> Self {
        self.strict_collect_window = window;
        self
    }

    pub fn with_max_frame_size(mut self, size: Option<usize>) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_max_message_size(mut self, size: Option<usize>) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_outbound_buffer(mut self, messages: usize) -> Self {
        self.outbound_buffer = messages;
        self
    }

    pub fn with_stream_buffer(mut self, chunks: usize) -> Self {
        self.stream_buffer = chunks;
        self
    }
}

// Helper for optional, typed environment variables
fn parse_env<T: FromStr>(key: &str, expected: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: key.to_string(),
                value,
                expected: format!("valid {}", expected),
            }),
        Err(_) => Ok(None),
    }
}
