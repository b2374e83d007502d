//! # Structured Logging Integration
//!
//! Subscriber setup for services embedding the message layer, and the structured
//! connection events the controller emits.

use crate::connection::ConnectionStats;
use crate::types::{CloseReason, ConnectionId};
use serde_json::{json, Value};
use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    /// Enable JSON structured logging (vs plain text)
    pub json_format: bool,
    /// Enable pretty printing for development
    pub pretty_print: bool,
    /// Include file and line number information
    pub include_location: bool,
    /// Environment filter (e.g. "elif_websocket=debug,tokio_tungstenite=warn")
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            pretty_print: true,
            include_location: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    /// Create production logging configuration
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            json_format: true,
            pretty_print: false,
            include_location: false,
            env_filter: Some("elif_websocket=info,tokio_tungstenite=warn,axum=warn".to_string()),
        }
    }

    /// Create development logging configuration
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            json_format: false,
            pretty_print: true,
            include_location: true,
            env_filter: Some("elif_websocket=debug,tokio_tungstenite=debug".to_string()),
        }
    }

    /// Create test logging configuration (minimal output)
    pub fn test() -> Self {
        Self {
            level: "error".to_string(),
            json_format: false,
            pretty_print: false,
            include_location: false,
            env_filter: Some("elif_websocket=error".to_string()),
        }
    }

    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }
}

/// Install a global subscriber; fails if one is already installed
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = config.env_filter.as_deref().unwrap_or(&config.level);
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(env_filter))?;

    let layer = Layer::new()
        .with_writer(io::stdout)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()?;
    } else if config.pretty_print {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.pretty())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()?;
    }

    let init_msg = json!({
        "message": "Structured logging initialized",
        "config": {
            "level": config.level,
            "json_format": config.json_format,
            "pretty_print": config.pretty_print,
        }
    });
    tracing::info!(target: "elif::logging", "{}", init_msg);

    Ok(())
}

/// Structured record of a finished connection
pub(crate) fn connection_closed_event(
    id: ConnectionId,
    reason: &CloseReason,
    stats: &ConnectionStats,
) -> Value {
    json!({
        "event": "websocket_closed",
        "connection_id": id.to_string(),
        "reason": reason.to_string(),
        "close_code": reason.close_frame().code,
        "duration_ms": stats.last_activity.duration_since(stats.connected_at).as_millis() as u64,
        "messages_received": stats.messages_received,
        "messages_sent": stats.messages_sent,
        "bytes_received": stats.bytes_received,
        "bytes_sent": stats.bytes_sent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_presets() {
        let prod = LoggingConfig::production();
        assert!(prod.json_format);
        assert!(!prod.pretty_print);
        assert!(prod.env_filter.unwrap().contains("tokio_tungstenite=warn"));

        let dev = LoggingConfig::development();
        assert!(dev.pretty_print);
        assert_eq!(dev.level, "debug");
        assert!(dev.include_location);

        let test = LoggingConfig::test();
        assert_eq!(test.level, "error");
    }

    #[test]
    fn test_logging_config_builder() {
        let config = LoggingConfig::default().with_env_filter("elif_websocket=trace");

        assert_eq!(config.level, "info");
        assert_eq!(config.env_filter.unwrap(), "elif_websocket=trace");
    }

    #[tokio::test]
    async fn test_connection_closed_event_fields() {
        let stats = crate::connection::stats::Activity::new().snapshot();
        let event = connection_closed_event(ConnectionId::new(), &CloseReason::IdleTimeout, &stats);

        assert_eq!(event["event"], "websocket_closed");
        assert_eq!(event["reason"], "idle timeout");
        assert_eq!(event["close_code"], 1001);
        assert_eq!(event["messages_sent"], 0);
    }
}
