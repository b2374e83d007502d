//! Handshake boundary: turning an upgrade signal into a connection
//!
//! The HTTP layer (axum or the tungstenite handshake) validates the request and
//! reports whether it is an upgrade plus the sub-protocols the client asked for.
//! Accepting attaches a handler and yields a connection in `Negotiating`.

use crate::codec::AxumCodec;
use crate::config::WebSocketConfig;
use crate::connection::{ConnectionHandle, WebSocketConnection};
use crate::error::WebSocketError;
use crate::handler::Handler;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::header::{CONNECTION, SEC_WEBSOCKET_PROTOCOL, UPGRADE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info};

/// What the handshake collaborator knows about an incoming request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub is_upgrade: bool,
    /// Sub-protocols in client preference order
    pub requested_protocols: Vec<String>,
}

impl UpgradeRequest {
    pub fn new(is_upgrade: bool, requested_protocols: Vec<String>) -> Self {
        Self {
            is_upgrade,
            requested_protocols,
        }
    }

    /// Read the upgrade signal and requested sub-protocols from request headers
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let is_upgrade = header_has_token(headers, CONNECTION.as_str(), "upgrade")
            && header_has_token(headers, UPGRADE.as_str(), "websocket");

        let requested_protocols = headers
            .get_all(SEC_WEBSOCKET_PROTOCOL)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|protocol| !protocol.is_empty())
            .map(String::from)
            .collect();

        Self {
            is_upgrade,
            requested_protocols,
        }
    }

    /// First requested sub-protocol that `supported` contains
    pub fn negotiate(&self, supported: &[String]) -> Option<String> {
        self.requested_protocols
            .iter()
            .find(|requested| supported.contains(requested))
            .cloned()
    }

    /// Attach `handler` and accept the upgrade with the chosen sub-protocol
    pub fn accept(
        self,
        handler: Handler,
        protocol: Option<&str>,
        config: WebSocketConfig,
    ) -> UpgradeResponse {
        if !self.is_upgrade {
            return UpgradeResponse::Rejected(UpgradeRejection::NotUpgradeRequest);
        }

        if let Some(protocol) = protocol {
            if !self.requested_protocols.iter().any(|p| p == protocol) {
                return UpgradeResponse::Rejected(UpgradeRejection::UnsupportedProtocol(
                    protocol.to_string(),
                ));
            }
        }

        let connection =
            WebSocketConnection::new(handler, config).with_protocol(protocol.map(String::from));
        debug!(
            "Upgrade accepted for connection {} (protocol: {:?})",
            connection.id(),
            protocol
        );
        UpgradeResponse::Accepted(AcceptedUpgrade { connection })
    }
}

fn header_has_token(headers: &HeaderMap, name: &str, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

/// Outcome of an upgrade attempt
#[derive(Debug)]
pub enum UpgradeResponse {
    Accepted(AcceptedUpgrade),
    Rejected(UpgradeRejection),
}

impl UpgradeResponse {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Why an upgrade was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpgradeRejection {
    #[error("Request is not a WebSocket upgrade")]
    NotUpgradeRequest,

    #[error("Sub-protocol '{0}' was not requested by the client")]
    UnsupportedProtocol(String),
}

impl UpgradeRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotUpgradeRequest => StatusCode::UPGRADE_REQUIRED,
            Self::UnsupportedProtocol(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<UpgradeRejection> for WebSocketError {
    fn from(rejection: UpgradeRejection) -> Self {
        Self::Upgrade(rejection.to_string())
    }
}

impl IntoResponse for UpgradeRejection {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// An accepted upgrade holding its connection, ready to run
#[derive(Debug)]
pub struct AcceptedUpgrade {
    connection: WebSocketConnection,
}

impl AcceptedUpgrade {
    pub fn protocol(&self) -> Option<&str> {
        self.connection.protocol()
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.connection.handle()
    }

    pub fn into_connection(self) -> WebSocketConnection {
        self.connection
    }

    /// Complete the upgrade through axum and run the connection on the socket
    pub fn into_axum_response(self, ws: WebSocketUpgrade) -> Response {
        let connection = self.connection;
        let mut ws = ws;

        if let Some(limit) = connection.config().max_message_size {
            ws = ws.max_message_size(limit);
        }
        if let Some(protocol) = connection.protocol() {
            ws = ws.protocols([protocol.to_string()]);
        }

        ws.on_upgrade(move |socket| async move {
            let id = connection.id();
            let reason = connection.run_codec(AxumCodec::new(socket)).await;
            info!("WebSocket connection {} finished: {}", id, reason);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn upgrade_headers(protocols: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        if let Some(protocols) = protocols {
            headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(protocols));
        }
        headers
    }

    #[test]
    fn test_from_headers_reads_upgrade_and_protocols() {
        let request = UpgradeRequest::from_headers(&upgrade_headers(Some("chat.v2, chat")));

        assert!(request.is_upgrade);
        assert_eq!(request.requested_protocols, vec!["chat.v2", "chat"]);
    }

    #[test]
    fn test_plain_request_is_not_upgrade() {
        let request = UpgradeRequest::from_headers(&HeaderMap::new());
        assert!(!request.is_upgrade);
        assert!(request.requested_protocols.is_empty());
    }

    #[test]
    fn test_negotiate_follows_client_preference() {
        let request = UpgradeRequest::new(true, vec!["chat.v2".into(), "chat".into()]);
        let supported = vec!["chat".to_string(), "chat.v2".to_string()];

        assert_eq!(request.negotiate(&supported), Some("chat.v2".to_string()));
        assert_eq!(request.negotiate(&["mqtt".to_string()]), None);
    }

    #[tokio::test]
    async fn test_accept_yields_negotiating_connection() {
        let request = UpgradeRequest::new(true, vec!["chat".into()]);
        let response = request.accept(
            Handler::uppercase_echo(),
            Some("chat"),
            WebSocketConfig::default(),
        );

        let UpgradeResponse::Accepted(accepted) = response else {
            panic!("expected accepted upgrade");
        };
        assert_eq!(accepted.protocol(), Some("chat"));
        assert_eq!(
            accepted.handle().state(),
            crate::types::ConnectionState::Negotiating
        );
    }

    #[test]
    fn test_accept_rejects_non_upgrade() {
        let response = UpgradeRequest::new(false, vec![]).accept(
            Handler::uppercase_echo(),
            None,
            WebSocketConfig::default(),
        );

        let UpgradeResponse::Rejected(rejection) = response else {
            panic!("expected rejection");
        };
        assert_eq!(rejection, UpgradeRejection::NotUpgradeRequest);
        assert_eq!(rejection.status(), StatusCode::UPGRADE_REQUIRED);
    }

    #[test]
    fn test_accept_rejects_unrequested_protocol() {
        let response = UpgradeRequest::new(true, vec!["chat".into()]).accept(
            Handler::uppercase_echo(),
            Some("mqtt"),
            WebSocketConfig::default(),
        );

        assert!(!response.is_accepted());
        let UpgradeResponse::Rejected(rejection) = response else {
            panic!("expected rejection");
        };
        assert_eq!(rejection.status(), StatusCode::BAD_REQUEST);
        assert!(matches!(
            WebSocketError::from(rejection),
            WebSocketError::Upgrade(_)
        ));
    }
}
