//! WebSocket endpoint - one handler, its sub-protocols and configuration

use crate::config::WebSocketConfig;
use crate::handler::Handler;
use crate::upgrade::{UpgradeRejection, UpgradeRequest, UpgradeResponse};
use axum::extract::ws::WebSocketUpgrade;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::debug;

/// A WebSocket endpoint serving one handler
#[derive(Debug, Clone)]
pub struct WebSocketEndpoint {
    handler: Handler,
    protocols: Vec<String>,
    config: WebSocketConfig,
}

impl WebSocketEndpoint {
    /// Create an endpoint with default configuration and no sub-protocols
    pub fn new(handler: Handler) -> Self {
        Self {
            handler,
            protocols: Vec::new(),
            config: WebSocketConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.config = config;
        self
    }

    /// Sub-protocols this endpoint speaks
    pub fn protocols<I, P>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    pub fn supported_protocols(&self) -> &[String] {
        &self.protocols
    }

    /// Negotiate a sub-protocol and attach the handler
    pub fn upgrade(&self, request: UpgradeRequest) -> UpgradeResponse {
        let protocol = request.negotiate(&self.protocols);
        request.accept(self.handler.clone(), protocol.as_deref(), self.config.clone())
    }

    /// Answer an HTTP request routed to this endpoint
    pub fn respond(&self, headers: &HeaderMap, ws: Option<WebSocketUpgrade>) -> Response {
        match (self.upgrade(UpgradeRequest::from_headers(headers)), ws) {
            (UpgradeResponse::Accepted(accepted), Some(ws)) => accepted.into_axum_response(ws),
            (UpgradeResponse::Accepted(_), None) => {
                UpgradeRejection::NotUpgradeRequest.into_response()
            }
            (UpgradeResponse::Rejected(rejection), _) => {
                debug!("Rejecting WebSocket upgrade: {}", rejection);
                rejection.into_response()
            }
        }
    }

    /// Router serving this endpoint at `path`
    pub fn into_router<S>(self, path: &str) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        Router::new().route(
            path,
            get(move |headers: HeaderMap, ws: Option<WebSocketUpgrade>| async move {
                self.respond(&headers, ws)
            }),
        )
    }
}
