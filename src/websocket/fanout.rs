use super::hooks::WebSocketHookSet;
use super::registry::ConnectionRegistry;
use super::{WebSocketReply, WebSocketReplyKind, WebSocketRequest};
use crate::config::gateway::{GatewayConfig, WebSocketRouteConfig};
use crate::error::Result;
use crate::integration::ConnectorKind;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;

/// Backend integration used by the WebSocket path. There is no staging and no merging: every
/// connector sees every event of the routes it owns services in.
#[async_trait]
pub trait WebSocketConnector: Send + Sync {
    fn kind(&self) -> ConnectorKind;

    async fn init(&self, _config: &GatewayConfig) -> Result<()> {
        Ok(())
    }

    async fn handle(&self, request: &WebSocketRequest, route: &WebSocketRouteConfig) -> Result<()>;
}

/// Delivers service replies to client connections after the `on_response` hook.
#[derive(Clone)]
pub struct WebSocketResponder {
    registry: Arc<ConnectionRegistry>,
    hooks: WebSocketHookSet,
}

impl WebSocketResponder {
    pub fn new(registry: Arc<ConnectionRegistry>, hooks: WebSocketHookSet) -> Self {
        Self { registry, hooks }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Returns false when the connection is unknown.
    pub async fn deliver(&self, reply: WebSocketReply) -> bool {
        let Some(connection) = self.registry.get(&reply.id) else {
            return false;
        };
        let hooks = self.hooks.for_route(&connection.info.route);
        let Some(reply) = hooks.on_response(reply).await else {
            return true;
        };

        match reply.kind {
            WebSocketReplyKind::Message => {
                self.registry.send(&reply.id, reply.response);
            }
            WebSocketReplyKind::Disconnect => {
                if !reply.response.is_empty() {
                    self.registry.send(&reply.id, reply.response);
                }
                self.registry.close(&reply.id);
            }
            WebSocketReplyKind::Null => {}
        }
        true
    }
}

#[derive(Clone)]
pub struct WebSocketFanout {
    config: Arc<GatewayConfig>,
    connectors: Vec<Arc<dyn WebSocketConnector>>,
}

impl WebSocketFanout {
    pub fn new(config: Arc<GatewayConfig>, connectors: Vec<Arc<dyn WebSocketConnector>>) -> Self {
        Self { config, connectors }
    }

    pub fn config(&self) -> &Arc<GatewayConfig> {
        &self.config
    }

    pub fn connectors(&self) -> &[Arc<dyn WebSocketConnector>] {
        &self.connectors
    }

    /// Sends the event to every connector concurrently. Failures are logged per connector.
    pub async fn dispatch(&self, request: &WebSocketRequest) {
        let Some(route) = self.config.websocket_route(request.route()) else {
            tracing::debug!(
                target: "retransmit::websocket",
                event = "route_missing",
                route = %request.route(),
                connection = %request.id()
            );
            return;
        };

        let results = join_all(
            self.connectors
                .iter()
                .map(|connector| async move { (connector.kind(), connector.handle(request, route).await) }),
        )
        .await;

        for (kind, result) in results {
            if let Err(err) = result {
                tracing::warn!(
                    target: "retransmit::websocket",
                    event = "dispatch_failed",
                    route = %request.route(),
                    connector = %kind,
                    connection = %request.id(),
                    error = %err
                );
            }
        }
    }
}
