use crate::config::GatewayConfig;
use crate::gateway::HttpGateway;
use crate::websocket::{ConnectionRegistry, WebSocketFanout, WebSocketHookSet};
use std::sync::Arc;

/// Everything the WebSocket socket loop needs.
#[derive(Clone)]
pub struct WebSocketState {
    pub fanout: WebSocketFanout,
    pub registry: Arc<ConnectionRegistry>,
    pub hooks: WebSocketHookSet,
}

/// Shared state handed to the HTTP listener.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub http: HttpGateway,
    pub websocket: WebSocketState,
}
