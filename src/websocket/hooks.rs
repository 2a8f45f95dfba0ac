use super::{ConnectionInfo, WebSocketReply};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectDecision {
    Accept,
    /// Close the connection, optionally sending `message` first.
    Drop { message: Option<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageDecision {
    /// Forward this (possibly rewritten) message to the services.
    Forward(String),
    /// Do not forward; optionally answer the client directly.
    Handled(Option<WebSocketReply>),
}

#[async_trait]
pub trait WebSocketHooks: Send + Sync {
    /// When true, connections stay uninitialized until the first client message has been
    /// passed to `on_connect`.
    fn intercepts_connect(&self) -> bool {
        false
    }

    async fn on_connect(&self, _connection: &ConnectionInfo, _message: &str) -> ConnectDecision {
        ConnectDecision::Accept
    }

    async fn on_request(&self, _connection: &ConnectionInfo, message: String) -> MessageDecision {
        MessageDecision::Forward(message)
    }

    /// `None` suppresses the reply.
    async fn on_response(&self, reply: WebSocketReply) -> Option<WebSocketReply> {
        Some(reply)
    }

    /// Returns whether services should be told about the disconnect.
    async fn on_disconnect(&self, _connection: &ConnectionInfo) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopWebSocketHooks;

impl WebSocketHooks for NoopWebSocketHooks {}

/// Gateway-level hooks plus per-route replacements.
#[derive(Clone)]
pub struct WebSocketHookSet {
    global: Arc<dyn WebSocketHooks>,
    routes: HashMap<String, Arc<dyn WebSocketHooks>>,
}

impl Default for WebSocketHookSet {
    fn default() -> Self {
        Self::new(Arc::new(NoopWebSocketHooks))
    }
}

impl WebSocketHookSet {
    pub fn new(global: Arc<dyn WebSocketHooks>) -> Self {
        Self {
            global,
            routes: HashMap::new(),
        }
    }

    pub fn set_global(&mut self, hooks: Arc<dyn WebSocketHooks>) {
        self.global = hooks;
    }

    pub fn set_route(&mut self, route: impl Into<String>, hooks: Arc<dyn WebSocketHooks>) {
        self.routes.insert(route.into(), hooks);
    }

    pub fn for_route(&self, route: &str) -> &Arc<dyn WebSocketHooks> {
        self.routes.get(route).unwrap_or(&self.global)
    }
}
