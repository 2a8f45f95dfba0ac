//! WebSocket fan-out: every client message is forwarded to all services of its route, and
//! service replies are routed back to the originating connection.

pub mod fanout;
pub mod hooks;
pub mod http;
pub mod polling;
pub mod redis;
pub mod registry;

pub use fanout::{WebSocketConnector, WebSocketFanout, WebSocketResponder};
pub use hooks::{ConnectDecision, MessageDecision, NoopWebSocketHooks, WebSocketHookSet, WebSocketHooks};
pub use http::HttpWebSocketConnector;
pub use polling::{poll_last_request, spawn_poller};
pub use redis::{RedisWebSocketConnector, WebSocketReplyRouter};
pub use registry::{ActiveWebSocketConnection, ConnectionRegistry, OutboundFrame};

use serde::{Deserialize, Serialize};

/// Identity of a client connection as seen by services.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: String,
    pub route: String,
    pub path: String,
    pub remote_address: Option<String>,
    pub remote_port: Option<u16>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebSocketRequestKind {
    Connect,
    Message,
    Disconnect,
}

/// Event forwarded to services: `{type, id, route, path, remoteAddress, remotePort, message?}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketRequest {
    #[serde(rename = "type")]
    pub kind: WebSocketRequestKind,
    #[serde(flatten)]
    pub connection: ConnectionInfo,
    /// Client message text; only present on `message` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WebSocketRequest {
    pub fn connect(connection: ConnectionInfo) -> Self {
        Self {
            kind: WebSocketRequestKind::Connect,
            connection,
            message: None,
        }
    }

    pub fn message(connection: ConnectionInfo, message: impl Into<String>) -> Self {
        Self {
            kind: WebSocketRequestKind::Message,
            connection,
            message: Some(message.into()),
        }
    }

    pub fn disconnect(connection: ConnectionInfo) -> Self {
        Self {
            kind: WebSocketRequestKind::Disconnect,
            connection,
            message: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.connection.id
    }

    pub fn route(&self) -> &str {
        &self.connection.route
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebSocketReplyKind {
    #[default]
    Message,
    /// Deliver the response, then close the connection.
    Disconnect,
    /// Acknowledgement only; nothing is sent to the client.
    Null,
}

/// Service reply addressed to a connection: `{id, service, type?, response}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketReply {
    pub id: String,
    #[serde(default)]
    pub service: String,
    #[serde(rename = "type", default)]
    pub kind: WebSocketReplyKind,
    #[serde(default)]
    pub response: String,
}
