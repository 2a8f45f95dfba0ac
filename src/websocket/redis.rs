use super::fanout::{WebSocketConnector, WebSocketResponder};
use super::{WebSocketReply, WebSocketRequest, WebSocketRequestKind};
use crate::config::gateway::{WebSocketRouteConfig, WebSocketServiceConfig};
use crate::correlation::{request_channel, Publisher};
use crate::error::Result;
use crate::integration::ConnectorKind;
use crate::metrics::metrics;
use crate::transport::redis::ReplySink;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelRequest<'a> {
    #[serde(flatten)]
    request: &'a WebSocketRequest,
    response_channel: &'a str,
}

/// Publishes connection events to pub/sub services.
#[derive(Clone)]
pub struct RedisWebSocketConnector {
    publisher: Arc<dyn Publisher>,
    response_channel: String,
}

impl RedisWebSocketConnector {
    pub fn new(publisher: Arc<dyn Publisher>, response_channel: impl Into<String>) -> Self {
        Self {
            publisher,
            response_channel: response_channel.into(),
        }
    }

    pub fn response_channel(&self) -> &str {
        &self.response_channel
    }

    /// Disconnect events carry no reply channel: nothing can be sent back to a closed socket.
    fn encode(&self, request: &WebSocketRequest) -> serde_json::Result<String> {
        match request.kind {
            WebSocketRequestKind::Disconnect => serde_json::to_string(request),
            WebSocketRequestKind::Connect | WebSocketRequestKind::Message => {
                serde_json::to_string(&ChannelRequest {
                    request,
                    response_channel: &self.response_channel,
                })
            }
        }
    }
}

#[async_trait]
impl WebSocketConnector for RedisWebSocketConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Redis
    }

    async fn handle(&self, request: &WebSocketRequest, route: &WebSocketRouteConfig) -> Result<()> {
        let channels: BTreeSet<String> = route
            .services
            .values()
            .filter_map(|service| match service {
                WebSocketServiceConfig::Redis(service) => Some(request_channel(
                    &service.request_channel,
                    service.num_request_channels,
                    request.id(),
                )),
                WebSocketServiceConfig::Http(_) => None,
            })
            .collect();

        if channels.is_empty() {
            return Ok(());
        }

        let payload = self.encode(request)?;
        let failures: Vec<String> = join_all(
            channels
                .iter()
                .map(|channel| self.publisher.publish(channel, payload.clone())),
        )
        .await
        .into_iter()
        .filter_map(|result| result.err().map(|err| err.to_string()))
        .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(crate::err!("{}", failures.join("; ")))
        }
    }
}

/// Routes replies arriving on the WebSocket response channel to their connections.
#[derive(Clone)]
pub struct WebSocketReplyRouter {
    responder: WebSocketResponder,
}

impl WebSocketReplyRouter {
    pub fn new(responder: WebSocketResponder) -> Self {
        Self { responder }
    }

    pub async fn route(&self, payload: &str) -> bool {
        let reply: WebSocketReply = match serde_json::from_str(payload) {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(
                    target: "retransmit::websocket",
                    event = "reply_malformed",
                    error = %err
                );
                return false;
            }
        };

        let id = reply.id.clone();
        let delivered = self.responder.deliver(reply).await;
        if !delivered {
            metrics().reply_discarded();
            tracing::debug!(
                target: "retransmit::websocket",
                event = "reply_discarded",
                connection = %id
            );
        }
        delivered
    }
}

#[async_trait]
impl ReplySink for WebSocketReplyRouter {
    async fn deliver(&self, _channel: &str, payload: &str) {
        self.route(payload).await;
    }
}
