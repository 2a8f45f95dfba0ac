use super::fanout::{WebSocketConnector, WebSocketResponder};
use super::{WebSocketReply, WebSocketReplyKind, WebSocketRequest, WebSocketRequestKind};
use crate::codec::http::{build_request, HttpBody};
use crate::config::gateway::{WebSocketHttpServiceConfig, WebSocketRouteConfig, WebSocketServiceConfig};
use crate::error::{Context as _, Result};
use crate::integration::ConnectorKind;
use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::redirect::Policy;
use reqwest::Method;
use url::Url;

/// Posts connection events to HTTP services and relays their non-empty answers.
#[derive(Clone)]
pub struct HttpWebSocketConnector {
    client: reqwest::Client,
    responder: WebSocketResponder,
}

impl HttpWebSocketConnector {
    pub fn new(responder: WebSocketResponder) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .context("failed to build websocket http client")?;
        Ok(Self { client, responder })
    }

    fn target<'a>(
        service: &'a WebSocketHttpServiceConfig,
        kind: WebSocketRequestKind,
    ) -> Option<&'a str> {
        match kind {
            WebSocketRequestKind::Message => Some(service.url.as_str()),
            WebSocketRequestKind::Connect => service.on_connect_url.as_deref(),
            WebSocketRequestKind::Disconnect => service.on_disconnect_url.as_deref(),
        }
    }

    async fn post(
        &self,
        name: &str,
        url: &str,
        service: &WebSocketHttpServiceConfig,
        request: &WebSocketRequest,
    ) -> Result<()> {
        let payload = serde_json::to_value(request)?;
        let url = Url::parse(url).with_context(|| format!("invalid url for service `{name}`"))?;
        let response = build_request(
            &self.client,
            Method::POST,
            url,
            &[],
            HttpBody::from_json(Some(&payload), service.encoding),
            service.timeout,
        )?
        .send()
        .await
        .with_context(|| format!("service `{name}` is unreachable"))?;

        let text = response.text().await?;
        if !text.is_empty() && request.kind != WebSocketRequestKind::Disconnect {
            self.responder
                .deliver(WebSocketReply {
                    id: request.id().to_string(),
                    service: name.to_string(),
                    kind: WebSocketReplyKind::Message,
                    response: text,
                })
                .await;
        }
        Ok(())
    }
}

#[async_trait]
impl WebSocketConnector for HttpWebSocketConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Http
    }

    async fn handle(&self, request: &WebSocketRequest, route: &WebSocketRouteConfig) -> Result<()> {
        let calls = route
            .services
            .iter()
            .filter_map(|(name, service)| match service {
                WebSocketServiceConfig::Http(service) => Self::target(service, request.kind)
                    .map(|url| self.post(name, url, service, request)),
                WebSocketServiceConfig::Redis(_) => None,
            });

        let failures: Vec<String> = join_all(calls)
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
