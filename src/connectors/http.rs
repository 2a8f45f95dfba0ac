use super::elapsed_ms;
use crate::codec::http::{
    apply_field_mapping, build_request, decode_body, flatten_response_headers, reqwest_method,
    resolve_url, response_cookies, HttpBody,
};
use crate::config::gateway::{HttpServiceConfig, ServiceConfig};
use crate::domain::{HttpRequest, HttpResponse};
use crate::error::{Context as _, Result};
use crate::gateway_event;
use crate::integration::{
    Connector, ConnectorKind, FetchedResponse, Invocation, InvokeOutcome, RollbackRequest,
};
use crate::metrics::metrics;
use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use serde_json::Value as JsonValue;
use std::time::Instant;

/// Calls services directly over HTTP.
#[derive(Clone, Debug)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .context("failed to build http connector client")?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(
        &self,
        url: &str,
        service: &HttpServiceConfig,
        request: &HttpRequest,
    ) -> Result<HttpResponse> {
        let url = resolve_url(url, &request.query)?;
        let body = if request.method.is_bodyless() {
            None
        } else {
            request.body.as_ref().map(|body| match &service.mapping {
                Some(mapping) => apply_field_mapping(body, mapping),
                None => body.clone(),
            })
        };
        let headers: Vec<(String, String)> = request
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let builder = build_request(
            &self.client,
            reqwest_method(request.method),
            url,
            &headers,
            HttpBody::from_json(body.as_ref(), service.encoding),
            service.timeout,
        )?;

        let response = builder.send().await?;
        let status = response.status();
        let response_headers = response.headers().clone();
        let bytes = response.bytes().await?;

        let content_type = response_headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let redirect = if status.is_redirection() {
            response_headers
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        } else {
            None
        };

        Ok(HttpResponse {
            status: Some(status.as_u16()),
            redirect,
            body: decode_body(&bytes, content_type.as_deref()),
            content_type,
            headers: flatten_response_headers(&response_headers),
            cookies: response_cookies(&response_headers),
        })
    }

    async fn invoke_service(
        &self,
        name: &str,
        service: &HttpServiceConfig,
        invocation: &Invocation<'_>,
    ) -> InvokeOutcome {
        if !service.await_response {
            let connector = self.clone();
            let service = service.clone();
            let request = invocation.request.clone();
            let name = name.to_string();
            let route = invocation.route.to_string();
            tokio::spawn(async move {
                if let Err(err) = connector.send(&service.url, &service, &request).await {
                    gateway_event!(
                        warn,
                        "retransmit::http",
                        "fire_and_forget_failed",
                        route = route,
                        service = name,
                        error = err
                    );
                }
            });
            return InvokeOutcome::Skip;
        }

        let started = Instant::now();
        let response = match self.send(&service.url, service, invocation.request).await {
            Ok(response) => response,
            Err(err) => {
                let (status, message) = if err.is_timeout() {
                    (504, format!("Service {name} timed out."))
                } else {
                    (502, format!("Service {name} is unreachable."))
                };
                gateway_event!(
                    warn,
                    "retransmit::http",
                    "service_failed",
                    route = invocation.route,
                    service = name,
                    status = status,
                    error = err
                );
                HttpResponse::with_status(status, JsonValue::String(message))
            }
        };

        let status = response.status.unwrap_or(200);
        metrics().record_service_outcome(ConnectorKind::Http.as_str(), name, status);

        InvokeOutcome::Response(FetchedResponse {
            connector: ConnectorKind::Http,
            service: name.to_string(),
            elapsed_ms: elapsed_ms(started),
            response,
        })
    }
}

#[async_trait]
impl Connector for HttpConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Http
    }

    async fn invoke(&self, invocation: &Invocation<'_>) -> Vec<InvokeOutcome> {
        let calls = invocation
            .owned_services(ConnectorKind::Http)
            .filter_map(|(name, service)| match service {
                ServiceConfig::Http(service) => Some((name, service)),
                ServiceConfig::Redis(_) => None,
            })
            .map(|(name, service)| self.invoke_service(name, service, invocation));

        join_all(calls).await
    }

    async fn rollback(&self, rollback: &RollbackRequest<'_>) -> Result<()> {
        let calls = rollback
            .owned_services(ConnectorKind::Http)
            .filter_map(|(name, service)| match service {
                ServiceConfig::Http(service) => service
                    .rollback_url
                    .as_deref()
                    .map(|url| (name, url, service)),
                ServiceConfig::Redis(_) => None,
            })
            .map(|(name, url, service)| async move {
                self.send(url, service, rollback.request)
                    .await
                    .with_context(|| format!("rollback of service `{name}` failed"))
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
