use super::elapsed_ms;
use crate::config::gateway::ServiceConfig;
use crate::correlation::{request_channel, CorrelationService, PendingOutcome};
use crate::domain::{HttpRequest, HttpResponse};
use crate::error::Result;
use crate::gateway_event;
use crate::integration::{
    Connector, ConnectorKind, FetchedResponse, Invocation, InvokeOutcome, RollbackRequest,
};
use crate::metrics::metrics;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

/// `{id, type: "request", request, responseChannel}`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope<'a> {
    pub id: &'a str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub request: &'a HttpRequest,
    pub response_channel: &'a str,
}

/// `{id, type: "rollback", request}`, published without awaiting a reply.
#[derive(Debug, Serialize)]
pub struct RollbackEnvelope<'a> {
    pub id: &'a str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub request: &'a HttpRequest,
}

/// Bridges request/response semantics onto pub/sub through the shared [`CorrelationService`].
#[derive(Clone)]
pub struct RedisConnector {
    correlation: Arc<CorrelationService>,
}

impl RedisConnector {
    pub fn new(correlation: Arc<CorrelationService>) -> Self {
        Self { correlation }
    }

    pub fn correlation(&self) -> &Arc<CorrelationService> {
        &self.correlation
    }
}

struct Waiter {
    service: String,
    receiver: tokio::sync::oneshot::Receiver<PendingOutcome>,
}

#[async_trait]
impl Connector for RedisConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Redis
    }

    async fn invoke(&self, invocation: &Invocation<'_>) -> Vec<InvokeOutcome> {
        let request_id = invocation.request_id;
        let mut channels = BTreeSet::new();
        let mut waiters = Vec::new();

        for (name, service) in invocation.owned_services(ConnectorKind::Redis) {
            let ServiceConfig::Redis(service) = service else {
                continue;
            };
            let channel = request_channel(
                &service.request_channel,
                service.num_request_channels,
                request_id,
            );
            let receiver = self
                .correlation
                .register(request_id, name, &channel, service.timeout);
            waiters.push(Waiter {
                service: name.clone(),
                receiver,
            });
            channels.insert(channel);
        }

        if waiters.is_empty() {
            return Vec::new();
        }

        let started = Instant::now();
        let envelope = RequestEnvelope {
            id: request_id,
            kind: "request",
            request: invocation.request,
            response_channel: self.correlation.response_channel(),
        };
        match serde_json::to_string(&envelope) {
            Ok(payload) => {
                join_all(channels.iter().map(|channel| {
                    self.correlation
                        .publish_registered(request_id, channel, payload.clone())
                }))
                .await;
            }
            Err(err) => {
                let reason = format!("failed to encode request envelope: {err}");
                for channel in &channels {
                    self.correlation
                        .pending()
                        .fail_channel(request_id, channel, &reason);
                }
            }
        }

        let settled = join_all(waiters.into_iter().map(|waiter| async move {
            let outcome = waiter.receiver.await.unwrap_or(PendingOutcome::Expired);
            (waiter.service, outcome)
        }))
        .await;

        settled
            .into_iter()
            .map(|(service, outcome)| {
                let response = match outcome {
                    PendingOutcome::Reply(response) => response,
                    PendingOutcome::Expired => {
                        gateway_event!(
                            warn,
                            "retransmit::redis",
                            "service_timed_out",
                            route = invocation.route,
                            service = service,
                            request_id = request_id
                        );
                        HttpResponse::with_status(
                            504,
                            format!("Service {service} did not respond in time."),
                        )
                    }
                    PendingOutcome::PublishFailed(reason) => {
                        gateway_event!(
                            warn,
                            "retransmit::redis",
                            "service_unreachable",
                            route = invocation.route,
                            service = service,
                            error = reason
                        );
                        HttpResponse::with_status(502, format!("Service {service} is unreachable."))
                    }
                };
                metrics().record_service_outcome(
                    ConnectorKind::Redis.as_str(),
                    &service,
                    response.status.unwrap_or(200),
                );
                InvokeOutcome::Response(FetchedResponse {
                    connector: ConnectorKind::Redis,
                    service,
                    elapsed_ms: elapsed_ms(started),
                    response,
                })
            })
            .collect()
    }

    async fn rollback(&self, rollback: &RollbackRequest<'_>) -> Result<()> {
        let channels: BTreeSet<String> = rollback
            .owned_services(ConnectorKind::Redis)
            .filter_map(|(_, service)| match service {
                ServiceConfig::Redis(service) => Some(request_channel(
                    &service.request_channel,
                    service.num_request_channels,
                    rollback.request_id,
                )),
                ServiceConfig::Http(_) => None,
            })
            .collect();

        if channels.is_empty() {
            return Ok(());
        }

        let payload = serde_json::to_string(&RollbackEnvelope {
            id: rollback.request_id,
            kind: "rollback",
            request: rollback.request,
        })?;

        let failures: Vec<String> = join_all(
            channels
                .iter()
                .map(|channel| self.correlation.publish(channel, payload.clone())),
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
