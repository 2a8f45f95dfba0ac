use super::pending::{PendingOutcome, PendingRequestTable};
use crate::domain::HttpResponse;
use crate::error::Result;
use crate::metrics::metrics;
use crate::transport::redis::ReplySink;
use crate::transport::runtime::run_every;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outbound half of the pub/sub transport.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> Result<()>;
}

/// Reply published by a service on this instance's response channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub id: String,
    pub service: String,
    #[serde(default)]
    pub response: HttpResponse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyDisposition {
    Resolved,
    /// Already settled, expired or addressed to another request.
    Discarded,
    Malformed,
}

/// Process-wide correlation state for the pub/sub connector.
///
/// Constructed once at start-up and shared through `Arc` with the connector, the
/// subscription runtime and the sweeper.
pub struct CorrelationService {
    pending: PendingRequestTable,
    publisher: Arc<dyn Publisher>,
    response_channel: String,
    default_timeout: Duration,
    sweep_interval: Duration,
}

impl CorrelationService {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        response_channel: impl Into<String>,
        default_timeout: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            pending: PendingRequestTable::new(),
            publisher,
            response_channel: response_channel.into(),
            default_timeout,
            sweep_interval,
        }
    }

    pub fn response_channel(&self) -> &str {
        &self.response_channel
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    pub fn pending(&self) -> &PendingRequestTable {
        &self.pending
    }

    /// Must be called before the matching publish so an early reply finds its entry.
    pub fn register(
        &self,
        request_id: &str,
        service: &str,
        channel: &str,
        timeout: Option<Duration>,
    ) -> oneshot::Receiver<PendingOutcome> {
        self.pending.register(
            request_id,
            service,
            channel,
            timeout.unwrap_or(self.default_timeout),
        )
    }

    pub async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        self.publisher.publish(channel, payload).await
    }

    /// Publishes and, on failure, settles every entry of the request waiting on that channel.
    pub async fn publish_registered(&self, request_id: &str, channel: &str, payload: String) {
        if let Err(err) = self.publish(channel, payload).await {
            let reason = err.to_string();
            let failed = self.pending.fail_channel(request_id, channel, &reason);
            warn!(
                target: "retransmit::redis",
                event = "publish_failed",
                request_id = %request_id,
                channel = %channel,
                settled = failed,
                error = %reason
            );
        }
    }

    pub fn handle_reply(&self, payload: &str) -> ReplyDisposition {
        let reply = match serde_json::from_str::<ReplyEnvelope>(payload) {
            Ok(reply) => reply,
            Err(err) => {
                metrics().reply_discarded();
                warn!(
                    target: "retransmit::redis",
                    event = "reply_malformed",
                    channel = %self.response_channel,
                    error = %err
                );
                return ReplyDisposition::Malformed;
            }
        };

        if self.pending.resolve(&reply.id, &reply.service, reply.response) {
            ReplyDisposition::Resolved
        } else {
            metrics().reply_discarded();
            debug!(
                target: "retransmit::redis",
                event = "reply_discarded",
                request_id = %reply.id,
                service = %reply.service
            );
            ReplyDisposition::Discarded
        }
    }

    pub fn sweep(&self, now: Instant) -> usize {
        let expired = self.pending.sweep(now);
        for (request_id, service) in &expired {
            warn!(
                target: "retransmit::redis",
                event = "pending_expired",
                request_id = %request_id,
                service = %service
            );
        }
        expired.len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let period = service.sweep_interval;
            run_every(period, shutdown, || {
                let service = Arc::clone(&service);
                async move {
                    service.sweep(Instant::now());
                }
            })
            .await;
        })
    }
}

#[async_trait]
impl ReplySink for CorrelationService {
    async fn deliver(&self, _channel: &str, payload: &str) {
        self.handle_reply(payload);
    }
}
