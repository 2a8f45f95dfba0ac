#![allow(dead_code)]

use async_trait::async_trait;
use retransmit::correlation::{CorrelationService, Publisher};
use retransmit::domain::HttpResponse;
use retransmit::error::Result;
use retransmit::integration::{
    Connector, ConnectorKind, FetchedResponse, Invocation, InvokeOutcome, RollbackRequest,
};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Published {
    pub channel: String,
    pub payload: JsonValue,
}

type Responder = Arc<dyn Fn(&Published) -> Vec<JsonValue> + Send + Sync>;

/// In-memory pub/sub broker. Records every publish and can answer through an attached
/// correlation service the way a backend would.
#[derive(Clone, Default)]
pub struct MockBroker {
    inner: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    published: Vec<Published>,
    failing: HashSet<String>,
    responder: Option<Responder>,
    correlation: Option<Weak<CorrelationService>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies produced by `responder` are delivered to `correlation` from inside `publish`.
    pub fn attach(&self, correlation: &Arc<CorrelationService>) {
        self.inner.lock().expect("broker state").correlation = Some(Arc::downgrade(correlation));
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&Published) -> Vec<JsonValue> + Send + Sync + 'static,
    {
        self.inner.lock().expect("broker state").responder = Some(Arc::new(responder));
    }

    pub fn fail_channel(&self, channel: impl Into<String>) {
        self.inner
            .lock()
            .expect("broker state")
            .failing
            .insert(channel.into());
    }

    pub fn published(&self) -> Vec<Published> {
        self.inner.lock().expect("broker state").published.clone()
    }

    pub fn publishes_to(&self, channel: &str) -> usize {
        self.published()
            .iter()
            .filter(|published| published.channel == channel)
            .count()
    }
}

#[async_trait]
impl Publisher for MockBroker {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let published = Published {
            channel: channel.to_string(),
            payload: serde_json::from_str(&payload)?,
        };

        let (responder, correlation) = {
            let mut state = self.inner.lock().expect("broker state");
            if state.failing.contains(channel) {
                return Err(retransmit::err!("broker refused publish to `{channel}`"));
            }
            state.published.push(published.clone());
            (
                state.responder.clone(),
                state.correlation.as_ref().and_then(Weak::upgrade),
            )
        };

        if let (Some(responder), Some(correlation)) = (responder, correlation) {
            for reply in responder(&published) {
                correlation.handle_reply(&reply.to_string());
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InvocationRecord {
    pub stage: Option<u32>,
    pub services: Vec<String>,
    /// Services whose responses were visible to this invocation.
    pub prior: Vec<String>,
}

/// Connector answering from a fixed table and recording what it was asked to do.
pub struct RecordingConnector {
    kind: ConnectorKind,
    responses: HashMap<String, HttpResponse>,
    delay: Duration,
    invocations: Mutex<Vec<InvocationRecord>>,
    rollbacks: AtomicUsize,
    fail_rollback: bool,
}

impl RecordingConnector {
    pub fn new(kind: ConnectorKind) -> Self {
        Self {
            kind,
            responses: HashMap::new(),
            delay: Duration::ZERO,
            invocations: Mutex::new(Vec::new()),
            rollbacks: AtomicUsize::new(0),
            fail_rollback: false,
        }
    }

    pub fn respond(mut self, service: &str, response: HttpResponse) -> Self {
        self.responses.insert(service.to_string(), response);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }

    pub fn invocations(&self) -> Vec<InvocationRecord> {
        self.invocations.lock().expect("invocations").clone()
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    fn kind(&self) -> ConnectorKind {
        self.kind
    }

    async fn invoke(&self, invocation: &Invocation<'_>) -> Vec<InvokeOutcome> {
        let services: Vec<String> = invocation
            .owned_services(self.kind)
            .map(|(name, _)| name.clone())
            .collect();
        if services.is_empty() {
            return Vec::new();
        }

        self.invocations
            .lock()
            .expect("invocations")
            .push(InvocationRecord {
                stage: invocation.stage,
                services: services.clone(),
                prior: invocation
                    .prior
                    .iter()
                    .map(|fetched| fetched.service.clone())
                    .collect(),
            });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        services
            .into_iter()
            .map(|service| {
                let response = self
                    .responses
                    .get(&service)
                    .cloned()
                    .unwrap_or_else(|| HttpResponse::with_status(200, service.clone()));
                InvokeOutcome::Response(FetchedResponse {
                    connector: self.kind,
                    service,
                    elapsed_ms: 0,
                    response,
                })
            })
            .collect()
    }

    async fn rollback(&self, _rollback: &RollbackRequest<'_>) -> Result<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.fail_rollback {
            Err(retransmit::err!("rollback refused"))
        } else {
            Ok(())
        }
    }
}
