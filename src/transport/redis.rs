#![forbid(unsafe_code)]

use crate::correlation::Publisher;
use crate::error::Result;
use crate::transport::retry::{run_retry_loop, RetryContext, RetrySettings};
use crate::transport::{TaskTransportRuntime, TransportKind, TransportRuntime};
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::{AsyncCommands, Client, RedisError};
use std::collections::HashMap;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Consumer of messages arriving on one subscribed channel. Messages are delivered one at a
/// time, in arrival order.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn deliver(&self, channel: &str, payload: &str);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisDelivery {
    pub channel: String,
    pub payload: String,
}

#[async_trait]
pub trait RedisSubscriberDriver: Send {
    async fn next_delivery(&mut self) -> StdResult<Option<RedisDelivery>, RedisDriverError>;
    async fn reconnect(&mut self) -> StdResult<(), RedisDriverError>;
}

/// Driver holding the single pub/sub connection of this process.
pub struct RedisPubSubDriver {
    client: Client,
    channels: Vec<String>,
    subscription: PubSub,
}

impl RedisPubSubDriver {
    pub async fn connect(
        url: &str,
        channels: Vec<String>,
    ) -> StdResult<Self, RedisDriverError> {
        let client = build_redis_client(url)?;
        let subscription = build_pubsub(&client, &channels).await?;
        Ok(Self {
            client,
            channels,
            subscription,
        })
    }
}

#[async_trait]
impl RedisSubscriberDriver for RedisPubSubDriver {
    async fn next_delivery(&mut self) -> StdResult<Option<RedisDelivery>, RedisDriverError> {
        let mut stream = self.subscription.on_message();
        match stream.next().await {
            Some(message) => {
                let channel = message.get_channel_name().to_string();
                let payload: String = message.get_payload().map_err(RedisDriverError::Read)?;
                Ok(Some(RedisDelivery { channel, payload }))
            }
            None => Err(RedisDriverError::Disconnected),
        }
    }

    async fn reconnect(&mut self) -> StdResult<(), RedisDriverError> {
        self.subscription = build_pubsub(&self.client, &self.channels).await?;
        Ok(())
    }
}

/// Publishes envelopes over a reconnecting multiplexed connection.
#[derive(Clone)]
pub struct RedisPublisher {
    connection: ConnectionManager,
}

impl RedisPublisher {
    pub async fn connect(url: &str) -> StdResult<Self, RedisDriverError> {
        let client = build_redis_client(url)?;
        let connection = ConnectionManager::new(client).await.map_err(|err| {
            RedisDriverError::Connect(Box::new(crate::err!(
                "failed to establish redis connection to `{url}`: {err}"
            )))
        })?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let mut connection = self.connection.clone();
        connection
            .publish::<_, _, i64>(channel, payload)
            .await
            .map_err(|source| RedisDriverError::Publish {
                channel: channel.to_string(),
                source,
            })?;
        Ok(())
    }
}

/// Background subscription routing each response channel to its consumer.
pub struct RedisSubscriptionRuntime {
    inner: TaskTransportRuntime,
    channels: Vec<String>,
}

impl RedisSubscriptionRuntime {
    pub fn new(
        driver: Box<dyn RedisSubscriberDriver + Send>,
        sinks: HashMap<String, Arc<dyn ReplySink>>,
        retry: RetrySettings,
    ) -> Self {
        let mut channels: Vec<String> = sinks.keys().cloned().collect();
        channels.sort();

        let inner = TaskTransportRuntime::new(
            TransportKind::RedisSubscriber,
            "redis-subscriber",
            move |shutdown| {
                let subscription = Subscription {
                    driver,
                    sinks,
                    disconnected: false,
                };
                vec![tokio::spawn(subscription.run(retry, shutdown))]
            },
        );

        Self { inner, channels }
    }

    pub async fn connect(
        url: &str,
        sinks: HashMap<String, Arc<dyn ReplySink>>,
        retry: RetrySettings,
    ) -> StdResult<Self, RedisDriverError> {
        let channels = sinks.keys().cloned().collect();
        let driver = RedisPubSubDriver::connect(url, channels).await?;
        Ok(Self::new(Box::new(driver), sinks, retry))
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }
}

struct Subscription {
    driver: Box<dyn RedisSubscriberDriver + Send>,
    sinks: HashMap<String, Arc<dyn ReplySink>>,
    disconnected: bool,
}

impl Subscription {
    async fn run(mut self, retry: RetrySettings, shutdown: CancellationToken) {
        run_retry_loop(shutdown, retry, Duration::from_millis(50), &mut self).await;
    }

    fn mark_connected(&mut self) {
        if self.disconnected {
            tracing::info!(target: "retransmit::redis", event = "subscription_reconnected");
            self.disconnected = false;
        }
    }

    fn mark_disconnected(&mut self, err: &RedisDriverError) {
        if !self.disconnected {
            tracing::warn!(
                target: "retransmit::redis",
                event = "subscription_disconnected",
                error = %err
            );
            self.disconnected = true;
        }
    }
}

#[async_trait]
impl RetryContext for Subscription {
    type Item = RedisDelivery;
    type Error = RedisDriverError;

    async fn poll(&mut self) -> StdResult<Option<Self::Item>, Self::Error> {
        self.driver.next_delivery().await
    }

    async fn handle_item(&mut self, item: Self::Item) {
        self.mark_connected();
        match self.sinks.get(&item.channel) {
            Some(sink) => sink.deliver(&item.channel, &item.payload).await,
            None => tracing::debug!(
                target: "retransmit::redis",
                event = "message_unrouted",
                channel = %item.channel
            ),
        }
    }

    async fn report_error(&mut self, error: &Self::Error, delay: Duration) {
        self.mark_disconnected(error);
        tracing::error!(
            target: "retransmit::redis",
            event = "subscription_receive_failed",
            retry_in_ms = delay.as_millis() as u64,
            error = %error
        );

        match self.driver.reconnect().await {
            Ok(()) => self.mark_connected(),
            Err(reconnect_err) => tracing::error!(
                target: "retransmit::redis",
                event = "subscription_reconnect_failed",
                error = %reconnect_err
            ),
        }
    }
}

#[async_trait]
impl TransportRuntime for RedisSubscriptionRuntime {
    fn kind(&self) -> TransportKind {
        self.inner.kind()
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn start(&mut self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            target: "retransmit::redis",
            event = "subscription_started",
            channels = %self.channels.join(",")
        );
        self.inner.start(shutdown).await
    }

    fn run(&mut self) -> crate::transport::TransportRun {
        self.inner.run()
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await
    }
}

fn build_redis_client(url: &str) -> StdResult<Client, RedisDriverError> {
    Client::open(url).map_err(|err| {
        RedisDriverError::Connect(Box::new(crate::err!(
            "failed to create redis client for `{url}`: {err}"
        )))
    })
}

#[allow(deprecated)]
async fn build_pubsub(client: &Client, channels: &[String]) -> StdResult<PubSub, RedisDriverError> {
    let connection = client.get_async_connection().await.map_err(|err| {
        RedisDriverError::Connect(Box::new(crate::err!(
            "failed to open redis pub/sub connection: {err}"
        )))
    })?;
    let mut pubsub = connection.into_pubsub();
    for channel in channels {
        pubsub
            .subscribe(channel)
            .await
            .map_err(|err| RedisDriverError::Subscribe {
                channel: channel.clone(),
                source: err,
            })?;
    }
    Ok(pubsub)
}

#[derive(Debug, Error)]
pub enum RedisDriverError {
    #[error("redis connection error: {0}")]
    Connect(#[source] Box<crate::error::Error>),
    #[error("failed to subscribe to channel `{channel}`: {source}")]
    Subscribe {
        channel: String,
        #[source]
        source: RedisError,
    },
    #[error("failed to publish to channel `{channel}`: {source}")]
    Publish {
        channel: String,
        #[source]
        source: RedisError,
    },
    #[error("redis read failed: {0}")]
    Read(#[source] RedisError),
    #[error("redis subscription connection closed")]
    Disconnected,
}
