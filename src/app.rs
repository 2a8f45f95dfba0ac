use crate::app_state::{AppState, WebSocketState};
use crate::config::{GatewayConfig, RetransmitConfig};
use crate::connectors::{HttpConnector, RedisConnector};
use crate::correlation::{CorrelationService, Publisher};
use crate::domain::HttpMethod;
use crate::error::{Context, Result};
use crate::gateway::{HttpGateway, HttpHooks, RequestGuard, ResponseCache};
use crate::integration::{Connector, ConnectorRegistry};
use crate::transport::http_server::HttpServerRuntime;
use crate::transport::redis::{RedisPublisher, RedisSubscriptionRuntime, ReplySink};
use crate::transport::{TaskTransportRuntime, TransportKind, TransportRun, TransportRuntime};
use crate::websocket::{
    ConnectionRegistry, HttpWebSocketConnector, RedisWebSocketConnector, WebSocketConnector,
    WebSocketFanout, WebSocketHookSet, WebSocketHooks, WebSocketReplyRouter, WebSocketResponder,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const HARD_STOP: Duration = Duration::from_secs(1);

/// Start-up options beyond the gateway YAML: hooks, collaborators and connector overrides.
pub struct GatewayAppBuilder {
    config: GatewayConfig,
    http_hooks: Option<Arc<dyn HttpHooks>>,
    route_hooks: Vec<(String, HttpMethod, Arc<dyn HttpHooks>)>,
    guards: Vec<Arc<dyn RequestGuard>>,
    cache: Option<Arc<dyn ResponseCache>>,
    websocket_hooks: WebSocketHookSet,
    connectors: Vec<Arc<dyn Connector>>,
    publisher: Option<Arc<dyn Publisher>>,
}

impl GatewayAppBuilder {
    pub fn http_hooks(mut self, hooks: Arc<dyn HttpHooks>) -> Self {
        self.http_hooks = Some(hooks);
        self
    }

    pub fn route_hooks(
        mut self,
        route: impl Into<String>,
        method: HttpMethod,
        hooks: Arc<dyn HttpHooks>,
    ) -> Self {
        self.route_hooks.push((route.into(), method, hooks));
        self
    }

    pub fn guard(mut self, guard: Arc<dyn RequestGuard>) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn websocket_hooks(mut self, hooks: Arc<dyn WebSocketHooks>) -> Self {
        self.websocket_hooks.set_global(hooks);
        self
    }

    pub fn websocket_route_hooks(
        mut self,
        route: impl Into<String>,
        hooks: Arc<dyn WebSocketHooks>,
    ) -> Self {
        self.websocket_hooks.set_route(route, hooks);
        self
    }

    /// Installs a connector, replacing the built-in connector of the same kind.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors.push(connector);
        self
    }

    /// Uses `publisher` instead of connecting to the configured Redis server.
    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub async fn build(self) -> Result<GatewayApp> {
        let config = Arc::new(self.config);
        let needs_pubsub = config.http.redis.is_some() || config.websocket.redis.is_some();

        let publisher: Option<Arc<dyn Publisher>> = match (self.publisher, &config.redis) {
            (Some(publisher), _) => Some(publisher),
            (None, Some(redis)) if needs_pubsub => Some(Arc::new(
                RedisPublisher::connect(&redis.url)
                    .await
                    .context("failed to connect redis publisher")?,
            )),
            _ => None,
        };

        let mut transports: Vec<Box<dyn TransportRuntime>> = Vec::new();
        let mut sinks: HashMap<String, Arc<dyn ReplySink>> = HashMap::new();
        let mut builtin: Vec<Arc<dyn Connector>> = vec![Arc::new(HttpConnector::new()?)];

        let http_pubsub = publisher
            .clone()
            .zip(config.http.redis.as_ref())
            .zip(config.http_response_channel());
        if let Some(((publisher, http_redis), channel)) = http_pubsub {
            let correlation = Arc::new(CorrelationService::new(
                publisher,
                channel.clone(),
                http_redis.timeout,
                http_redis.cleanup_interval,
            ));
            sinks.insert(channel, Arc::clone(&correlation) as Arc<dyn ReplySink>);
            builtin.push(Arc::new(RedisConnector::new(Arc::clone(&correlation))));
            transports.push(Box::new(TaskTransportRuntime::new(
                TransportKind::Sweeper,
                "pending-sweeper",
                move |shutdown| vec![correlation.spawn_sweeper(shutdown)],
            )));
        }

        let mut registry = ConnectorRegistry::builtin(builtin);
        for connector in self.connectors {
            registry.register(connector);
        }
        registry.init_all(&config).await?;
        let registry = Arc::new(registry);

        let mut http = HttpGateway::new(Arc::clone(&config), registry);
        if let Some(hooks) = self.http_hooks {
            http = http.with_hooks(hooks);
        }
        for (route, method, hooks) in self.route_hooks {
            http = http.with_route_hooks(route, method, hooks);
        }
        for guard in self.guards {
            http = http.with_guard(guard);
        }
        if let Some(cache) = self.cache {
            http = http.with_cache(cache);
        }

        let connections = Arc::new(ConnectionRegistry::default());
        let responder = WebSocketResponder::new(Arc::clone(&connections), self.websocket_hooks.clone());
        let mut websocket_connectors: Vec<Arc<dyn WebSocketConnector>> =
            vec![Arc::new(HttpWebSocketConnector::new(responder.clone())?)];
        if let Some((publisher, channel)) = publisher.zip(config.websocket_response_channel()) {
            websocket_connectors.push(Arc::new(RedisWebSocketConnector::new(publisher, channel.clone())));
            sinks.insert(channel, Arc::new(WebSocketReplyRouter::new(responder)));
        }
        for connector in &websocket_connectors {
            connector
                .init(&config)
                .await
                .with_context(|| format!("failed to initialise `{}` websocket connector", connector.kind()))?;
        }

        if !sinks.is_empty() {
            let redis = config
                .redis
                .as_ref()
                .ok_or_else(|| crate::err!("pub/sub services require a `redis.url`"))?;
            let subscription =
                RedisSubscriptionRuntime::connect(&redis.url, sinks, redis.reconnect.clone())
                    .await
                    .context("failed to subscribe to response channels")?;
            transports.push(Box::new(subscription));
        }

        let state = AppState {
            config: Arc::clone(&config),
            http,
            websocket: WebSocketState {
                fanout: WebSocketFanout::new(Arc::clone(&config), websocket_connectors),
                registry: connections,
                hooks: self.websocket_hooks,
            },
        };
        transports.push(Box::new(HttpServerRuntime::build(state.clone())));

        Ok(GatewayApp {
            state,
            transports,
            shutdown: CancellationToken::new(),
        })
    }
}

pub struct GatewayApp {
    state: AppState,
    transports: Vec<Box<dyn TransportRuntime>>,
    shutdown: CancellationToken,
}

impl GatewayApp {
    pub fn builder(config: GatewayConfig) -> GatewayAppBuilder {
        GatewayAppBuilder {
            config,
            http_hooks: None,
            route_hooks: Vec::new(),
            guards: Vec::new(),
            cache: None,
            websocket_hooks: WebSocketHookSet::default(),
            connectors: Vec::new(),
            publisher: None,
        }
    }

    /// Loads the gateway YAML named by the process settings and applies their overrides.
    pub async fn initialise(settings: RetransmitConfig) -> Result<Self> {
        let mut config = GatewayConfig::from_path(&settings.gateway_config_path).with_context(|| {
            format!(
                "failed to load gateway config from {}",
                settings.gateway_config_path
            )
        })?;

        if let Some(listen) = settings.listen.as_deref() {
            config.app.listen = listen
                .parse::<SocketAddr>()
                .with_context(|| format!("invalid listen address `{listen}`"))?;
        }
        if let Some(instance_id) = settings.instance_id {
            config.app.instance_id = instance_id;
        }

        Self::builder(config).build().await
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Cancelling this token stops the application as a shutdown signal would.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(self) -> Result<()> {
        let GatewayApp {
            state,
            transports,
            shutdown,
        } = self;

        let mut transport_handles = transports;
        let mut transport_runs: Vec<TransportRun> = Vec::new();
        for handle in transport_handles.iter_mut() {
            handle.start(shutdown.clone()).await?;
            transport_runs.push(handle.run());
        }

        let mut transport_tasks = JoinSet::new();
        for run in transport_runs {
            let kind = run.kind();
            let name = run.name();
            transport_tasks.spawn(async move {
                match run.wait().await {
                    Ok(()) => {
                        tracing::info!(transport = %kind, name = name, "transport runtime stopped");
                        Ok(())
                    }
                    Err(err) => {
                        tracing::error!(
                            transport = %kind,
                            name = name,
                            error = %err,
                            "transport runtime terminated with error"
                        );
                        Err(err)
                    }
                }
            });
        }

        tracing::info!(
            listen = %state.config.app.listen,
            instance_id = %state.config.app.instance_id,
            "retransmit gateway ready; press Ctrl+C to stop"
        );

        tokio::select! {
            res = transport_tasks.join_next(), if !transport_tasks.is_empty() => {
                if let Some(res) = res {
                    match res {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => return Err(err),
                        Err(join_err) => {
                            return Err(crate::err!(
                                "transport runtime supervisor join error: {join_err}"
                            ))
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
            }
            _ = shutdown.cancelled() => {
                tracing::info!("shutdown requested");
            }
        }

        shutdown.cancel();

        let graceful_shutdown = async {
            for handle in transport_handles.iter_mut() {
                if let Err(err) = handle.shutdown().await {
                    tracing::warn!(
                        transport = %handle.kind(),
                        name = handle.name(),
                        error = %err,
                        "failed to shutdown transport gracefully"
                    );
                }
            }

            while let Some(res) = transport_tasks.join_next().await {
                match res {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return Err(err),
                    Err(join_err) => {
                        tracing::warn!(
                            error = %join_err,
                            "transport monitor task cancelled"
                        );
                    }
                }
            }

            Ok::<(), crate::error::Error>(())
        };

        match timeout(DRAIN_TIMEOUT, graceful_shutdown).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    timeout_secs = DRAIN_TIMEOUT.as_secs_f64(),
                    "graceful shutdown timed out; forcing exit"
                );
                transport_tasks.shutdown().await;
                sleep(HARD_STOP).await;
                Err(crate::err!(
                    "graceful shutdown timed out after {:?}",
                    DRAIN_TIMEOUT
                ))
            }
        }
    }
}
