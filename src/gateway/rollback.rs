use crate::config::gateway::HttpRouteConfig;
use crate::domain::{HttpMethod, HttpRequest};
use crate::integration::{Connector, ConnectorKind, ConnectorRegistry, RollbackRequest};
use crate::metrics::metrics;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Issues compensation requests after a failed dispatch.
#[derive(Clone, Debug)]
pub struct RollbackCoordinator {
    registry: Arc<ConnectorRegistry>,
}

impl RollbackCoordinator {
    pub fn new(registry: Arc<ConnectorRegistry>) -> Self {
        Self { registry }
    }

    /// Registered connectors owning at least one service of the route.
    pub fn connectors_for(&self, route_config: &HttpRouteConfig) -> Vec<Arc<dyn Connector>> {
        let kinds: BTreeSet<ConnectorKind> =
            route_config.services.values().map(ConnectorKind::of).collect();
        self.registry
            .connectors()
            .iter()
            .filter(|connector| kinds.contains(&connector.kind()))
            .cloned()
            .collect()
    }

    /// Spawns one rollback per connector. The handles are returned for callers that want to
    /// wait; the request path drops them.
    pub fn trigger(
        &self,
        request_id: &str,
        request: &HttpRequest,
        route: &str,
        method: HttpMethod,
        route_config: &HttpRouteConfig,
    ) -> Vec<JoinHandle<()>> {
        let connectors = self.connectors_for(route_config);
        if connectors.is_empty() {
            return Vec::new();
        }

        let request_id: Arc<str> = Arc::from(request_id);
        let request = Arc::new(request.clone());
        let route: Arc<str> = Arc::from(route);
        let route_config = Arc::new(route_config.clone());

        connectors
            .into_iter()
            .map(|connector| {
                let request_id = Arc::clone(&request_id);
                let request = Arc::clone(&request);
                let route = Arc::clone(&route);
                let route_config = Arc::clone(&route_config);
                metrics().rollback_issued();
                tokio::spawn(async move {
                    let rollback = RollbackRequest {
                        request_id: &request_id,
                        request: &request,
                        route: &route,
                        method,
                        route_config: &route_config,
                    };
                    if let Err(err) = connector.rollback(&rollback).await {
                        metrics().rollback_failed();
                        tracing::warn!(
                            target: "retransmit::rollback",
                            event = "rollback_failed",
                            route = %route,
                            connector = %connector.kind(),
                            request_id = %request_id,
                            error = %err
                        );
                    } else {
                        tracing::debug!(
                            target: "retransmit::rollback",
                            event = "rollback_sent",
                            route = %route,
                            connector = %connector.kind(),
                            request_id = %request_id
                        );
                    }
                })
            })
            .collect()
    }
}
