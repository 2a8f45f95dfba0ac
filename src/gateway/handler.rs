use super::hooks::{HookSet, HttpHooks, RequestDecision, RequestGuard, ResponseCache};
use super::merge::{apply_generic_errors, merge_responses, prepare_for_merge};
use super::rollback::RollbackCoordinator;
use super::stages::{sort_into_stages, StageScheduler};
use crate::config::gateway::GatewayConfig;
use crate::domain::{new_request_id, HttpMethod, HttpRequest, MergedResponse};
use crate::integration::ConnectorRegistry;
use crate::metrics::metrics;
use std::sync::Arc;
use tokio::time::Instant;

/// Entry point of HTTP dispatch. Always answers with a well-formed response.
#[derive(Clone)]
pub struct HttpGateway {
    config: Arc<GatewayConfig>,
    scheduler: StageScheduler,
    rollback: RollbackCoordinator,
    hooks: HookSet,
    guards: Vec<Arc<dyn RequestGuard>>,
    cache: Option<Arc<dyn ResponseCache>>,
}

impl HttpGateway {
    pub fn new(config: Arc<GatewayConfig>, registry: Arc<ConnectorRegistry>) -> Self {
        Self {
            config,
            scheduler: StageScheduler::new(Arc::clone(&registry)),
            rollback: RollbackCoordinator::new(registry),
            hooks: HookSet::default(),
            guards: Vec::new(),
            cache: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn HttpHooks>) -> Self {
        self.hooks.set_global(hooks);
        self
    }

    pub fn with_route_hooks(
        mut self,
        route: impl Into<String>,
        method: HttpMethod,
        hooks: Arc<dyn HttpHooks>,
    ) -> Self {
        self.hooks.set_route(route, method, hooks);
        self
    }

    pub fn with_guard(mut self, guard: Arc<dyn RequestGuard>) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &Arc<GatewayConfig> {
        &self.config
    }

    /// Dispatches `request`, matched against the configured `route` pattern.
    pub async fn handle(&self, route: &str, request: HttpRequest) -> MergedResponse {
        let started = Instant::now();
        let method = request.method;
        let response = self.dispatch(route, request).await;

        metrics().record_http_request(route, response.status, started.elapsed());
        tracing::info!(
            target: "retransmit::gateway",
            event = "request_completed",
            route = %route,
            method = %method,
            status = response.status,
            elapsed_ms = started.elapsed().as_millis() as u64
        );
        response
    }

    async fn dispatch(&self, route: &str, request: HttpRequest) -> MergedResponse {
        let method = request.method;
        let Some(route_config) = self.config.http_route(route, method) else {
            return MergedResponse::not_found();
        };
        let generic_errors = self.config.generic_errors_for(Some(route_config));

        for guard in &self.guards {
            if let Some(response) = guard.check(route, method, &request).await {
                tracing::debug!(
                    target: "retransmit::gateway",
                    event = "request_rejected",
                    route = %route,
                    guard = guard.name(),
                    status = response.status
                );
                return apply_generic_errors(response, generic_errors);
            }
        }

        if let Some(cache) = &self.cache {
            if let Some(response) = cache.get(route, method, &request).await {
                return apply_generic_errors(response, generic_errors);
            }
        }

        let hooks = self.hooks.for_route(route, method);
        let original = request.clone();
        let request = match hooks.on_request(request).await {
            RequestDecision::Continue(request) => request,
            RequestDecision::Handled(response) => {
                return apply_generic_errors(response, generic_errors);
            }
        };

        let request_id = new_request_id();
        let stages = sort_into_stages(&route_config.services);
        let responses = self
            .scheduler
            .run(&request_id, &request, route, method, &stages)
            .await;
        let responses = hooks.merge_responses(responses, &original).await;

        let merged = match merge_responses(&prepare_for_merge(responses.clone(), route_config)) {
            Some(merged) => merged,
            None => return MergedResponse::not_found(),
        };

        if merged.is_error() {
            hooks.on_error(&responses, &original).await;
            self.rollback
                .trigger(&request_id, &request, route, method, route_config);
        }

        let response = hooks.on_response(merged, &original).await;
        if let Some(cache) = &self.cache {
            cache.store(route, method, &original, &response).await;
        }

        apply_generic_errors(response, generic_errors)
    }
}
