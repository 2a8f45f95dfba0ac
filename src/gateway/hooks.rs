//! Extension points around HTTP dispatch.
//!
//! Every hook has a pass-through default, so implementations override only what they need.
//! Route-level hooks replace the gateway-level hooks for that route.

use crate::domain::{HttpMethod, HttpRequest, MergedResponse};
use crate::integration::FetchedResponse;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub enum RequestDecision {
    Continue(HttpRequest),
    /// Skip dispatch and answer with this response.
    Handled(MergedResponse),
}

#[async_trait]
pub trait HttpHooks: Send + Sync {
    async fn on_request(&self, request: HttpRequest) -> RequestDecision {
        RequestDecision::Continue(request)
    }

    async fn merge_responses(
        &self,
        responses: Vec<FetchedResponse>,
        _request: &HttpRequest,
    ) -> Vec<FetchedResponse> {
        responses
    }

    async fn on_error(&self, _responses: &[FetchedResponse], _request: &HttpRequest) {}

    async fn on_response(&self, response: MergedResponse, _request: &HttpRequest) -> MergedResponse {
        response
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl HttpHooks for NoopHooks {}

/// Authentication, rate limiting or circuit breaking in front of dispatch.
#[async_trait]
pub trait RequestGuard: Send + Sync {
    fn name(&self) -> &str;

    /// `Some` short-circuits the request with the returned response.
    async fn check(
        &self,
        route: &str,
        method: HttpMethod,
        request: &HttpRequest,
    ) -> Option<MergedResponse>;
}

#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(
        &self,
        route: &str,
        method: HttpMethod,
        request: &HttpRequest,
    ) -> Option<MergedResponse>;

    async fn store(
        &self,
        route: &str,
        method: HttpMethod,
        request: &HttpRequest,
        response: &MergedResponse,
    );
}

#[derive(Clone)]
pub struct HookSet {
    global: Arc<dyn HttpHooks>,
    routes: HashMap<(String, HttpMethod), Arc<dyn HttpHooks>>,
}

impl Default for HookSet {
    fn default() -> Self {
        Self::new(Arc::new(NoopHooks))
    }
}

impl HookSet {
    pub fn new(global: Arc<dyn HttpHooks>) -> Self {
        Self {
            global,
            routes: HashMap::new(),
        }
    }

    pub fn set_global(&mut self, hooks: Arc<dyn HttpHooks>) {
        self.global = hooks;
    }

    pub fn set_route(&mut self, route: impl Into<String>, method: HttpMethod, hooks: Arc<dyn HttpHooks>) {
        self.routes.insert((route.into(), method), hooks);
    }

    pub fn for_route(&self, route: &str, method: HttpMethod) -> &Arc<dyn HttpHooks> {
        self.routes
            .get(&(route.to_string(), method))
            .unwrap_or(&self.global)
    }
}
