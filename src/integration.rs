pub mod registry;

use crate::config::gateway::{GatewayConfig, HttpRouteConfig, ServiceConfig};
use crate::domain::{HttpMethod, HttpRequest, HttpResponse};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

pub use registry::{ConnectorRegistry, ConnectorRegistryError};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnectorKind {
    Http,
    Redis,
}

impl ConnectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorKind::Http => "http",
            ConnectorKind::Redis => "redis",
        }
    }

    pub fn of(service: &ServiceConfig) -> Self {
        match service {
            ServiceConfig::Http(_) => ConnectorKind::Http,
            ServiceConfig::Redis(_) => ConnectorKind::Redis,
        }
    }
}

impl Display for ConnectorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response of one backend service, tagged with where it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchedResponse {
    pub connector: ConnectorKind,
    pub service: String,
    pub elapsed_ms: u64,
    pub response: HttpResponse,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InvokeOutcome {
    /// Nothing to merge: the service is fire-and-forget.
    Skip,
    Response(FetchedResponse),
}

impl InvokeOutcome {
    pub fn into_response(self) -> Option<FetchedResponse> {
        match self {
            InvokeOutcome::Skip => None,
            InvokeOutcome::Response(response) => Some(response),
        }
    }
}

/// Everything a connector needs to run the services of one stage.
#[derive(Clone, Copy, Debug)]
pub struct Invocation<'a> {
    pub request_id: &'a str,
    pub request: &'a HttpRequest,
    pub route: &'a str,
    pub method: HttpMethod,
    pub stage: Option<u32>,
    /// Services of the current stage, across all connector kinds.
    pub services: &'a BTreeMap<String, ServiceConfig>,
    /// Responses collected by earlier stages.
    pub prior: &'a [FetchedResponse],
}

impl<'a> Invocation<'a> {
    pub fn owned_services(
        &self,
        kind: ConnectorKind,
    ) -> impl Iterator<Item = (&'a String, &'a ServiceConfig)> + 'a {
        self.services
            .iter()
            .filter(move |(_, service)| ConnectorKind::of(service) == kind)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RollbackRequest<'a> {
    pub request_id: &'a str,
    pub request: &'a HttpRequest,
    pub route: &'a str,
    pub method: HttpMethod,
    pub route_config: &'a HttpRouteConfig,
}

impl<'a> RollbackRequest<'a> {
    pub fn owned_services(
        &self,
        kind: ConnectorKind,
    ) -> impl Iterator<Item = (&'a String, &'a ServiceConfig)> + 'a {
        self.route_config
            .services
            .iter()
            .filter(move |(_, service)| ConnectorKind::of(service) == kind)
    }
}

/// Backend integration used by the HTTP dispatch path.
///
/// `invoke` must never fail: unreachable services become synthesized failure responses.
#[async_trait]
pub trait Connector: Send + Sync {
    fn kind(&self) -> ConnectorKind;

    async fn init(&self, _config: &GatewayConfig) -> Result<()> {
        Ok(())
    }

    async fn invoke(&self, invocation: &Invocation<'_>) -> Vec<InvokeOutcome>;

    async fn rollback(&self, rollback: &RollbackRequest<'_>) -> Result<()>;
}
