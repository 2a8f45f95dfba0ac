use crate::config::gateway::ServiceConfig;
use crate::domain::{HttpMethod, HttpRequest};
use crate::integration::{ConnectorRegistry, FetchedResponse, Invocation, InvokeOutcome};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Services sharing one stage key.
#[derive(Clone, Debug, PartialEq)]
pub struct StageConfig {
    pub stage: Option<u32>,
    pub services: BTreeMap<String, ServiceConfig>,
}

/// Groups services by stage. Numbered stages run in ascending order; unstaged services form
/// one final stage.
pub fn sort_into_stages(services: &BTreeMap<String, ServiceConfig>) -> Vec<StageConfig> {
    let mut grouped: BTreeMap<(bool, u32), StageConfig> = BTreeMap::new();
    for (name, service) in services {
        let stage = service.stage();
        grouped
            .entry((stage.is_none(), stage.unwrap_or(0)))
            .or_insert_with(|| StageConfig {
                stage,
                services: BTreeMap::new(),
            })
            .services
            .insert(name.clone(), service.clone());
    }
    grouped.into_values().collect()
}

/// Runs stages one after another, every connector of a stage concurrently.
#[derive(Clone, Debug)]
pub struct StageScheduler {
    registry: Arc<ConnectorRegistry>,
}

impl StageScheduler {
    pub fn new(registry: Arc<ConnectorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectorRegistry> {
        &self.registry
    }

    /// Returns every response in stage order. A stage starts only after each invocation of the
    /// previous stage has settled.
    pub async fn run(
        &self,
        request_id: &str,
        request: &HttpRequest,
        route: &str,
        method: HttpMethod,
        stages: &[StageConfig],
    ) -> Vec<FetchedResponse> {
        let mut responses: Vec<FetchedResponse> = Vec::new();

        for stage in stages {
            let stage_responses: Vec<FetchedResponse> = {
                let invocation = Invocation {
                    request_id,
                    request,
                    route,
                    method,
                    stage: stage.stage,
                    services: &stage.services,
                    prior: &responses,
                };
                join_all(
                    self.registry
                        .connectors()
                        .iter()
                        .map(|connector| connector.invoke(&invocation)),
                )
                .await
                .into_iter()
                .flatten()
                .filter_map(InvokeOutcome::into_response)
                .collect()
            };

            tracing::debug!(
                target: "retransmit::gateway",
                event = "stage_completed",
                route = %route,
                request_id = %request_id,
                stage = ?stage.stage,
                responses = stage_responses.len()
            );
            responses.extend(stage_responses);
        }

        responses
    }
}
