#[path = "common/mod.rs"]
mod common;
#[path = "support/mod.rs"]
mod support;

use proptest::prelude::*;
use retransmit::config::gateway::{RedisServiceConfig, ServiceConfig};
use retransmit::gateway::{sort_into_stages, HttpGateway};
use retransmit::integration::{Connector, ConnectorKind, ConnectorRegistry};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use support::mocks::{InvocationRecord, RecordingConnector};

const STAGED_ROUTE: &str = r#"
redis:
  url: redis://localhost:6379
http:
  redis:
    response_channel: responses
  routes:
    /checkout:
      POST:
        services:
          auth:
            type: http
            url: http://auth.internal
            stage: 1
          inventory:
            type: redis
            request_channel: inventory
            stage: 2
          summary:
            type: http
            url: http://summary.internal
"#;

fn registry(http: &Arc<RecordingConnector>, redis: &Arc<RecordingConnector>) -> Arc<ConnectorRegistry> {
    let http: Arc<dyn Connector> = http.clone();
    let redis: Arc<dyn Connector> = redis.clone();
    Arc::new(ConnectorRegistry::builtin(vec![http, redis]))
}

#[tokio::test]
async fn stages_run_in_order_and_see_earlier_responses() {
    let http = Arc::new(
        RecordingConnector::new(ConnectorKind::Http).with_delay(Duration::from_millis(20)),
    );
    let redis = Arc::new(RecordingConnector::new(ConnectorKind::Redis));
    let gateway = HttpGateway::new(
        common::gateway_config(STAGED_ROUTE),
        registry(&http, &redis),
    );

    let response = gateway
        .handle("/checkout", common::post("/checkout", json!({"sku": "A1"})))
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body, Some(json!("summary")));

    assert_eq!(
        http.invocations(),
        vec![
            InvocationRecord {
                stage: Some(1),
                services: vec!["auth".to_string()],
                prior: vec![],
            },
            InvocationRecord {
                stage: None,
                services: vec!["summary".to_string()],
                prior: vec!["auth".to_string(), "inventory".to_string()],
            },
        ]
    );
    assert_eq!(
        redis.invocations(),
        vec![InvocationRecord {
            stage: Some(2),
            services: vec!["inventory".to_string()],
            prior: vec!["auth".to_string()],
        }]
    );
}

#[tokio::test]
async fn unknown_route_is_not_found_without_invoking_services() {
    let http = Arc::new(RecordingConnector::new(ConnectorKind::Http));
    let redis = Arc::new(RecordingConnector::new(ConnectorKind::Redis));
    let gateway = HttpGateway::new(
        common::gateway_config(STAGED_ROUTE),
        registry(&http, &redis),
    );

    let response = gateway.handle("/missing", common::get("/missing")).await;

    assert_eq!(response.status, 404);
    assert!(http.invocations().is_empty());
    assert!(redis.invocations().is_empty());
}

fn service(stage: Option<u32>) -> ServiceConfig {
    ServiceConfig::Redis(RedisServiceConfig {
        request_channel: "input".to_string(),
        num_request_channels: 1,
        timeout: None,
        stage,
        merge: true,
        merge_field: None,
    })
}

proptest! {
    #[test]
    fn stages_are_ascending_with_unstaged_last(stages in prop::collection::vec(prop::option::of(0u32..6), 0..24)) {
        let services: BTreeMap<String, ServiceConfig> = stages
            .iter()
            .enumerate()
            .map(|(index, stage)| (format!("service-{index}"), service(*stage)))
            .collect();

        let sorted = sort_into_stages(&services);

        let total: usize = sorted.iter().map(|stage| stage.services.len()).sum();
        prop_assert_eq!(total, services.len());

        for stage in &sorted {
            prop_assert!(!stage.services.is_empty());
            for config in stage.services.values() {
                prop_assert_eq!(config.stage(), stage.stage);
            }
        }

        let keys: Vec<Option<u32>> = sorted.iter().map(|stage| stage.stage).collect();
        let numbered: Vec<u32> = keys.iter().flatten().copied().collect();
        prop_assert!(numbered.windows(2).all(|pair| pair[0] < pair[1]));
        if let Some(position) = keys.iter().position(Option::is_none) {
            prop_assert_eq!(position, keys.len() - 1);
        }
    }
}
