#[path = "common/mod.rs"]
mod common;
#[path = "support/mod.rs"]
mod support;

use retransmit::connectors::RedisConnector;
use retransmit::correlation::CorrelationService;
use retransmit::domain::{HttpMethod, HttpResponse};
use retransmit::gateway::{HttpGateway, RollbackCoordinator};
use retransmit::integration::{Connector, ConnectorKind, ConnectorRegistry};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::mocks::{MockBroker, RecordingConnector};

const MIXED_ROUTE: &str = r#"
redis:
  url: redis://localhost:6379
http:
  redis:
    response_channel: responses
  routes:
    /orders:
      POST:
        services:
          billing:
            type: http
            url: http://billing.internal
          stock:
            type: redis
            request_channel: stock
          ledger:
            type: redis
            request_channel: ledger
    /notify:
      POST:
        services:
          mailer:
            type: http
            url: http://mailer.internal
"#;

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn each_connector_of_the_route_rolls_back_once() {
    let http = Arc::new(RecordingConnector::new(ConnectorKind::Http));
    let redis = Arc::new(RecordingConnector::new(ConnectorKind::Redis).failing_rollback());
    let registry = {
        let http: Arc<dyn Connector> = http.clone();
        let redis: Arc<dyn Connector> = redis.clone();
        Arc::new(ConnectorRegistry::builtin(vec![http, redis]))
    };
    let config = common::gateway_config(MIXED_ROUTE);
    let route = config
        .http_route("/orders", HttpMethod::Post)
        .expect("route declared");

    let handles = RollbackCoordinator::new(registry).trigger(
        "req-1",
        &common::post("/orders", json!({"item": 7})),
        "/orders",
        HttpMethod::Post,
        route,
    );
    assert_eq!(handles.len(), 2);
    for handle in handles {
        handle.await.expect("rollback task");
    }

    assert_eq!(http.rollbacks(), 1);
    assert_eq!(redis.rollbacks(), 1);
}

#[tokio::test]
async fn failed_dispatch_rolls_back_only_connectors_in_use() {
    let http = Arc::new(
        RecordingConnector::new(ConnectorKind::Http)
            .respond("mailer", HttpResponse::with_status(500, "smtp down")),
    );
    let redis = Arc::new(RecordingConnector::new(ConnectorKind::Redis));
    let registry = {
        let http: Arc<dyn Connector> = http.clone();
        let redis: Arc<dyn Connector> = redis.clone();
        Arc::new(ConnectorRegistry::builtin(vec![http, redis]))
    };
    let gateway = HttpGateway::new(common::gateway_config(MIXED_ROUTE), registry);

    let response = gateway
        .handle("/notify", common::post("/notify", json!({"to": "ops"})))
        .await;

    assert_eq!(response.status, 500);
    wait_for(|| http.rollbacks() == 1).await;
    assert_eq!(redis.rollbacks(), 0);
}

#[tokio::test]
async fn successful_dispatch_does_not_roll_back() {
    let http = Arc::new(RecordingConnector::new(ConnectorKind::Http));
    let redis = Arc::new(RecordingConnector::new(ConnectorKind::Redis));
    let registry = {
        let http: Arc<dyn Connector> = http.clone();
        let redis: Arc<dyn Connector> = redis.clone();
        Arc::new(ConnectorRegistry::builtin(vec![http, redis]))
    };
    let gateway = HttpGateway::new(common::gateway_config(MIXED_ROUTE), registry);

    let response = gateway
        .handle("/orders", common::post("/orders", json!({})))
        .await;

    assert_eq!(response.status, 200);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(http.rollbacks(), 0);
    assert_eq!(redis.rollbacks(), 0);
}

#[tokio::test]
async fn redis_rollback_publishes_once_per_channel() {
    let broker = MockBroker::new();
    let correlation = Arc::new(CorrelationService::new(
        Arc::new(broker.clone()),
        "responses.test",
        Duration::from_secs(5),
        Duration::from_secs(1),
    ));
    let connector: Arc<dyn Connector> = Arc::new(RedisConnector::new(correlation));
    let registry = Arc::new(ConnectorRegistry::builtin(vec![connector]));
    let config = common::gateway_config(MIXED_ROUTE);
    let route = config
        .http_route("/orders", HttpMethod::Post)
        .expect("route declared");

    for handle in RollbackCoordinator::new(registry).trigger(
        "req-9",
        &common::post("/orders", json!({"item": 7})),
        "/orders",
        HttpMethod::Post,
        route,
    ) {
        handle.await.expect("rollback task");
    }

    let published = broker.published();
    assert_eq!(published.len(), 2);
    let mut channels: Vec<&str> = published.iter().map(|p| p.channel.as_str()).collect();
    channels.sort_unstable();
    assert_eq!(channels, vec!["ledger", "stock"]);
    for message in &published {
        assert_eq!(message.payload["id"], json!("req-9"));
        assert_eq!(message.payload["type"], json!("rollback"));
        assert_eq!(message.payload["request"]["body"], json!({"item": 7}));
        assert!(message.payload.get("responseChannel").is_none());
    }
}
