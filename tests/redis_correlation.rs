#[path = "common/mod.rs"]
mod common;
#[path = "support/mod.rs"]
mod support;

use retransmit::connectors::RedisConnector;
use retransmit::correlation::{request_channel, CorrelationService, ReplyDisposition};
use retransmit::domain::HttpResponse;
use retransmit::gateway::HttpGateway;
use retransmit::integration::{Connector, ConnectorRegistry};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::mocks::MockBroker;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const SHARED_CHANNEL_ROUTE: &str = r#"
app:
  instance_id: node-a
redis:
  url: redis://localhost:6379
http:
  redis:
    response_channel: responses
    cleanup_interval: 1s
    timeout: 2s
  routes:
    /dashboard:
      GET:
        services:
          stats:
            type: redis
            request_channel: input
          alerts:
            type: redis
            request_channel: input
    /sharded:
      GET:
        services:
          search:
            type: redis
            request_channel: search
            num_request_channels: 8
"#;

struct Harness {
    broker: MockBroker,
    correlation: Arc<CorrelationService>,
    gateway: HttpGateway,
}

fn harness() -> Harness {
    let config = common::gateway_config(SHARED_CHANNEL_ROUTE);
    let redis = config.http.redis.clone().expect("redis section");
    let broker = MockBroker::new();
    let correlation = Arc::new(CorrelationService::new(
        Arc::new(broker.clone()),
        config.http_response_channel().expect("response channel"),
        redis.timeout,
        redis.cleanup_interval,
    ));
    broker.attach(&correlation);

    let connector: Arc<dyn Connector> = Arc::new(RedisConnector::new(Arc::clone(&correlation)));
    let gateway = HttpGateway::new(
        config,
        Arc::new(ConnectorRegistry::builtin(vec![connector])),
    );
    Harness {
        broker,
        correlation,
        gateway,
    }
}

fn reply(id: &serde_json::Value, service: &str, body: serde_json::Value) -> serde_json::Value {
    json!({"id": id, "service": service, "response": {"body": body}})
}

#[tokio::test]
async fn services_sharing_a_channel_get_one_publish() {
    let Harness {
        broker,
        correlation,
        gateway,
    } = harness();
    broker.respond_with(|published| {
        let id = &published.payload["id"];
        vec![
            reply(id, "stats", json!({"visits": 10})),
            reply(id, "alerts", json!({"alerts": []})),
        ]
    });

    let response = gateway
        .handle("/dashboard", common::get("/dashboard"))
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body, Some(json!({"visits": 10, "alerts": []})));

    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].channel, "input");
    let envelope = &published[0].payload;
    assert_eq!(envelope["type"], json!("request"));
    assert_eq!(envelope["responseChannel"], json!("responses.node-a"));
    assert_eq!(envelope["request"]["path"], json!("/dashboard"));
    assert_eq!(envelope["id"].as_str().map(str::len), Some(32));
    assert!(correlation.pending().is_empty());
}

#[tokio::test]
async fn sharded_requests_use_the_hashed_channel() {
    let Harness {
        broker, gateway, ..
    } = harness();
    broker.respond_with(|published| {
        vec![reply(&published.payload["id"], "search", json!({"hits": 3}))]
    });

    let response = gateway.handle("/sharded", common::get("/sharded")).await;
    assert_eq!(response.status, 200);

    let published = broker.published();
    assert_eq!(published.len(), 1);
    let id = published[0].payload["id"].as_str().expect("request id");
    assert_eq!(published[0].channel, request_channel("search", 8, id));
    assert!(published[0].channel.starts_with("search."));
}

#[tokio::test(start_paused = true)]
async fn unanswered_services_time_out_through_the_sweep() {
    let Harness {
        correlation,
        gateway,
        ..
    } = harness();
    let shutdown = CancellationToken::new();
    let sweeper = correlation.spawn_sweeper(shutdown.clone());
    let timeout = Duration::from_secs(2);
    let cleanup_interval = Duration::from_secs(1);

    let started = Instant::now();
    let response = gateway
        .handle("/dashboard", common::get("/dashboard"))
        .await;
    let elapsed = started.elapsed();

    assert!(elapsed >= timeout, "resolved early after {elapsed:?}");
    assert!(
        elapsed <= timeout + cleanup_interval,
        "resolved after {elapsed:?}"
    );
    assert_eq!(response.status, 504);
    assert_eq!(
        response.body,
        Some(json!("Service stats did not respond in time."))
    );
    assert!(correlation.pending().is_empty());

    shutdown.cancel();
    sweeper.await.expect("sweeper stops");
}

#[tokio::test]
async fn failed_publish_answers_bad_gateway() {
    let Harness {
        broker,
        correlation,
        gateway,
    } = harness();
    broker.fail_channel("input");

    let response = gateway
        .handle("/dashboard", common::get("/dashboard"))
        .await;

    assert_eq!(response.status, 502);
    let body = response.body.expect("error body");
    let message = body.as_str().expect("string body");
    assert!(
        message == "Service alerts is unreachable." || message == "Service stats is unreachable.",
        "{message}"
    );
    assert!(correlation.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn replies_settle_exactly_once() {
    let broker = MockBroker::new();
    let correlation = CorrelationService::new(
        Arc::new(broker),
        "responses.node-a",
        Duration::from_secs(2),
        Duration::from_secs(1),
    );

    let first = correlation.register("req-1", "stats", "input", None);
    let late = correlation.register("req-2", "stats", "input", None);
    let payload = reply(&json!("req-1"), "stats", json!({"ok": true})).to_string();

    assert_eq!(correlation.handle_reply(&payload), ReplyDisposition::Resolved);
    assert_eq!(correlation.handle_reply(&payload), ReplyDisposition::Discarded);
    assert_eq!(correlation.handle_reply("not json"), ReplyDisposition::Malformed);
    assert_eq!(
        correlation.handle_reply(&reply(&json!("unknown"), "stats", json!(1)).to_string()),
        ReplyDisposition::Discarded
    );

    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(correlation.sweep(Instant::now()), 1);
    assert_eq!(correlation.sweep(Instant::now()), 0);
    let late_reply = reply(&json!("req-2"), "stats", json!({"ok": true})).to_string();
    assert_eq!(
        correlation.handle_reply(&late_reply),
        ReplyDisposition::Discarded
    );

    assert!(matches!(
        first.await,
        Ok(retransmit::correlation::PendingOutcome::Reply(HttpResponse { body: Some(_), .. }))
    ));
    assert_eq!(
        late.await.expect("expiry is delivered"),
        retransmit::correlation::PendingOutcome::Expired
    );
}
