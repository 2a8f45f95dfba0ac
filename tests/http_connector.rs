#[path = "common/mod.rs"]
mod common;

use httpmock::prelude::HttpMockRequest;
use httpmock::{Method::POST, MockServer};
use retransmit::connectors::HttpConnector;
use retransmit::domain::{HttpMethod, HttpRequest};
use retransmit::gateway::{HttpGateway, RollbackCoordinator};
use retransmit::integration::{Connector, ConnectorRegistry};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn gateway(yaml: &str) -> HttpGateway {
    let connector: Arc<dyn Connector> = Arc::new(HttpConnector::new().expect("http client"));
    HttpGateway::new(
        common::gateway_config(yaml),
        Arc::new(ConnectorRegistry::builtin(vec![connector])),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn forwards_mapped_body_and_query_then_returns_service_response() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/orders")
                .query_param("page", "2")
                .header("x-trace", "abc123")
                .json_body(json!({"customer": "c-1", "total": 30}));
            then.status(201)
                .header("content-type", "application/json")
                .header("x-upstream", "orders")
                .header("set-cookie", "cart=42; Path=/; HttpOnly")
                .json_body(json!({"order": "o-9"}));
        })
        .await;

    let yaml = format!(
        r#"
http:
  routes:
    /orders:
      POST:
        services:
          orders:
            type: http
            url: {base}/orders
            mapping:
              include:
                customer_id: customer
                total: total
              exclude: [card]
"#,
        base = server.base_url()
    );

    let mut request = HttpRequest::new(HttpMethod::Post, "/orders").with_body(json!({
        "customer_id": "c-1",
        "total": 30,
        "card": "4111"
    }));
    request.query.insert("page".to_string(), "2".to_string());
    request
        .headers
        .insert("x-trace".to_string(), "abc123".to_string());

    let response = gateway(&yaml).handle("/orders", request).await;

    mock.assert_async().await;
    assert_eq!(response.status, 201);
    assert_eq!(response.body, Some(json!({"order": "o-9"})));
    assert_eq!(response.content_type.as_deref(), Some("application/json"));
    assert_eq!(
        response.headers.get("x-upstream").map(String::as_str),
        Some("orders")
    );
    assert_eq!(response.cookies.len(), 1);
    assert_eq!(response.cookies[0].name, "cart");
    assert!(response.cookies[0].http_only);
}

fn header_values<'a>(request: &'a HttpMockRequest, name: &str) -> Vec<&'a str> {
    request
        .headers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter(|(header, _)| header.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn form_services_receive_a_form_content_type() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/signup")
                .body("a=1")
                .matches(|request| {
                    header_values(request, "content-type") == ["application/x-www-form-urlencoded"]
                });
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"ok": true}));
        })
        .await;

    let yaml = format!(
        r#"
http:
  routes:
    /signup:
      POST:
        services:
          signup:
            type: http
            url: {base}/signup
            encoding: form
"#,
        base = server.base_url()
    );

    let mut request = common::post("/signup", json!({"a": "1"}));
    request
        .headers
        .insert("content-type".to_string(), "application/json".to_string());

    let response = gateway(&yaml).handle("/signup", request).await;

    mock.assert_async().await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, Some(json!({"ok": true})));
}

#[tokio::test(flavor = "multi_thread")]
async fn compression_is_not_negotiated_upstream() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/quotes")
                .matches(|request| header_values(request, "accept-encoding").is_empty());
            then.status(200)
                .header("content-type", "application/json")
                .header("content-encoding", "identity")
                .header("x-upstream", "quotes")
                .json_body(json!({"a": 1}));
        })
        .await;

    let yaml = format!(
        r#"
http:
  routes:
    /quotes:
      POST:
        services:
          quotes:
            type: http
            url: {base}/quotes
"#,
        base = server.base_url()
    );

    let mut request = common::post("/quotes", json!({"symbol": "GOOG"}));
    request
        .headers
        .insert("accept-encoding".to_string(), "gzip, br".to_string());

    let response = gateway(&yaml).handle("/quotes", request).await;

    mock.assert_async().await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, Some(json!({"a": 1})));
    assert!(!response.headers.contains_key("content-encoding"));
    assert_eq!(
        response.headers.get("x-upstream").map(String::as_str),
        Some("quotes")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn redirects_are_passed_through_not_followed() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method("GET").path("/login");
            then.status(302).header("location", "https://sso.example.com/");
        })
        .await;

    let yaml = format!(
        r#"
http:
  routes:
    /login:
      GET:
        services:
          sso:
            type: http
            url: {base}/login
"#,
        base = server.base_url()
    );

    let response = gateway(&yaml)
        .handle("/login", common::get("/login"))
        .await;

    mock.assert_async().await;
    assert_eq!(response.status, 302);
    assert_eq!(response.redirect.as_deref(), Some("https://sso.example.com/"));
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_service_is_bad_gateway() {
    let response = gateway(
        r#"
http:
  routes:
    /down:
      GET:
        services:
          down:
            type: http
            url: http://127.0.0.1:1/down
"#,
    )
    .handle("/down", common::get("/down"))
    .await;

    assert_eq!(response.status, 502);
    assert_eq!(response.body, Some(json!("Service down is unreachable.")));
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_service_is_gateway_timeout() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method("GET").path("/slow");
            then.status(200).delay(Duration::from_millis(500)).body("late");
        })
        .await;

    let yaml = format!(
        r#"
http:
  routes:
    /slow:
      GET:
        services:
          slow:
            type: http
            url: {base}/slow
            timeout: 50ms
"#,
        base = server.base_url()
    );

    let response = gateway(&yaml).handle("/slow", common::get("/slow")).await;

    assert_eq!(response.status, 504);
    assert_eq!(response.body, Some(json!("Service slow timed out.")));
}

#[tokio::test(flavor = "multi_thread")]
async fn fire_and_forget_services_do_not_contribute() {
    let server = MockServer::start_async().await;
    let audit = server
        .mock_async(|when, then| {
            when.method(POST).path("/audit");
            then.status(500).body("audit unavailable");
        })
        .await;
    let users = server
        .mock_async(|when, then| {
            when.method(POST).path("/users");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"id": 7}));
        })
        .await;

    let yaml = format!(
        r#"
http:
  routes:
    /users:
      POST:
        services:
          audit:
            type: http
            url: {base}/audit
            await_response: false
          users:
            type: http
            url: {base}/users
"#,
        base = server.base_url()
    );

    let response = gateway(&yaml)
        .handle("/users", common::post("/users", json!({"name": "ada"})))
        .await;

    users.assert_async().await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, Some(json!({"id": 7})));

    for _ in 0..100 {
        if audit.hits_async().await == 1 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("fire-and-forget request never arrived");
}

#[tokio::test(flavor = "multi_thread")]
async fn rollback_calls_the_rollback_url() {
    let server = MockServer::start_async().await;
    let refund = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/refund")
                .json_body(json!({"amount": 12}));
            then.status(204);
        })
        .await;

    let config = common::gateway_config(&format!(
        r#"
http:
  routes:
    /charge:
      POST:
        services:
          billing:
            type: http
            url: {base}/charge
            rollback_url: {base}/refund
          receipts:
            type: http
            url: {base}/receipts
"#,
        base = server.base_url()
    ));
    let route = config
        .http_route("/charge", HttpMethod::Post)
        .expect("route declared");
    let connector: Arc<dyn Connector> = Arc::new(HttpConnector::new().expect("http client"));
    let coordinator = RollbackCoordinator::new(Arc::new(ConnectorRegistry::builtin(vec![connector])));

    for handle in coordinator.trigger(
        "req-1",
        &common::post("/charge", json!({"amount": 12})),
        "/charge",
        HttpMethod::Post,
        route,
    ) {
        handle.await.expect("rollback task");
    }

    refund.assert_async().await;
}
