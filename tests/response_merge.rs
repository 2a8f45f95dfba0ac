#[path = "common/mod.rs"]
mod common;
#[path = "support/mod.rs"]
mod support;

use async_trait::async_trait;
use retransmit::domain::{HttpCookie, HttpMethod, HttpRequest, HttpResponse, MergedResponse};
use retransmit::gateway::{HttpGateway, ResponseCache, GENERIC_ERROR_BODY};
use retransmit::integration::{Connector, ConnectorKind, ConnectorRegistry};
use serde_json::json;
use std::sync::Arc;
use support::mocks::RecordingConnector;

fn gateway(yaml: &str, connector: RecordingConnector) -> HttpGateway {
    let connector: Arc<dyn Connector> = Arc::new(connector);
    HttpGateway::new(
        common::gateway_config(yaml),
        Arc::new(ConnectorRegistry::builtin(vec![connector])),
    )
}

const PROFILE_ROUTE: &str = r#"
http:
  routes:
    /profile:
      GET:
        services:
          account:
            type: http
            url: http://account.internal
          avatar:
            type: http
            url: http://avatar.internal
            merge_field: avatar
          tracking:
            type: http
            url: http://tracking.internal
            merge: false
"#;

#[tokio::test]
async fn merge_settings_shape_the_final_body() {
    let connector = RecordingConnector::new(ConnectorKind::Http)
        .respond(
            "account",
            HttpResponse {
                body: Some(json!({"name": "ada"})),
                cookies: vec![HttpCookie {
                    name: "session".to_string(),
                    value: "old".to_string(),
                    ..HttpCookie::default()
                }],
                ..HttpResponse::default()
            },
        )
        .respond(
            "avatar",
            HttpResponse {
                body: Some(json!({"url": "/a.png"})),
                cookies: vec![HttpCookie {
                    name: "session".to_string(),
                    value: "new".to_string(),
                    ..HttpCookie::default()
                }],
                ..HttpResponse::default()
            },
        )
        .respond("tracking", HttpResponse::with_status(202, "queued"));

    let response = gateway(PROFILE_ROUTE, connector)
        .handle("/profile", common::get("/profile"))
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(
        response.body,
        Some(json!({"name": "ada", "avatar": {"url": "/a.png"}}))
    );
    assert_eq!(response.cookies.len(), 1);
    assert_eq!(response.cookies[0].value, "new");
}

const PAIR_ROUTE: &str = r#"
http:
  routes:
    /pair:
      GET:
        services:
          alpha:
            type: http
            url: http://alpha.internal
          beta:
            type: http
            url: http://beta.internal
"#;

#[tokio::test]
async fn mismatched_body_kinds_produce_a_conflict_error() {
    let connector = RecordingConnector::new(ConnectorKind::Http)
        .respond("alpha", HttpResponse::with_status(200, json!({"ok": true})))
        .respond("beta", HttpResponse::with_status(200, json!(["x"])));

    let response = gateway(PAIR_ROUTE, connector)
        .handle("/pair", common::get("/pair"))
        .await;

    assert_eq!(response.status, 500);
    assert_eq!(
        response.body,
        Some(json!(
            "Cannot merge multiple types of content. beta is returned a array response while the current response is an object."
        ))
    );
}

#[tokio::test]
async fn first_error_status_wins() {
    let connector = RecordingConnector::new(ConnectorKind::Http)
        .respond("alpha", HttpResponse::with_status(404, json!({"missing": "alpha"})))
        .respond("beta", HttpResponse::with_status(503, json!({"down": "beta"})));

    let response = gateway(PAIR_ROUTE, connector)
        .handle("/pair", common::get("/pair"))
        .await;

    assert_eq!(response.status, 404);
    assert_eq!(
        response.body,
        Some(json!({"missing": "alpha", "down": "beta"}))
    );
}

#[tokio::test]
async fn generic_errors_hide_server_failures() {
    let yaml = format!("{PAIR_ROUTE}  generic_errors: true\n");
    let connector = RecordingConnector::new(ConnectorKind::Http)
        .respond("alpha", HttpResponse::with_status(200, json!({"ok": true})))
        .respond(
            "beta",
            HttpResponse::with_status(502, "Service beta is unreachable."),
        );

    let response = gateway(&yaml, connector)
        .handle("/pair", common::get("/pair"))
        .await;

    assert_eq!(response.status, 500);
    assert_eq!(response.body, Some(json!(GENERIC_ERROR_BODY)));
}

#[tokio::test]
async fn generic_errors_keep_client_errors() {
    let yaml = format!("{PAIR_ROUTE}  generic_errors: true\n");
    let connector = RecordingConnector::new(ConnectorKind::Http)
        .respond("alpha", HttpResponse::with_status(422, json!({"field": "email"})))
        .respond("beta", HttpResponse::with_status(200, json!({})));

    let response = gateway(&yaml, connector)
        .handle("/pair", common::get("/pair"))
        .await;

    assert_eq!(response.status, 422);
    assert_eq!(response.body, Some(json!({"field": "email"})));
}

struct StaleCache(MergedResponse);

#[async_trait]
impl ResponseCache for StaleCache {
    async fn get(
        &self,
        _route: &str,
        _method: HttpMethod,
        _request: &HttpRequest,
    ) -> Option<MergedResponse> {
        Some(self.0.clone())
    }

    async fn store(
        &self,
        _route: &str,
        _method: HttpMethod,
        _request: &HttpRequest,
        _response: &MergedResponse,
    ) {
    }
}

#[tokio::test]
async fn generic_errors_cover_cached_responses() {
    let yaml = format!("{PAIR_ROUTE}  generic_errors: true\n");
    let connector = Arc::new(RecordingConnector::new(ConnectorKind::Http));
    let cached = MergedResponse::new(503, json!({"detail": "db-7 connection pool exhausted"}));
    let gateway = HttpGateway::new(
        common::gateway_config(&yaml),
        Arc::new(ConnectorRegistry::builtin(vec![
            Arc::clone(&connector) as Arc<dyn Connector>
        ])),
    )
    .with_cache(Arc::new(StaleCache(cached)));

    let response = gateway.handle("/pair", common::get("/pair")).await;

    assert_eq!(response.status, 500);
    assert_eq!(response.body, Some(json!(GENERIC_ERROR_BODY)));
    assert!(connector.invocations().is_empty());
}
