#![forbid(unsafe_code)]
use crate::app_state::AppState;
use crate::codec::http::{default_content_type, encode_body, is_hop_by_hop, is_json_content_type};
use crate::domain::{new_request_id, HttpMethod, HttpRequest, MergedResponse};
use crate::error::Result;
use crate::transport::websocket::serve_connection;
use crate::transport::{TaskTransportRuntime, TransportKind, TransportRuntime};
use crate::websocket::ConnectionInfo;
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, FromRequestParts, RawPathParams, Request, WebSocketUpgrade};
use axum::http::header::{CONTENT_TYPE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DEFAULT_MAX_BODY_BYTES: usize = 1_048_576;

/// Listener serving every configured HTTP and WebSocket route.
pub struct HttpServerRuntime {
    inner: TaskTransportRuntime,
    addr: SocketAddr,
}

struct ServerState {
    app: AppState,
    shutdown: CancellationToken,
    max_body_bytes: usize,
}

impl HttpServerRuntime {
    pub fn build(state: AppState) -> Self {
        let addr = state.config.app.listen;
        let inner = TaskTransportRuntime::new(TransportKind::HttpIn, "http-in", move |shutdown| {
            let server = Arc::new(ServerState {
                app: state,
                shutdown: shutdown.clone(),
                max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            });
            vec![spawn_http_server(addr, server, shutdown)]
        });
        Self { inner, addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Router with one entry per configured path. HTTP and WebSocket routes may share a path; the
/// upgrade header decides which side handles a request.
pub fn build_router(state: AppState, shutdown: CancellationToken) -> Router {
    let server = Arc::new(ServerState {
        app: state,
        shutdown,
        max_body_bytes: DEFAULT_MAX_BODY_BYTES,
    });
    router_for(server)
}

fn router_for(server: Arc<ServerState>) -> Router {
    let paths: BTreeSet<String> = server
        .app
        .config
        .http
        .routes
        .keys()
        .chain(server.app.config.websocket.routes.keys())
        .cloned()
        .collect();

    let mut router = Router::new();
    for path in paths {
        let route_state = Arc::clone(&server);
        let route: Arc<str> = Arc::from(path.as_str());
        router = router.route(
            path.as_str(),
            any(move |request: Request| handle_request(Arc::clone(&route_state), Arc::clone(&route), request)),
        );
    }
    router.fallback(|| async { into_http_response(MergedResponse::not_found()) })
}

fn spawn_http_server(
    addr: SocketAddr,
    server: Arc<ServerState>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let router = router_for(server);
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!(target: "retransmit::http", address = %addr, "gateway listening");
                let server = axum::serve(
                    listener,
                    router.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(async move {
                    shutdown.cancelled().await;
                });

                if let Err(err) = server.await {
                    error!(target: "retransmit::http", address = %addr, %err, "gateway listener terminated with error");
                }
            }
            Err(err) => {
                error!(target: "retransmit::http", address = %addr, %err, "failed to bind gateway listener");
            }
        }
    })
}

#[async_trait]
impl TransportRuntime for HttpServerRuntime {
    fn kind(&self) -> TransportKind {
        self.inner.kind()
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn start(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.inner.start(shutdown).await
    }

    fn run(&mut self) -> crate::transport::TransportRun {
        self.inner.run()
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await
    }
}

async fn handle_request(server: Arc<ServerState>, route: Arc<str>, request: Request) -> Response {
    let (mut parts, body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let remote_address = forwarded_for(&parts.headers).or_else(|| peer.map(|addr| addr.ip().to_string()));
    let remote_port = peer.map(|addr| addr.port());

    let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &()).await.ok();
    if let Some(upgrade) = upgrade {
        if server.app.config.websocket_route(&route).is_some() {
            let info = ConnectionInfo {
                id: new_request_id(),
                route: route.to_string(),
                path: parts.uri.path().to_string(),
                remote_address,
                remote_port,
            };
            let websocket = server.app.websocket.clone();
            let shutdown = server.shutdown.clone();
            return upgrade.on_upgrade(move |socket| serve_connection(socket, websocket, info, shutdown));
        }
    }

    let Ok(method) = HttpMethod::from_str(parts.method.as_str()) else {
        return into_http_response(MergedResponse::new(405, "Method not allowed."));
    };

    let params: BTreeMap<String, String> = match RawPathParams::from_request_parts(&mut parts, &()).await {
        Ok(raw) => raw
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
        Err(_) => BTreeMap::new(),
    };

    let bytes = match axum::body::to_bytes(body, server.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => return into_http_response(MergedResponse::new(413, "Payload too large.")),
    };

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = match decode_request_body(&bytes, content_type.as_deref()) {
        Ok(body) => body,
        Err(err) => {
            warn!(target: "retransmit::http", route = %route, error = %err, "rejected malformed request body");
            return into_http_response(MergedResponse::new(400, "Malformed request body."));
        }
    };

    let request = HttpRequest {
        path: parts.uri.path().to_string(),
        method,
        params,
        query: parse_query(parts.uri.query()),
        body,
        headers: flatten_request_headers(&parts.headers),
        remote_address,
        remote_port,
    };

    into_http_response(server.app.http.handle(&route, request).await)
}

/// First address of `X-Forwarded-For`, if present.
pub fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn parse_query(query: Option<&str>) -> BTreeMap<String, String> {
    query
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect()
        })
        .unwrap_or_default()
}

/// Lowercased header names; repeated headers are joined with `, `.
pub fn flatten_request_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flattened: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        flattened
            .entry(name.as_str().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    flattened
}

/// JSON bodies are parsed, url-encoded forms become string objects, anything else is text.
pub fn decode_request_body(
    bytes: &Bytes,
    content_type: Option<&str>,
) -> std::result::Result<Option<JsonValue>, serde_json::Error> {
    if bytes.is_empty() {
        return Ok(None);
    }
    if is_json_content_type(content_type) {
        return serde_json::from_slice(bytes).map(Some);
    }
    let is_form = content_type
        .map(|value| value.to_ascii_lowercase().starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);
    if is_form {
        let fields: JsonMap<String, JsonValue> = url::form_urlencoded::parse(bytes)
            .map(|(key, value)| (key.into_owned(), JsonValue::String(value.into_owned())))
            .collect();
        return Ok(Some(JsonValue::Object(fields)));
    }
    Ok(Some(JsonValue::String(String::from_utf8_lossy(bytes).into_owned())))
}

/// Renders a merged response. A redirect always answers 302 with `Location`.
pub fn into_http_response(merged: MergedResponse) -> Response {
    if let Some(location) = merged.redirect.as_deref() {
        let mut response = StatusCode::FOUND.into_response();
        if let Ok(value) = HeaderValue::from_str(location) {
            response.headers_mut().insert(LOCATION, value);
        }
        append_cookies(response.headers_mut(), &merged);
        return response;
    }

    let status = StatusCode::from_u16(merged.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = merged.body.clone().unwrap_or(JsonValue::Null);
    let bytes = match encode_body(&body) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(target: "retransmit::http", error = %err, "failed to encode response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for (name, value) in &merged.headers {
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case("content-type") {
            continue;
        }
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
    let content_type = merged
        .content_type
        .as_deref()
        .or_else(|| default_content_type(&body));
    if let Some(value) = content_type.and_then(|value| HeaderValue::from_str(value).ok()) {
        headers.insert(CONTENT_TYPE, value);
    }
    append_cookies(headers, &merged);
    response
}

fn append_cookies(headers: &mut HeaderMap, merged: &MergedResponse) {
    for cookie in &merged.cookies {
        if let Ok(value) = HeaderValue::from_str(&cookie.to_header_value()) {
            headers.append(SET_COOKIE, value);
        }
    }
}
