use super::app::{parse_duration_value, RawDuration};
use crate::domain::HttpMethod;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_PUBSUB_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
pub struct HttpConfig {
    pub generic_errors: bool,
    pub redis: Option<HttpRedisConfig>,
    pub routes: BTreeMap<String, BTreeMap<HttpMethod, HttpRouteConfig>>,
}

#[derive(Debug, Clone)]
pub struct HttpRedisConfig {
    /// Prefix of the response channel; the instance id is appended.
    pub response_channel: String,
    pub cleanup_interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct HttpRouteConfig {
    pub services: BTreeMap<String, ServiceConfig>,
    pub generic_errors: Option<bool>,
}

/// Backend service declaration; the `type` key selects the connector.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceConfig {
    Http(HttpServiceConfig),
    Redis(RedisServiceConfig),
}

impl ServiceConfig {
    pub fn stage(&self) -> Option<u32> {
        match self {
            ServiceConfig::Http(service) => service.stage,
            ServiceConfig::Redis(service) => service.stage,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self {
            ServiceConfig::Http(service) => service.timeout,
            ServiceConfig::Redis(service) => service.timeout,
        }
    }

    /// Whether this service's response takes part in merging.
    pub fn merge(&self) -> bool {
        match self {
            ServiceConfig::Http(service) => service.merge,
            ServiceConfig::Redis(service) => service.merge,
        }
    }

    pub fn merge_field(&self) -> Option<&str> {
        match self {
            ServiceConfig::Http(service) => service.merge_field.as_deref(),
            ServiceConfig::Redis(service) => service.merge_field.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpServiceConfig {
    pub url: String,
    pub timeout: Option<Duration>,
    pub await_response: bool,
    pub rollback_url: Option<String>,
    pub mapping: Option<FieldMapping>,
    pub encoding: BodyEncoding,
    pub stage: Option<u32>,
    pub merge: bool,
    pub merge_field: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedisServiceConfig {
    pub request_channel: String,
    pub num_request_channels: u32,
    pub timeout: Option<Duration>,
    pub stage: Option<u32>,
    pub merge: bool,
    pub merge_field: Option<String>,
}

/// Body field remapping applied before a request leaves for an HTTP service.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldMapping {
    /// When present only these fields are forwarded, renamed from key to value.
    #[serde(default)]
    pub include: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    #[default]
    Json,
    Form,
}

#[derive(Debug, Clone, Default)]
pub struct WebSocketConfig {
    pub redis: Option<WebSocketRedisConfig>,
    pub routes: BTreeMap<String, WebSocketRouteConfig>,
}

#[derive(Debug, Clone)]
pub struct WebSocketRedisConfig {
    pub response_channel: String,
}

#[derive(Debug, Clone, Default)]
pub struct WebSocketRouteConfig {
    pub services: BTreeMap<String, WebSocketServiceConfig>,
    pub save_last_request: bool,
    /// Re-sends each connection's last message on this interval. Implies `save_last_request`.
    pub polling_interval: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebSocketServiceConfig {
    Http(WebSocketHttpServiceConfig),
    Redis(WebSocketRedisServiceConfig),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketHttpServiceConfig {
    pub url: String,
    pub on_connect_url: Option<String>,
    pub on_disconnect_url: Option<String>,
    pub encoding: BodyEncoding,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketRedisServiceConfig {
    pub request_channel: String,
    pub num_request_channels: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawHttpSection {
    #[serde(default)]
    generic_errors: Option<bool>,
    #[serde(default)]
    redis: Option<RawHttpRedisSection>,
    #[serde(default)]
    routes: BTreeMap<String, BTreeMap<String, RawHttpRoute>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawHttpRedisSection {
    #[serde(default)]
    response_channel: Option<String>,
    #[serde(default)]
    cleanup_interval: Option<RawDuration>,
    #[serde(default)]
    timeout: Option<RawDuration>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawHttpRoute {
    #[serde(default)]
    services: BTreeMap<String, RawService>,
    #[serde(default)]
    generic_errors: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum RawService {
    Http(RawHttpService),
    Redis(RawRedisService),
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawHttpService {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    timeout: Option<RawDuration>,
    #[serde(default)]
    await_response: Option<bool>,
    #[serde(default)]
    rollback_url: Option<String>,
    #[serde(default)]
    mapping: Option<FieldMapping>,
    #[serde(default)]
    encoding: Option<BodyEncoding>,
    #[serde(default)]
    stage: Option<u32>,
    #[serde(default)]
    merge: Option<bool>,
    #[serde(default)]
    merge_field: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawRedisService {
    #[serde(default)]
    request_channel: Option<String>,
    #[serde(default)]
    num_request_channels: Option<u32>,
    #[serde(default)]
    timeout: Option<RawDuration>,
    #[serde(default)]
    stage: Option<u32>,
    #[serde(default)]
    merge: Option<bool>,
    #[serde(default)]
    merge_field: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawWebSocketSection {
    #[serde(default)]
    redis: Option<RawWebSocketRedisSection>,
    #[serde(default)]
    routes: BTreeMap<String, RawWebSocketRoute>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawWebSocketRedisSection {
    #[serde(default)]
    response_channel: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawWebSocketRoute {
    #[serde(default)]
    services: BTreeMap<String, RawWebSocketService>,
    #[serde(default)]
    save_last_request: Option<bool>,
    #[serde(default)]
    polling_interval: Option<RawDuration>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum RawWebSocketService {
    Http(RawWebSocketHttpService),
    Redis(RawWebSocketRedisService),
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawWebSocketHttpService {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    on_connect_url: Option<String>,
    #[serde(default)]
    on_disconnect_url: Option<String>,
    #[serde(default)]
    encoding: Option<BodyEncoding>,
    #[serde(default)]
    timeout: Option<RawDuration>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawWebSocketRedisService {
    #[serde(default)]
    request_channel: Option<String>,
    #[serde(default)]
    num_request_channels: Option<u32>,
}

pub(crate) fn parse_http_section(
    raw: Option<RawHttpSection>,
    errors: &mut Vec<String>,
) -> HttpConfig {
    let Some(raw) = raw else {
        return HttpConfig::default();
    };

    let redis = raw.redis.and_then(|section| {
        parse_response_channel("http.redis", section.response_channel, errors).map(
            |response_channel| HttpRedisConfig {
                response_channel,
                cleanup_interval: section
                    .cleanup_interval
                    .and_then(|value| {
                        parse_duration_value("http.redis.cleanup_interval", value, errors)
                    })
                    .unwrap_or(DEFAULT_CLEANUP_INTERVAL),
                timeout: section
                    .timeout
                    .and_then(|value| parse_duration_value("http.redis.timeout", value, errors))
                    .unwrap_or(DEFAULT_PUBSUB_TIMEOUT),
            },
        )
    });

    let mut routes = BTreeMap::new();
    for (path, methods) in raw.routes {
        validate_route_path("http", &path, errors);
        let mut parsed_methods = BTreeMap::new();
        for (method_key, raw_route) in methods {
            let method = match method_key.parse::<HttpMethod>() {
                Ok(method) => method,
                Err(err) => {
                    errors.push(format!("http route `{path}`: {err}"));
                    continue;
                }
            };
            let label = format!("http route `{method} {path}`");
            let route = parse_http_route(&label, raw_route, errors);
            parsed_methods.insert(method, route);
        }
        routes.insert(path, parsed_methods);
    }

    HttpConfig {
        generic_errors: raw.generic_errors.unwrap_or(false),
        redis,
        routes,
    }
}

fn parse_http_route(label: &str, raw: RawHttpRoute, errors: &mut Vec<String>) -> HttpRouteConfig {
    if raw.services.is_empty() {
        errors.push(format!("{label} must declare at least one service"));
    }

    let mut services = BTreeMap::new();
    for (name, raw_service) in raw.services {
        let service_label = format!("{label} service `{name}`");
        let parsed = match raw_service {
            RawService::Http(service) => {
                parse_http_service(&service_label, service, errors).map(ServiceConfig::Http)
            }
            RawService::Redis(service) => {
                parse_redis_service(&service_label, service, errors).map(ServiceConfig::Redis)
            }
        };
        if let Some(service) = parsed {
            services.insert(name, service);
        }
    }

    HttpRouteConfig {
        services,
        generic_errors: raw.generic_errors,
    }
}

fn parse_http_service(
    label: &str,
    raw: RawHttpService,
    errors: &mut Vec<String>,
) -> Option<HttpServiceConfig> {
    let url = required_url(label, "url", raw.url, errors)?;
    let rollback_url = match raw.rollback_url {
        Some(value) => Some(required_url(label, "rollback_url", Some(value), errors)?),
        None => None,
    };
    let timeout = raw
        .timeout
        .and_then(|value| parse_duration_value(&format!("{label} timeout"), value, errors));
    if let Some(mapping) = &raw.mapping {
        if let Some(include) = &mapping.include {
            if include.values().any(|target| target.trim().is_empty()) {
                errors.push(format!(
                    "{label} mapping.include targets must be non-empty field names"
                ));
            }
        }
    }

    Some(HttpServiceConfig {
        url,
        timeout,
        await_response: raw.await_response.unwrap_or(true),
        rollback_url,
        mapping: raw.mapping,
        encoding: raw.encoding.unwrap_or_default(),
        stage: raw.stage,
        merge: raw.merge.unwrap_or(true),
        merge_field: non_empty(raw.merge_field),
    })
}

fn parse_redis_service(
    label: &str,
    raw: RawRedisService,
    errors: &mut Vec<String>,
) -> Option<RedisServiceConfig> {
    let request_channel = required_channel(label, raw.request_channel, errors)?;
    let num_request_channels = parse_channel_count(label, raw.num_request_channels, errors)?;
    let timeout = raw
        .timeout
        .and_then(|value| parse_duration_value(&format!("{label} timeout"), value, errors));

    Some(RedisServiceConfig {
        request_channel,
        num_request_channels,
        timeout,
        stage: raw.stage,
        merge: raw.merge.unwrap_or(true),
        merge_field: non_empty(raw.merge_field),
    })
}

pub(crate) fn parse_websocket_section(
    raw: Option<RawWebSocketSection>,
    errors: &mut Vec<String>,
) -> WebSocketConfig {
    let Some(raw) = raw else {
        return WebSocketConfig::default();
    };

    let redis = raw.redis.and_then(|section| {
        parse_response_channel("websocket.redis", section.response_channel, errors)
            .map(|response_channel| WebSocketRedisConfig { response_channel })
    });

    let mut routes = BTreeMap::new();
    for (path, raw_route) in raw.routes {
        validate_route_path("websocket", &path, errors);
        let label = format!("websocket route `{path}`");
        if raw_route.services.is_empty() {
            errors.push(format!("{label} must declare at least one service"));
        }

        let mut services = BTreeMap::new();
        for (name, raw_service) in raw_route.services {
            let service_label = format!("{label} service `{name}`");
            let parsed = match raw_service {
                RawWebSocketService::Http(service) => {
                    let url = required_url(&service_label, "url", service.url, errors);
                    let on_connect_url = service.on_connect_url.and_then(|value| {
                        required_url(&service_label, "on_connect_url", Some(value), errors)
                    });
                    let on_disconnect_url = service.on_disconnect_url.and_then(|value| {
                        required_url(&service_label, "on_disconnect_url", Some(value), errors)
                    });
                    let timeout = service.timeout.and_then(|value| {
                        parse_duration_value(&format!("{service_label} timeout"), value, errors)
                    });
                    url.map(|url| {
                        WebSocketServiceConfig::Http(WebSocketHttpServiceConfig {
                            url,
                            on_connect_url,
                            on_disconnect_url,
                            encoding: service.encoding.unwrap_or_default(),
                            timeout,
                        })
                    })
                }
                RawWebSocketService::Redis(service) => {
                    let channel = required_channel(&service_label, service.request_channel, errors);
                    let count =
                        parse_channel_count(&service_label, service.num_request_channels, errors);
                    channel.zip(count).map(|(request_channel, num_request_channels)| {
                        WebSocketServiceConfig::Redis(WebSocketRedisServiceConfig {
                            request_channel,
                            num_request_channels,
                        })
                    })
                }
            };
            if let Some(service) = parsed {
                services.insert(name, service);
            }
        }

        let polling_interval = raw_route.polling_interval.and_then(|value| {
            parse_duration_value(&format!("{label} polling_interval"), value, errors)
        });
        if polling_interval.is_some() && raw_route.save_last_request == Some(false) {
            errors.push(format!("{label} polling_interval requires save_last_request"));
        }

        routes.insert(
            path,
            WebSocketRouteConfig {
                services,
                save_last_request: raw_route.save_last_request.unwrap_or(false)
                    || polling_interval.is_some(),
                polling_interval,
            },
        );
    }

    WebSocketConfig { redis, routes }
}

pub(crate) fn validate_redis_requirements(
    has_connection: bool,
    http: &HttpConfig,
    websocket: &WebSocketConfig,
    errors: &mut Vec<String>,
) {
    let http_uses_redis = http.routes.values().any(|methods| {
        methods.values().any(|route| {
            route
                .services
                .values()
                .any(|service| matches!(service, ServiceConfig::Redis(_)))
        })
    });
    let websocket_uses_redis = websocket.routes.values().any(|route| {
        route
            .services
            .values()
            .any(|service| matches!(service, WebSocketServiceConfig::Redis(_)))
    });

    if http_uses_redis && http.redis.is_none() {
        errors.push(
            "http.redis.response_channel is required when an http route uses a redis service"
                .to_string(),
        );
    }
    if websocket_uses_redis && websocket.redis.is_none() {
        errors.push(
            "websocket.redis.response_channel is required when a websocket route uses a redis service"
                .to_string(),
        );
    }
    if (http_uses_redis || websocket_uses_redis) && !has_connection {
        errors.push("redis.url is required when any route uses a redis service".to_string());
    }
}

fn validate_route_path(section: &str, path: &str, errors: &mut Vec<String>) {
    if !path.starts_with('/') {
        errors.push(format!(
            "{section} route `{path}` must be an absolute path starting with `/`"
        ));
    }
}

fn parse_response_channel(
    section: &str,
    raw: Option<String>,
    errors: &mut Vec<String>,
) -> Option<String> {
    match raw.map(|value| value.trim().to_string()) {
        Some(value) if !value.is_empty() => Some(value),
        _ => {
            errors.push(format!("{section}.response_channel must be a non-empty string"));
            None
        }
    }
}

fn required_url(
    label: &str,
    field: &str,
    raw: Option<String>,
    errors: &mut Vec<String>,
) -> Option<String> {
    let Some(value) = raw.map(|value| value.trim().to_string()) else {
        errors.push(format!("{label} requires `{field}`"));
        return None;
    };
    match url::Url::parse(&value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Some(value),
        Ok(parsed) => {
            errors.push(format!(
                "{label} {field} must use http or https (got scheme `{}`)",
                parsed.scheme()
            ));
            None
        }
        Err(err) => {
            errors.push(format!("{label} {field} must be a valid url (got `{value}`: {err})"));
            None
        }
    }
}

fn required_channel(label: &str, raw: Option<String>, errors: &mut Vec<String>) -> Option<String> {
    match raw.map(|value| value.trim().to_string()) {
        Some(value) if !value.is_empty() => Some(value),
        _ => {
            errors.push(format!("{label} requires a non-empty `request_channel`"));
            None
        }
    }
}

fn parse_channel_count(label: &str, raw: Option<u32>, errors: &mut Vec<String>) -> Option<u32> {
    match raw {
        None => Some(1),
        Some(0) => {
            errors.push(format!("{label} num_request_channels must be at least 1"));
            None
        }
        Some(count) => Some(count),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
