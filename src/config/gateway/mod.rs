mod app;
mod routes;

use serde::de::Error as _;
use serde::Deserialize;
use serde_yaml::{self, Value as YamlValue};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

pub use app::{AppConfig, RedisConnectionConfig, DEFAULT_LISTEN_ADDR};
pub use routes::{
    BodyEncoding, FieldMapping, HttpConfig, HttpRedisConfig, HttpRouteConfig,
    HttpServiceConfig, RedisServiceConfig, ServiceConfig, WebSocketConfig,
    WebSocketHttpServiceConfig, WebSocketRedisConfig, WebSocketRedisServiceConfig,
    WebSocketRouteConfig, WebSocketServiceConfig, DEFAULT_CLEANUP_INTERVAL,
    DEFAULT_PUBSUB_TIMEOUT,
};

/// Validated gateway definition: routes, their services and the shared pub/sub settings.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub app: AppConfig,
    pub redis: Option<RedisConnectionConfig>,
    pub http: HttpConfig,
    pub websocket: WebSocketConfig,
}

const TOP_LEVEL_FIELDS: &str = "app, redis, http, websocket";

impl GatewayConfig {
    pub fn from_reader(mut reader: impl Read) -> Result<Self, GatewayConfigError> {
        let mut contents = String::new();
        reader.read_to_string(&mut contents)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, GatewayConfigError> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, GatewayConfigError> {
        let mut documents = serde_yaml::Deserializer::from_str(contents);
        let mut parsed = None;
        let mut extra_errors = Vec::new();

        for (index, document) in documents.by_ref().enumerate() {
            if index == 0 {
                parsed = Some(RawGatewayFile::deserialize(document)?);
            } else {
                let _: YamlValue = YamlValue::deserialize(document)?;
                extra_errors
                    .push("error[root]: multiple YAML documents are not supported".to_string());
                break;
            }
        }

        let Some(raw) = parsed else {
            let err =
                serde_yaml::Error::custom("gateway config must contain exactly one YAML document");
            return Err(GatewayConfigError::Parse(err));
        };

        Self::from_raw(raw, extra_errors).map_err(GatewayConfigError::Invalid)
    }

    fn from_raw(
        raw: RawGatewayFile,
        mut errors: Vec<String>,
    ) -> Result<Self, GatewayValidationError> {
        let RawGatewayFile {
            app: raw_app,
            redis: raw_redis,
            http: raw_http,
            websocket: raw_websocket,
            extra_fields,
        } = raw;

        for key in extra_fields.keys() {
            errors.push(format!(
                "error[root]: unknown top-level key \"{key}\" (expected one of {TOP_LEVEL_FIELDS})"
            ));
        }

        let app = app::parse_app_config(raw_app, &mut errors);
        let redis = raw_redis.and_then(|section| app::parse_redis_section(section, &mut errors));
        let http = routes::parse_http_section(raw_http, &mut errors);
        let websocket = routes::parse_websocket_section(raw_websocket, &mut errors);

        routes::validate_redis_requirements(redis.is_some(), &http, &websocket, &mut errors);

        if errors.is_empty() {
            Ok(Self {
                app,
                redis,
                http,
                websocket,
            })
        } else {
            Err(GatewayValidationError::new(errors))
        }
    }

    /// Route configuration for an exact path and method, if one is declared.
    pub fn http_route(
        &self,
        path: &str,
        method: crate::domain::HttpMethod,
    ) -> Option<&HttpRouteConfig> {
        self.http.routes.get(path)?.get(&method)
    }

    pub fn websocket_route(&self, path: &str) -> Option<&WebSocketRouteConfig> {
        self.websocket.routes.get(path)
    }

    /// Effective `generic_errors` flag: the route setting overrides the gateway setting.
    pub fn generic_errors_for(&self, route: Option<&HttpRouteConfig>) -> bool {
        route
            .and_then(|route| route.generic_errors)
            .unwrap_or(self.http.generic_errors)
    }

    /// Channel on which this instance receives pub/sub replies for HTTP requests.
    pub fn http_response_channel(&self) -> Option<String> {
        self.http
            .redis
            .as_ref()
            .map(|redis| format!("{}.{}", redis.response_channel, self.app.instance_id))
    }

    /// Channel on which this instance receives pub/sub replies for WebSocket connections.
    pub fn websocket_response_channel(&self) -> Option<String> {
        self.websocket
            .redis
            .as_ref()
            .map(|redis| format!("{}.{}", redis.response_channel, self.app.instance_id))
    }
}

#[derive(Debug, Deserialize)]
struct RawGatewayFile {
    #[serde(default)]
    app: Option<app::RawAppSection>,
    #[serde(default)]
    redis: Option<app::RawRedisSection>,
    #[serde(default)]
    http: Option<routes::RawHttpSection>,
    #[serde(default)]
    websocket: Option<routes::RawWebSocketSection>,
    #[serde(default)]
    #[serde(flatten)]
    extra_fields: BTreeMap<String, YamlValue>,
}

#[derive(Debug, Error)]
pub enum GatewayConfigError {
    #[error("failed to read gateway config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse gateway config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error(transparent)]
    Invalid(GatewayValidationError),
}

#[derive(Debug, Error)]
#[error("gateway config validation failed:\n{rendered}")]
pub struct GatewayValidationError {
    messages: Vec<String>,
    rendered: String,
}

impl GatewayValidationError {
    pub fn new(messages: Vec<String>) -> Self {
        let rendered = messages
            .iter()
            .map(|msg| format!("- {msg}"))
            .collect::<Vec<_>>()
            .join("\n");
        Self { messages, rendered }
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}
