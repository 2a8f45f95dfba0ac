#![allow(dead_code)]

use retransmit::config::GatewayConfig;
use retransmit::domain::{HttpMethod, HttpRequest};
use std::path::PathBuf;
use std::sync::Arc;

pub fn fixture_config_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/gateway.yaml")
}

pub fn load_gateway_config() -> GatewayConfig {
    GatewayConfig::from_path(fixture_config_path()).expect("gateway config should load")
}

pub fn gateway_config(yaml: &str) -> Arc<GatewayConfig> {
    Arc::new(GatewayConfig::from_yaml_str(yaml).expect("gateway config should parse"))
}

pub fn get(path: &str) -> HttpRequest {
    HttpRequest::new(HttpMethod::Get, path)
}

pub fn post(path: &str, body: serde_json::Value) -> HttpRequest {
    HttpRequest::new(HttpMethod::Post, path).with_body(body)
}
