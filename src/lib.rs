#![allow(clippy::result_large_err)]

pub mod app;
pub mod app_state;
pub mod codec;
pub mod config;
pub mod connectors;
pub mod correlation;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod integration;
pub mod logging;
pub mod metrics;
pub mod telemetry;
pub mod transport;
pub mod websocket;
