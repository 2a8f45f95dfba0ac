use crate::domain::random_id;
use crate::transport::retry::RetrySettings;
use humantime::parse_duration;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Suffix of every response channel owned by this process.
    pub instance_id: String,
    pub listen: SocketAddr,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            instance_id: random_id(16),
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisConnectionConfig {
    pub url: String,
    pub reconnect: RetrySettings,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawAppSection {
    #[serde(default)]
    instance_id: Option<String>,
    #[serde(default)]
    listen: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawRedisSection {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    retry_initial: Option<RawDuration>,
    #[serde(default)]
    retry_max: Option<RawDuration>,
    #[serde(default)]
    retry_multiplier: Option<f64>,
}

/// Durations are written either as humantime strings (`250ms`, `5s`) or as integer milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawDuration {
    Millis(u64),
    Text(String),
}

pub(crate) fn parse_app_config(raw: Option<RawAppSection>, errors: &mut Vec<String>) -> AppConfig {
    let raw = raw.unwrap_or_default();
    let mut config = AppConfig::default();

    if let Some(instance_id) = raw.instance_id {
        let trimmed = instance_id.trim();
        if trimmed.is_empty() {
            errors.push("app.instance_id must be a non-empty string".to_string());
        } else if trimmed.contains(char::is_whitespace) {
            errors.push(format!(
                "app.instance_id must not contain whitespace (got `{trimmed}`)"
            ));
        } else {
            config.instance_id = trimmed.to_string();
        }
    }

    if let Some(listen) = raw.listen {
        match listen.trim().parse::<SocketAddr>() {
            Ok(addr) => config.listen = addr,
            Err(_) => errors.push(format!(
                "app.listen must be a socket address such as `{DEFAULT_LISTEN_ADDR}` (got `{listen}`)"
            )),
        }
    }

    config
}

pub(crate) fn parse_redis_section(
    raw: RawRedisSection,
    errors: &mut Vec<String>,
) -> Option<RedisConnectionConfig> {
    let url = match raw.url.map(|url| url.trim().to_string()) {
        Some(url) if !url.is_empty() => url,
        _ => {
            errors.push("redis.url is required when the redis section is present".to_string());
            return None;
        }
    };

    if let Err(err) = url::Url::parse(&url) {
        errors.push(format!("redis.url must be a valid url (got `{url}`: {err})"));
        return None;
    }

    let defaults = RetrySettings::default();
    let initial = raw
        .retry_initial
        .and_then(|value| parse_duration_value("redis.retry_initial", value, errors))
        .unwrap_or_else(|| defaults.initial());
    let max = raw
        .retry_max
        .and_then(|value| parse_duration_value("redis.retry_max", value, errors))
        .unwrap_or_else(|| defaults.max());
    let multiplier = raw.retry_multiplier.unwrap_or_else(|| defaults.multiplier());

    Some(RedisConnectionConfig {
        url,
        reconnect: RetrySettings::new(initial, max, multiplier),
    })
}

pub(crate) fn parse_duration_value(
    field_label: &str,
    raw: RawDuration,
    errors: &mut Vec<String>,
) -> Option<Duration> {
    let duration = match raw {
        RawDuration::Millis(millis) => Duration::from_millis(millis),
        RawDuration::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                errors.push(format!("{field_label} must be a non-empty duration string"));
                return None;
            }
            match parse_duration(trimmed) {
                Ok(duration) => duration,
                Err(_) => {
                    errors.push(format!(
                        "{field_label} must be a valid duration (got `{trimmed}`)"
                    ));
                    return None;
                }
            }
        }
    };

    ensure_positive_duration(duration, field_label, errors)
}

pub(crate) fn ensure_positive_duration(
    duration: Duration,
    label: &str,
    errors: &mut Vec<String>,
) -> Option<Duration> {
    if duration.is_zero() {
        errors.push(format!("{label} must be greater than zero"));
        None
    } else {
        Some(duration)
    }
}
