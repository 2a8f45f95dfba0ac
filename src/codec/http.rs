#![forbid(unsafe_code)]

use crate::config::gateway::{BodyEncoding, FieldMapping};
use crate::domain::{HttpCookie, HttpMethod};
use crate::error::{Context, Result};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, SET_COOKIE};
use reqwest::{Method, RequestBuilder, Url};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use std::time::Duration;

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Compression is negotiated per hop; upstream bodies are decoded as plain bytes.
const ENCODING_HEADERS: &[&str] = &["accept-encoding", "content-encoding"];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(name))
}

fn is_encoding_header(name: &str) -> bool {
    ENCODING_HEADERS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(name))
}

/// Whether an inbound header is copied onto the outbound request carrying `body`.
pub fn forwards_header(name: &str, body: &HttpBody<'_>) -> bool {
    if is_hop_by_hop(name) || is_encoding_header(name) {
        return false;
    }
    // Json and Form bodies are re-encoded and labelled by reqwest.
    !name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) || matches!(body, HttpBody::Text(_))
}

pub fn reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Patch => Method::PATCH,
    }
}

/// Appends the inbound query string to a configured service url.
pub fn resolve_url(base: &str, query: &BTreeMap<String, String>) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("invalid service url `{base}`"))?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query {
            pairs.append_pair(key, value);
        }
    }
    Ok(url)
}

pub enum HttpBody<'a> {
    Empty,
    Json(&'a JsonValue),
    Text(&'a str),
    Form(Vec<(String, String)>),
}

impl<'a> HttpBody<'a> {
    /// Object and array bodies are encoded per `encoding`; strings pass through verbatim.
    pub fn from_json(body: Option<&'a JsonValue>, encoding: BodyEncoding) -> Self {
        match body {
            None | Some(JsonValue::Null) => HttpBody::Empty,
            Some(JsonValue::String(text)) => HttpBody::Text(text),
            Some(JsonValue::Object(map)) if encoding == BodyEncoding::Form => {
                HttpBody::Form(form_pairs(map))
            }
            Some(other) => HttpBody::Json(other),
        }
    }
}

pub fn build_request(
    client: &reqwest::Client,
    method: Method,
    url: Url,
    headers: &[(String, String)],
    body: HttpBody<'_>,
    timeout: Option<Duration>,
) -> Result<RequestBuilder> {
    let mut request = client.request(method, url);

    for (name, value) in headers {
        if !forwards_header(name, &body) {
            continue;
        }
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| crate::err!("invalid header name `{name}`: {err}"))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|err| crate::err!("invalid header value for `{name}`: {err}"))?;
        request = request.header(header_name, header_value);
    }

    request = match body {
        HttpBody::Empty => request,
        HttpBody::Json(value) => request.json(value),
        HttpBody::Text(text) => request.body(text.to_string()),
        HttpBody::Form(pairs) => request.form(&pairs),
    };

    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    Ok(request)
}

/// Applies `exclude` then `include` to an object body. Other bodies pass through.
pub fn apply_field_mapping(body: &JsonValue, mapping: &FieldMapping) -> JsonValue {
    let JsonValue::Object(fields) = body else {
        return body.clone();
    };

    let mut remaining: JsonMap<String, JsonValue> = fields
        .iter()
        .filter(|(key, _)| !mapping.exclude.iter().any(|excluded| excluded == *key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    if let Some(include) = &mapping.include {
        remaining = include
            .iter()
            .filter_map(|(from, to)| remaining.get(from).map(|value| (to.clone(), value.clone())))
            .collect();
    }

    JsonValue::Object(remaining)
}

fn form_pairs(map: &JsonMap<String, JsonValue>) -> Vec<(String, String)> {
    map.iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let text = match value {
                JsonValue::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}

pub fn is_json_content_type(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|value| value.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

/// Upstream bodies are decoded as JSON when labelled so, and kept as text otherwise.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> Option<JsonValue> {
    if bytes.is_empty() {
        return None;
    }

    if is_json_content_type(content_type) {
        if let Ok(json) = serde_json::from_slice::<JsonValue>(bytes) {
            return Some(json);
        }
    }

    Some(JsonValue::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Collapses upstream headers into single values, dropping hop-by-hop, encoding and cookie
/// headers.
pub fn flatten_response_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name.as_str())
            || is_encoding_header(name.as_str())
            || name == SET_COOKIE
            || name == CONTENT_TYPE
        {
            continue;
        }
        let Ok(value) = value.to_str() else {
            continue;
        };
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    map
}

pub fn response_cookies(headers: &HeaderMap) -> Vec<HttpCookie> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(parse_set_cookie)
        .collect()
}

pub fn parse_set_cookie(raw: &str) -> Option<HttpCookie> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = HttpCookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        ..HttpCookie::default()
    };

    for attribute in parts {
        let (key, val) = match attribute.split_once('=') {
            Some((key, val)) => (key.trim(), Some(val.trim())),
            None => (attribute.trim(), None),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" => cookie.domain = val.map(str::to_string),
            "path" => cookie.path = val.map(str::to_string),
            "max-age" => cookie.max_age = val.and_then(|val| val.parse().ok()),
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            _ => {}
        }
    }

    Some(cookie)
}

pub fn encode_body(body: &JsonValue) -> Result<Bytes, serde_json::Error> {
    match body {
        JsonValue::Null => Ok(Bytes::new()),
        JsonValue::String(text) => Ok(Bytes::from(text.clone())),
        other => serde_json::to_vec(other).map(Bytes::from),
    }
}

/// Content type implied by a body when the response does not set one.
pub fn default_content_type(body: &JsonValue) -> Option<&'static str> {
    match body {
        JsonValue::Null => None,
        JsonValue::String(_) => Some("text/plain; charset=utf-8"),
        _ => Some("application/json"),
    }
}
