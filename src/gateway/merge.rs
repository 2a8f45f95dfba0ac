use crate::config::gateway::HttpRouteConfig;
use crate::domain::{HttpCookie, MergedResponse};
use crate::integration::FetchedResponse;
use serde_json::{Map, Value as JsonValue};
use std::fmt::{Display, Formatter};

/// Body substituted for 5xx responses when generic errors are enabled.
pub const GENERIC_ERROR_BODY: &str = "Internal Server Error.";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BodyKind {
    Object,
    Array,
    String,
    Number,
    Boolean,
}

impl BodyKind {
    /// `None` for null bodies, which never take part in merging.
    pub fn of(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => None,
            JsonValue::Object(_) => Some(BodyKind::Object),
            JsonValue::Array(_) => Some(BodyKind::Array),
            JsonValue::String(_) => Some(BodyKind::String),
            JsonValue::Number(_) => Some(BodyKind::Number),
            JsonValue::Bool(_) => Some(BodyKind::Boolean),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BodyKind::Object => "object",
            BodyKind::Array => "array",
            BodyKind::String => "string",
            BodyKind::Number => "number",
            BodyKind::Boolean => "boolean",
        }
    }
}

impl Display for BodyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies the per-service merge settings of a route: services with `merge: false` are left out
/// and bodies of services with a `merge_field` are nested under that key.
pub fn prepare_for_merge(
    responses: Vec<FetchedResponse>,
    route: &HttpRouteConfig,
) -> Vec<FetchedResponse> {
    responses
        .into_iter()
        .filter_map(|mut fetched| {
            let Some(service) = route.services.get(&fetched.service) else {
                return Some(fetched);
            };
            if !service.merge() {
                return None;
            }
            if let Some(field) = service.merge_field() {
                let body = fetched.response.body.take().unwrap_or(JsonValue::Null);
                let mut wrapped = Map::new();
                wrapped.insert(field.to_string(), body);
                fetched.response.body = Some(JsonValue::Object(wrapped));
            }
            Some(fetched)
        })
        .collect()
}

/// Reduces service responses, in order, to the response returned to the client.
pub fn merge_responses(responses: &[FetchedResponse]) -> Option<MergedResponse> {
    if responses.is_empty() {
        return None;
    }

    let mut first_status: Option<u16> = None;
    let mut error_status: Option<u16> = None;
    let mut merged = MergedResponse {
        status: 200,
        redirect: None,
        content_type: None,
        headers: Default::default(),
        cookies: Vec::new(),
        body: None,
    };

    for fetched in responses {
        let response = &fetched.response;

        if let Some(status) = response.status {
            first_status.get_or_insert(status);
            if status >= 400 {
                error_status.get_or_insert(status);
            }
        }
        if response.redirect.is_some() {
            merged.redirect = response.redirect.clone();
        }
        if response.content_type.is_some() {
            merged.content_type = response.content_type.clone();
        }
        for (name, value) in &response.headers {
            merged.headers.insert(name.clone(), value.clone());
        }
        for cookie in &response.cookies {
            upsert_cookie(&mut merged.cookies, cookie);
        }

        let Some(body) = response.body.as_ref() else {
            continue;
        };
        let Some(incoming) = BodyKind::of(body) else {
            continue;
        };
        match merged.body.as_mut() {
            None => merged.body = Some(body.clone()),
            Some(current) => {
                let Some(current_kind) = BodyKind::of(current) else {
                    *current = body.clone();
                    continue;
                };
                if current_kind != incoming {
                    return Some(MergedResponse::new(
                        500,
                        format!(
                            "Cannot merge multiple types of content. {} is returned a {} response while the current response is an {}.",
                            fetched.service, incoming, current_kind
                        ),
                    ));
                }
                match (current, body) {
                    (JsonValue::Object(current), JsonValue::Object(next)) => {
                        for (key, value) in next {
                            current.insert(key.clone(), value.clone());
                        }
                    }
                    (current, next) => *current = next.clone(),
                }
            }
        }
    }

    merged.status = error_status.or(first_status).unwrap_or(200);
    Some(merged)
}

fn upsert_cookie(cookies: &mut Vec<HttpCookie>, cookie: &HttpCookie) {
    match cookies.iter_mut().find(|existing| existing.name == cookie.name) {
        Some(existing) => *existing = cookie.clone(),
        None => cookies.push(cookie.clone()),
    }
}

/// Replaces 5xx responses with a generic body when enabled.
pub fn apply_generic_errors(response: MergedResponse, enabled: bool) -> MergedResponse {
    if enabled && (500..600).contains(&response.status) {
        MergedResponse::new(500, GENERIC_ERROR_BODY)
    } else {
        response
    }
}
