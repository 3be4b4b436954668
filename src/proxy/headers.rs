// Outbound header construction per target

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

const ANTHROPIC_VERSION: HeaderName = HeaderName::from_static("anthropic-version");
const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

/// Client credentials and `anthropic-*` headers pass through untouched.
pub fn primary_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in inbound {
        if *name == header::AUTHORIZATION
            || *name == X_API_KEY
            || name.as_str().starts_with("anthropic-")
        {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Inbound auth is dropped; the configured key is sent instead.
pub fn secondary_headers(inbound: &HeaderMap, api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    match HeaderValue::from_str(api_key) {
        Ok(mut value) => {
            value.set_sensitive(true);
            headers.insert(X_API_KEY, value);
        }
        Err(_) => tracing::warn!("Configured API key is not a valid header value"),
    }
    let version = inbound
        .get(&ANTHROPIC_VERSION)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_ANTHROPIC_VERSION));
    headers.insert(ANTHROPIC_VERSION, version);
    headers
}
