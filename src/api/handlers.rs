// Inbound request handlers

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode},
    response::Response,
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde_json::Value;

use super::AppState;
use crate::error::ProxyError;
use crate::proxy::{COUNT_TOKENS_PATH, MESSAGES_PATH};

/// POST /v1/messages
pub async fn messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ProxyError> {
    let payload = read_json(&state, MESSAGES_PATH, &headers, body).await?;
    let prepared = state.routing.prepare_messages(&payload, &headers);
    state.upstream.messages(prepared).await
}

/// POST /v1/messages/count_tokens
pub async fn count_tokens(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ProxyError> {
    let payload = read_json(&state, COUNT_TOKENS_PATH, &headers, body).await?;
    let prepared = state.routing.prepare_count_tokens(&payload, &headers);
    state.upstream.count_tokens(prepared).await
}

/// POST /api/event_logging/batch - client telemetry, dropped.
pub async fn event_logging_batch(body: Body) -> StatusCode {
    let _ = body.collect().await;
    StatusCode::NO_CONTENT
}

/// Reads the whole body within the size limit and parses it as JSON.
async fn read_json(
    state: &AppState,
    path: &str,
    headers: &HeaderMap,
    body: Body,
) -> Result<Value, ProxyError> {
    let limit = state.config.limits.max_body_size;
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(ProxyError::RequestTooLarge);
    }

    let bytes = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return Err(ProxyError::RequestTooLarge)
        }
        Err(e) => return Err(ProxyError::InvalidBody(format!("Failed to read body: {}", e))),
    };

    let text = std::str::from_utf8(&bytes)
        .map_err(|e| ProxyError::InvalidBody(format!("Invalid UTF-8 encoding: {}", e)))?;

    match serde_json::from_str::<Value>(text) {
        Ok(payload) => {
            state
                .logger
                .log_incoming(Method::POST.as_str(), path, headers, &payload);
            Ok(payload)
        }
        Err(e) => {
            state.logger.log_incoming(
                Method::POST.as_str(),
                path,
                headers,
                &Value::String(text.to_string()),
            );
            Err(ProxyError::InvalidBody(format!("Invalid JSON: {}", e)))
        }
    }
}
