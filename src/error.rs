// Errors surfaced to the client as JSON envelopes

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Request body too large")]
    RequestTooLarge,

    #[error("{0}")]
    InvalidBody(String),

    #[error("Timeout connecting to {target}: {message}")]
    UpstreamTimeout { target: String, message: String },

    #[error("Connection error to {target}: {message}")]
    UpstreamConnection { target: String, message: String },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::UpstreamConnection { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
