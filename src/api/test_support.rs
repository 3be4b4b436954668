// In-process fake upstream and recording logger for HTTP tests

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::{json, Value};

use crate::request_log::RequestLogger;

pub const SSE_BODY: &str = "event: message_start\ndata: {\"type\":\"message_start\"}\n\n\
event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"hi\"}}\n\n\
event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n";

pub struct FakeUpstream {
    pub base_url: String,
    pub hits: Arc<AtomicUsize>,
}

impl FakeUpstream {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Anthropic-shaped server on an ephemeral port. The request `model` selects
/// the behaviour: `bad` answers 400, `slow` stalls for two seconds, `stall`
/// and `stall-error` stop sending mid-body; anything else echoes the request
/// (or streams SSE when `stream` is set).
pub async fn spawn_fake_upstream() -> FakeUpstream {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/v1/messages", post(messages))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .with_state(hits.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeUpstream {
        base_url: format!("http://{}", addr),
        hits,
    }
}

async fn messages(
    State(hits): State<Arc<AtomicUsize>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    match body["model"].as_str() {
        Some("bad") => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "type": "error",
                "error": {"type": "invalid_request_error", "message": "bad model"}
            })),
        )
            .into_response(),
        Some("stall") => stalled(StatusCode::OK, "text/event-stream", "event: ping\ndata: {}\n\n"),
        Some("stall-error") => stalled(
            StatusCode::BAD_REQUEST,
            "application/json",
            "{\"type\": \"error\",",
        ),
        Some("slow") => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Json(json!({})).into_response()
        }
        _ if body["stream"] == true => {
            ([(header::CONTENT_TYPE, "text/event-stream")], SSE_BODY).into_response()
        }
        _ => Json(json!({
            "path": "/v1/messages",
            "body": body,
            "headers": echo_headers(&headers),
        }))
        .into_response(),
    }
}

/// Sends the headers and `first` chunk, then never finishes the body.
fn stalled(status: StatusCode, content_type: &'static str, first: &'static str) -> Response {
    let chunks = stream::once(async move { Ok::<_, Infallible>(Bytes::from_static(first.as_bytes())) })
        .chain(stream::pending());
    (status, [(header::CONTENT_TYPE, content_type)], Body::from_stream(chunks)).into_response()
}

async fn count_tokens(State(hits): State<Arc<AtomicUsize>>) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({"input_tokens": 42}))
}

fn echo_headers(headers: &HeaderMap) -> Value {
    let mut out = serde_json::Map::new();
    for name in ["x-api-key", "authorization", "anthropic-version", "anthropic-beta"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            out.insert(name.to_string(), Value::String(value.to_string()));
        }
    }
    Value::Object(out)
}

/// Logger keeping only `log_error` calls.
#[derive(Default)]
pub struct ErrorLog {
    entries: Mutex<Vec<(String, u16, String)>>,
}

impl ErrorLog {
    pub fn entries(&self) -> Vec<(String, u16, String)> {
        self.entries.lock().unwrap().clone()
    }
}

impl RequestLogger for ErrorLog {
    fn log_incoming(&self, _: &str, _: &str, _: &HeaderMap, _: &Value) {}
    fn log_primary(&self, _: &str, _: &Value, _: bool, _: &str) {}
    fn log_secondary(&self, _: &str, _: &Value, _: &HeaderMap, _: &str, _: Option<&Value>) {}
    fn log_error(&self, target: &str, status: u16, message: &str) {
        self.entries
            .lock()
            .unwrap()
            .push((target.to_string(), status, message.to_string()));
    }
}
