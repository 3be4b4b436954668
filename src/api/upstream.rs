// Upstream relay - forwards prepared requests and relays the responses

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use bytes::Bytes;

use super::streaming::relay_body;
use crate::config::LimitsConfig;
use crate::error::ProxyError;
use crate::proxy::{PreparedRequest, Target, COUNT_TOKENS_PATH, MESSAGES_PATH};
use crate::request_log::RequestLogger;

const JSON_CONTENT_TYPE: &str = "application/json";
const SSE_CONTENT_TYPE: &str = "text/event-stream";

/// One pooled client per upstream, shared by every in-flight request.
pub struct UpstreamRelay {
    primary: reqwest::Client,
    secondary: reqwest::Client,
    token_count_timeout: Duration,
    message_timeout: Duration,
    logger: Arc<dyn RequestLogger>,
}

impl UpstreamRelay {
    pub fn new(limits: &LimitsConfig, logger: Arc<dyn RequestLogger>) -> anyhow::Result<Self> {
        Ok(Self {
            primary: build_client(limits)?,
            secondary: build_client(limits)?,
            token_count_timeout: limits.token_count_timeout(),
            message_timeout: limits.message_timeout(),
            logger,
        })
    }

    /// Always buffered, with the short token-count timeout.
    pub async fn count_tokens(&self, request: PreparedRequest) -> Result<Response, ProxyError> {
        self.buffered(&request, COUNT_TOKENS_PATH, self.token_count_timeout)
            .await
    }

    /// Streams when the body asks for it, buffers otherwise.
    pub async fn messages(&self, request: PreparedRequest) -> Result<Response, ProxyError> {
        if request.is_streaming() {
            self.streaming(request).await
        } else {
            self.buffered(&request, MESSAGES_PATH, self.message_timeout)
                .await
        }
    }

    async fn buffered(
        &self,
        request: &PreparedRequest,
        path: &str,
        timeout: Duration,
    ) -> Result<Response, ProxyError> {
        let name = &request.target_name;
        let response = self
            .client(request.target)
            .post(endpoint(&request.base_url, path))
            .headers(request.headers.clone())
            .json(&request.body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(name, e))?;

        let status = response.status();
        let content_type = content_type_of(&response, JSON_CONTENT_TYPE);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(name, e))?;

        if status != StatusCode::OK {
            self.logger
                .log_error(name, status.as_u16(), &String::from_utf8_lossy(&bytes));
        }
        Ok(buffered_response(status, content_type, bytes))
    }

    /// The wait for response headers and every later read are each bounded by
    /// `message_timeout`; a stream that keeps sending may run indefinitely.
    async fn streaming(&self, request: PreparedRequest) -> Result<Response, ProxyError> {
        let name = &request.target_name;
        let send = self
            .client(request.target)
            .post(endpoint(&request.base_url, MESSAGES_PATH))
            .headers(request.headers.clone())
            .json(&request.body)
            .send();

        let response = match tokio::time::timeout(self.message_timeout, send).await {
            Ok(result) => result.map_err(|e| self.transport_error(name, e))?,
            Err(_) => {
                return Err(self.timeout_error(
                    name,
                    format!("no response within {:?}", self.message_timeout),
                ))
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            let content_type = content_type_of(&response, JSON_CONTENT_TYPE);
            let bytes = match tokio::time::timeout(self.message_timeout, response.bytes()).await {
                Ok(result) => result.map_err(|e| self.transport_error(name, e))?,
                Err(_) => {
                    return Err(self.timeout_error(
                        name,
                        format!("error body not received within {:?}", self.message_timeout),
                    ))
                }
            };
            self.logger
                .log_error(name, status.as_u16(), &String::from_utf8_lossy(&bytes));
            return Ok(buffered_response(status, content_type, bytes));
        }

        let content_type = content_type_of(&response, SSE_CONTENT_TYPE);
        let mut relayed = Response::new(relay_body(response, name, self.message_timeout));
        relayed
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type);
        Ok(relayed)
    }

    fn client(&self, target: Target) -> &reqwest::Client {
        match target {
            Target::Primary => &self.primary,
            Target::Secondary => &self.secondary,
        }
    }

    fn transport_error(&self, target: &str, error: reqwest::Error) -> ProxyError {
        if error.is_timeout() {
            return self.timeout_error(target, error.to_string());
        }
        let message = error.to_string();
        self.logger
            .log_error(target, StatusCode::BAD_GATEWAY.as_u16(), &message);
        ProxyError::UpstreamConnection {
            target: target.to_string(),
            message,
        }
    }

    fn timeout_error(&self, target: &str, message: String) -> ProxyError {
        self.logger
            .log_error(target, StatusCode::GATEWAY_TIMEOUT.as_u16(), "Upstream timeout");
        ProxyError::UpstreamTimeout {
            target: target.to_string(),
            message,
        }
    }
}

fn build_client(limits: &LimitsConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(limits.connect_timeout())
        .pool_max_idle_per_host(limits.max_keepalive)
        .pool_idle_timeout(limits.keepalive_expiry())
        .build()
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

fn content_type_of(response: &reqwest::Response, default: &'static str) -> HeaderValue {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(default))
}

fn buffered_response(status: StatusCode, content_type: HeaderValue, bytes: Bytes) -> Response {
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{spawn_fake_upstream, ErrorLog};
    use axum::http::HeaderMap;
    use serde_json::{json, Value};

    fn relay(logger: Arc<ErrorLog>, message_timeout: f64) -> UpstreamRelay {
        let limits = LimitsConfig {
            message_timeout,
            token_count_timeout: 1.0,
            ..LimitsConfig::default()
        };
        UpstreamRelay::new(&limits, logger).unwrap()
    }

    fn request(base_url: &str, body: Value) -> PreparedRequest {
        PreparedRequest {
            target: Target::Secondary,
            target_name: "z.ai".to_string(),
            base_url: base_url.to_string(),
            headers: HeaderMap::new(),
            body,
        }
    }

    async fn read(response: Response) -> (StatusCode, String, String) {
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_streaming_error_is_returned_buffered() {
        let upstream = spawn_fake_upstream().await;
        let log = Arc::new(ErrorLog::default());
        let response = relay(log.clone(), 5.0)
            .messages(request(&upstream.base_url, json!({"model": "bad", "stream": true})))
            .await
            .unwrap();

        let (status, content_type, body) = read(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(content_type, "application/json");
        assert!(body.contains("invalid_request_error"));
        assert_eq!(log.entries()[0].1, 400);
    }

    #[tokio::test]
    async fn test_streaming_success_passes_events_through() {
        let upstream = spawn_fake_upstream().await;
        let log = Arc::new(ErrorLog::default());
        let response = relay(log.clone(), 5.0)
            .messages(request(&upstream.base_url, json!({"model": "m", "stream": true})))
            .await
            .unwrap();

        let (status, content_type, body) = read(response).await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("text/event-stream"));
        assert!(body.starts_with("event: message_start"));
        assert!(body.trim_end().ends_with("data: {\"type\":\"message_stop\"}"));
        assert!(log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_buffered_and_count_tokens() {
        let upstream = spawn_fake_upstream().await;
        let relay = relay(Arc::new(ErrorLog::default()), 5.0);

        let response = relay
            .messages(request(&upstream.base_url, json!({"model": "m"})))
            .await
            .unwrap();
        let (status, _, body) = read(response).await;
        assert_eq!(status, StatusCode::OK);
        let echoed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(echoed["path"], "/v1/messages");
        assert_eq!(echoed["body"]["model"], "m");

        let response = relay
            .count_tokens(request(&format!("{}/", upstream.base_url), json!({"model": "m"})))
            .await
            .unwrap();
        let (status, _, body) = read(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"input_tokens":42}"#);
    }

    #[tokio::test]
    async fn test_slow_upstream_is_a_timeout() {
        let upstream = spawn_fake_upstream().await;
        let log = Arc::new(ErrorLog::default());
        let relay = relay(log.clone(), 0.2);

        let err = relay
            .messages(request(&upstream.base_url, json!({"model": "slow", "stream": true})))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);

        let err = relay
            .messages(request(&upstream.base_url, json!({"model": "slow"})))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(log.entries().len(), 2);
        assert!(log.entries().iter().all(|(target, status, _)| target == "z.ai" && *status == 504));
    }

    #[tokio::test]
    async fn test_stalled_stream_is_cut_off() {
        let upstream = spawn_fake_upstream().await;
        let response = relay(Arc::new(ErrorLog::default()), 0.3)
            .messages(request(&upstream.base_url, json!({"model": "stall", "stream": true})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let drained = tokio::time::timeout(
            Duration::from_secs(3),
            axum::body::to_bytes(response.into_body(), usize::MAX),
        )
        .await
        .expect("relay should give up on a stalled upstream");
        assert!(drained.is_err());
    }

    #[tokio::test]
    async fn test_stalled_error_body_is_a_timeout() {
        let upstream = spawn_fake_upstream().await;
        let log = Arc::new(ErrorLog::default());
        let err = tokio::time::timeout(
            Duration::from_secs(3),
            relay(log.clone(), 0.3).messages(request(
                &upstream.base_url,
                json!({"model": "stall-error", "stream": true}),
            )),
        )
        .await
        .expect("relay should give up on a stalled error body")
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(log.entries()[0].1, 504);
    }

    #[tokio::test]
    async fn test_refused_connection_is_bad_gateway() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let log = Arc::new(ErrorLog::default());
        let err = relay(log.clone(), 5.0)
            .messages(request(&format!("http://{}", addr), json!({"model": "m"})))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(err.to_string().starts_with("Connection error to z.ai"));
        assert_eq!(log.entries()[0].1, 502);
    }
}
