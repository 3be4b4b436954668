// Pass-through streaming of upstream response bodies

use std::time::{Duration, Instant};

use axum::{body::Body, BoxError};
use bytes::Bytes;
use futures::StreamExt;

/// Logs the end of a relayed stream. Dropping it also drops the upstream
/// response, which hands the connection back to the pool.
struct StreamGuard {
    target: String,
    started: Instant,
    chunks: usize,
    completed: bool,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        if self.completed {
            tracing::debug!(
                "Stream from {} finished: {} chunks in {:?}",
                self.target,
                self.chunks,
                elapsed
            );
        } else {
            tracing::info!(
                "Stream from {} closed early after {} chunks ({:?})",
                self.target,
                self.chunks,
                elapsed
            );
        }
    }
}

/// Body that yields the upstream bytes unchanged. The stream fails when the
/// upstream sends nothing for `idle_timeout`.
pub fn relay_body(response: reqwest::Response, target: &str, idle_timeout: Duration) -> Body {
    let mut guard = StreamGuard {
        target: target.to_string(),
        started: Instant::now(),
        chunks: 0,
        completed: false,
    };

    let stream = async_stream::stream! {
        let mut upstream = response.bytes_stream();
        loop {
            let chunk = match tokio::time::timeout(idle_timeout, upstream.next()).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Stream from {} stalled for {:?}, closing",
                        guard.target,
                        idle_timeout
                    );
                    yield Err::<Bytes, BoxError>(
                        format!("no data from {} within {:?}", guard.target, idle_timeout).into(),
                    );
                    return;
                }
            };
            match chunk {
                Ok(bytes) => {
                    guard.chunks += 1;
                    yield Ok(bytes);
                }
                Err(e) => {
                    tracing::warn!("Stream from {} failed: {}", guard.target, e);
                    yield Err(e.into());
                    return;
                }
            }
        }
        guard.completed = true;
    };

    Body::from_stream(stream)
}
