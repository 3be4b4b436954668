// Request logging - tracing lines plus JSON records written by a background task

use std::path::{Path, PathBuf};

use axum::http::HeaderMap;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot};

const INCOMING_DIR: &str = "incoming";
const PRIMARY_DIR: &str = "primary";
const SECONDARY_DIR: &str = "secondary";
const ERROR_LOG_FILE: &str = "proxy.log";

const SESSION_MARKER: &str = "session_";
static SAFE_SESSION_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("session id pattern"));

/// Observation hooks called by the request pipeline. Implementations must not
/// block the caller.
pub trait RequestLogger: Send + Sync {
    fn log_incoming(&self, method: &str, path: &str, headers: &HeaderMap, body: &Value);

    fn log_primary(&self, model: &str, body: &Value, streaming: bool, path: &str);

    /// `original` is the body as received, used to find the session.
    fn log_secondary(
        &self,
        model: &str,
        body: &Value,
        headers: &HeaderMap,
        path: &str,
        original: Option<&Value>,
    );

    fn log_error(&self, target: &str, status: u16, message: &str);
}

/// Logger that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl RequestLogger for NoopLogger {
    fn log_incoming(&self, _: &str, _: &str, _: &HeaderMap, _: &Value) {}
    fn log_primary(&self, _: &str, _: &Value, _: bool, _: &str) {}
    fn log_secondary(&self, _: &str, _: &Value, _: &HeaderMap, _: &str, _: Option<&Value>) {}
    fn log_error(&self, _: &str, _: u16, _: &str) {}
}

enum LogRecord {
    Json {
        folder: PathBuf,
        payload: Value,
        keep_latest_only: bool,
    },
    Line { file: PathBuf, line: String },
    Flush(oneshot::Sender<()>),
}

/// Writes one pretty JSON file per request under the log directory.
///
/// Records go over an unbounded channel to a single writer task, so logging
/// never waits on disk.
#[derive(Clone)]
pub struct DiskLogger {
    root: PathBuf,
    primary_name: String,
    secondary_name: String,
    tx: mpsc::UnboundedSender<LogRecord>,
}

impl DiskLogger {
    /// Spawns the writer task; must be called inside a tokio runtime.
    pub fn start(root: impl Into<PathBuf>, primary_name: &str, secondary_name: &str) -> Self {
        let root = root.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(rx));
        Self {
            root,
            primary_name: primary_name.to_string(),
            secondary_name: secondary_name.to_string(),
            tx,
        }
    }

    /// Removes logs left by a previous run.
    pub fn clear(root: &Path) -> std::io::Result<()> {
        if root.exists() {
            std::fs::remove_dir_all(root)?;
        }
        Ok(())
    }

    /// Waits until every record sent so far is on disk.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(LogRecord::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    fn folder(&self, kind: &str, session: Option<&str>) -> PathBuf {
        let folder = self.root.join(kind);
        match session {
            Some(id) => folder.join(id),
            None => folder,
        }
    }

    fn send(&self, record: LogRecord) {
        if self.tx.send(record).is_err() {
            tracing::warn!("Log writer is gone, dropping record");
        }
    }
}

impl RequestLogger for DiskLogger {
    fn log_incoming(&self, method: &str, path: &str, headers: &HeaderMap, body: &Value) {
        let payload = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "method": method,
            "path": path,
            "headers": redact_headers(headers),
            "body": body,
        });
        self.send(LogRecord::Json {
            folder: self.folder(INCOMING_DIR, extract_session_id(body).as_deref()),
            payload,
            keep_latest_only: false,
        });
    }

    fn log_primary(&self, model: &str, body: &Value, streaming: bool, path: &str) {
        let (prompt, tools) = request_summary(body);
        tracing::info!(
            "-> {} model={} stream={} tools={} prompt={:?}",
            self.primary_name,
            model,
            streaming,
            tools.len(),
            prompt
        );
        let payload = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "target": self.primary_name,
            "model": model,
            "streaming": streaming,
            "path": path,
            "body": body,
        });
        self.send(LogRecord::Json {
            folder: self.folder(PRIMARY_DIR, extract_session_id(body).as_deref()),
            payload,
            keep_latest_only: true,
        });
    }

    fn log_secondary(
        &self,
        model: &str,
        body: &Value,
        headers: &HeaderMap,
        path: &str,
        original: Option<&Value>,
    ) {
        let (prompt, tools) = request_summary(body);
        tracing::info!(
            "-> {} model={} tools=[{}] prompt={:?}",
            self.secondary_name,
            model,
            tools.join(", "),
            prompt
        );
        let payload = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "target": self.secondary_name,
            "model": model,
            "path": path,
            "headers": redact_headers(headers),
            "body": body,
        });
        let session = extract_session_id(original.unwrap_or(body));
        self.send(LogRecord::Json {
            folder: self.folder(SECONDARY_DIR, session.as_deref()),
            payload,
            keep_latest_only: false,
        });
    }

    fn log_error(&self, target: &str, status: u16, message: &str) {
        tracing::error!("{} returned {}: {}", target, status, message);
        let line = format!(
            "[{}] ERROR: {} status={} {}\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            target,
            status,
            message.replace('\n', " ")
        );
        self.send(LogRecord::Line {
            file: self.root.join(ERROR_LOG_FILE),
            line,
        });
    }
}

async fn run_writer(mut rx: mpsc::UnboundedReceiver<LogRecord>) {
    while let Some(record) = rx.recv().await {
        match record {
            LogRecord::Json {
                folder,
                payload,
                keep_latest_only,
            } => {
                if keep_latest_only {
                    prune_folder(&folder).await;
                }
                if let Err(e) = write_json(&folder, &payload).await {
                    tracing::warn!("Failed to write log in {:?}: {}", folder, e);
                }
            }
            LogRecord::Line { file, line } => {
                if let Err(e) = append_line(&file, &line).await {
                    tracing::warn!("Failed to append error log: {}", e);
                }
            }
            LogRecord::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn write_json(folder: &Path, payload: &Value) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(folder).await?;
    let name = format!(
        "{}_{}.json",
        Utc::now().format("%Y%m%dT%H%M%S%.6fZ"),
        uuid::Uuid::new_v4().simple()
    );
    let content = serde_json::to_string_pretty(payload)?;
    tokio::fs::write(folder.join(name), content).await?;
    Ok(())
}

async fn append_line(file: &Path, line: &str) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    if let Some(parent) = file.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut handle = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(file)
        .await?;
    handle.write_all(line.as_bytes()).await
}

/// Deletes the records already in `folder`.
async fn prune_folder(folder: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(folder).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            let _ = tokio::fs::remove_file(path).await;
        }
    }
}

/// Session id from `metadata.user_id`: the part after the first `session_`,
/// only if it is a safe folder name.
pub fn extract_session_id(body: &Value) -> Option<String> {
    let user_id = body.get("metadata")?.get("user_id")?.as_str()?;
    let (_, session) = user_id.split_once(SESSION_MARKER)?;
    if SAFE_SESSION_ID.is_match(session) {
        Some(session.to_string())
    } else {
        None
    }
}

/// Header map as JSON with credentials masked.
pub fn redact_headers(headers: &HeaderMap) -> Value {
    let mut out = Map::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        let lower = name.as_str();
        let shown = if lower.contains("key") || lower.contains("authorization") {
            mask(&value)
        } else {
            value
        };
        out.insert(name.as_str().to_string(), Value::String(shown));
    }
    Value::Object(out)
}

fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 10 {
        return "***".to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// First user prompt (single line) and tool names, for console lines.
pub fn request_summary(body: &Value) -> (String, Vec<String>) {
    let prompt = body
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|messages| {
            messages
                .iter()
                .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
        })
        .map(|msg| match msg.get("content") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Array(blocks)) => blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(" "),
            _ => String::new(),
        })
        .unwrap_or_default()
        .replace('\n', " ")
        .trim()
        .chars()
        .take(120)
        .collect();

    let tools = body
        .get("tools")
        .and_then(Value::as_array)
        .map(|tools| {
            tools
                .iter()
                .filter(|t| t.is_object())
                .map(|t| t.get("name").and_then(Value::as_str).unwrap_or("?").to_string())
                .collect()
        })
        .unwrap_or_default();

    (prompt, tools)
}
