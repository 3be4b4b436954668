// Proxy module - routes requests and prepares them for an upstream

pub mod compat;
pub mod headers;
pub mod router;
pub mod tool_tracker;

use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::Value;

use crate::config::AppConfig;
use crate::request_log::RequestLogger;
use crate::sanitize::{self, content::extract_text, SanitizeOptions};
use router::RouteDecider;

pub const MESSAGES_PATH: &str = "/v1/messages";
pub const COUNT_TOKENS_PATH: &str = "/v1/messages/count_tokens";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Main session; the client's own credentials.
    Primary,
    /// Delegated agents; the configured API key.
    Secondary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub target: Target,
    pub model_override: Option<String>,
}

/// Everything the upstream relay needs for one call.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub target: Target,
    pub target_name: String,
    pub base_url: String,
    pub headers: HeaderMap,
    pub body: Value,
}

impl PreparedRequest {
    pub fn is_streaming(&self) -> bool {
        self.body
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

pub struct RoutingService {
    config: Arc<AppConfig>,
    decider: RouteDecider,
    sanitize_options: SanitizeOptions,
    logger: Arc<dyn RequestLogger>,
}

impl RoutingService {
    pub fn new(
        config: Arc<AppConfig>,
        custom_system_prompt: Option<String>,
        logger: Arc<dyn RequestLogger>,
    ) -> Self {
        let decider = RouteDecider::new(&config.routing, config.secondary.model.clone());
        let sanitize_options =
            SanitizeOptions::from_config(&config.sanitize, custom_system_prompt);
        Self {
            config,
            decider,
            sanitize_options,
            logger,
        }
    }

    pub fn prepare_messages(&self, body: &Value, inbound: &HeaderMap) -> PreparedRequest {
        let decision = self.decider.decide(body);
        let mut prepared = sanitize::sanitize(body, &self.options_for(decision.target, body));
        let mut model = model_of(&prepared);

        match decision.target {
            Target::Primary => {
                let headers = headers::primary_headers(inbound);
                let streaming = prepared
                    .get("stream")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                self.logger
                    .log_primary(&model, &prepared, streaming, MESSAGES_PATH);
                self.primary_request(headers, prepared)
            }
            Target::Secondary => {
                compat::strip_incompatible(&mut prepared);

                if let Some(model_override) = decision.model_override {
                    if let Some(obj) = prepared.as_object_mut() {
                        obj.insert("model".to_string(), Value::String(model_override.clone()));
                    }
                    model = format!("{} (was {})", model_override, model);
                }

                let threshold = self.config.limits.subagent_tool_warning;
                if threshold > 0 {
                    let count = body
                        .get("messages")
                        .and_then(Value::as_array)
                        .map(|messages| tool_tracker::count_tool_invocations(messages))
                        .unwrap_or(0);
                    if tool_tracker::inject_warning(&mut prepared, count, threshold) {
                        tracing::info!(
                            "Tool usage reminder injected: {} tools (threshold {})",
                            count,
                            threshold
                        );
                    }
                }

                let headers =
                    headers::secondary_headers(inbound, &self.config.secondary.api_key);
                self.logger
                    .log_secondary(&model, &prepared, &headers, MESSAGES_PATH, Some(body));
                self.secondary_request(headers, prepared)
            }
        }
    }

    /// Same routing and sanitizing as messages; no model override and no
    /// tool usage reminder.
    pub fn prepare_count_tokens(&self, body: &Value, inbound: &HeaderMap) -> PreparedRequest {
        let decision = self.decider.decide(body);
        let mut prepared = sanitize::sanitize(body, &self.options_for(decision.target, body));
        let model = model_of(&prepared);

        match decision.target {
            Target::Primary => {
                self.logger
                    .log_primary(&model, &prepared, false, COUNT_TOKENS_PATH);
                self.primary_request(headers::primary_headers(inbound), prepared)
            }
            Target::Secondary => {
                self.logger.log_secondary(
                    &model,
                    &prepared,
                    &HeaderMap::new(),
                    COUNT_TOKENS_PATH,
                    Some(body),
                );
                compat::strip_incompatible(&mut prepared);
                let headers =
                    headers::secondary_headers(inbound, &self.config.secondary.api_key);
                self.secondary_request(headers, prepared)
            }
        }
    }

    fn options_for(&self, target: Target, body: &Value) -> SanitizeOptions {
        let secondary = target == Target::Secondary;
        let strip_claude_md_reminder = secondary && {
            let markers = &self.config.sanitize.strip_claude_md_markers;
            !markers.is_empty() && {
                let system = extract_text(body.get("system"));
                markers.iter().any(|m| system.contains(m.as_str()))
            }
        };
        SanitizeOptions {
            strip_mcp_tools: !secondary,
            strip_post_env_info: secondary,
            strip_claude_md_reminder,
            ..self.sanitize_options.clone()
        }
    }

    fn primary_request(&self, headers: HeaderMap, body: Value) -> PreparedRequest {
        PreparedRequest {
            target: Target::Primary,
            target_name: self.config.primary.name.clone(),
            base_url: self.config.primary.base_url.clone(),
            headers,
            body,
        }
    }

    fn secondary_request(&self, headers: HeaderMap, body: Value) -> PreparedRequest {
        PreparedRequest {
            target: Target::Secondary,
            target_name: self.config.secondary.name.clone(),
            base_url: self.config.secondary.base_url.clone(),
            headers,
            body,
        }
    }
}

fn model_of(body: &Value) -> String {
    body.get("model")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}
