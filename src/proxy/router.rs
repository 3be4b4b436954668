// Route decider - picks the upstream from system prompt markers

use serde_json::Value;

use super::{RouteDecision, Target};
use crate::config::RoutingConfig;
use crate::sanitize::content::extract_text;

pub struct RouteDecider {
    secondary_markers: Vec<String>,
    primary_markers: Vec<String>,
    model_override: Option<String>,
}

impl RouteDecider {
    pub fn new(routing: &RoutingConfig, model_override: Option<String>) -> Self {
        Self {
            secondary_markers: routing.secondary_markers.clone(),
            primary_markers: routing.primary_markers.clone(),
            model_override: model_override.filter(|m| !m.trim().is_empty()),
        }
    }

    /// Must see the body before sanitization, which may remove the markers.
    pub fn decide(&self, body: &Value) -> RouteDecision {
        let target = self.target_for(&extract_text(body.get("system")));
        let model_override = match target {
            Target::Secondary => self.model_override.clone(),
            Target::Primary => None,
        };
        RouteDecision {
            target,
            model_override,
        }
    }

    fn target_for(&self, system_text: &str) -> Target {
        let has = |markers: &[String]| markers.iter().any(|m| system_text.contains(m.as_str()));

        if has(&self.primary_markers) {
            return Target::Primary;
        }
        if has(&self.secondary_markers) {
            return Target::Secondary;
        }
        Target::Primary
    }
}
