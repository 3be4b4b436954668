// Tool list filtering

use serde_json::Value;

use super::rules::MCP_TOOL_PREFIX;
use super::SanitizeOptions;

/// Drops hidden tools (and, when enabled, MCP tools outside the allow lists)
/// from `tools`, clearing a `tool_choice` that pointed at a removed tool.
pub fn filter_tools(body: &mut Value, options: &SanitizeOptions) {
    if !options.strip_tools {
        return;
    }
    let Some(tools) = body.get_mut("tools").and_then(Value::as_array_mut) else {
        return;
    };

    let mut removed = Vec::new();
    tools.retain(|tool| match tool.get("name").and_then(Value::as_str) {
        Some(name) if should_strip(name, options) => {
            removed.push(name.to_string());
            false
        }
        _ => true,
    });
    if removed.is_empty() {
        return;
    }
    tracing::debug!("Stripped tools: {}", removed.join(", "));

    let choice_removed = body
        .get("tool_choice")
        .and_then(|choice| choice.get("name"))
        .and_then(Value::as_str)
        .map(|name| removed.iter().any(|r| r == name))
        .unwrap_or(false);
    if choice_removed {
        if let Some(obj) = body.as_object_mut() {
            obj.remove("tool_choice");
        }
    }
}

fn should_strip(name: &str, options: &SanitizeOptions) -> bool {
    if options.stripped_tools.contains(name) {
        return true;
    }
    options.strip_mcp_tools
        && name.starts_with(MCP_TOOL_PREFIX)
        && !options.mcp_allow_tools.contains(name)
        && !options
            .mcp_allow_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
}
