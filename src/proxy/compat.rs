// Compatibility transformer for the secondary upstream

use serde_json::Value;

const SYSTEM_REMINDER_TAG: &str = "<system-reminder>";

/// User-supplied project context; never treated as noise.
const PRESERVE_MARKER: &str = "# claudeMd";

const NOISE_MARKERS: &[&str] = &[
    "TodoWrite tool hasn't been used",
    "Plan mode is active",
    "consider whether it would be considered malware",
    "SessionStart:",
    "UserPromptSubmit:",
];

/// Removes fields the secondary upstream rejects: `metadata`, every
/// `cache_control` hint, and client noise reminders.
pub fn strip_incompatible(body: &mut Value) {
    let Some(obj) = body.as_object_mut() else {
        return;
    };
    obj.remove("metadata");

    if let Some(Value::Array(items)) = obj.get_mut("system") {
        items.iter_mut().for_each(remove_cache_control);
    }

    let Some(Value::Array(messages)) = obj.get_mut("messages") else {
        return;
    };
    for message in messages.iter_mut() {
        let Some(Value::Array(blocks)) = message.get_mut("content") else {
            continue;
        };
        if blocks.iter().any(|b| !is_noise(b)) {
            blocks.retain(|b| !is_noise(b));
        }
        blocks.iter_mut().for_each(remove_cache_control);
    }
}

fn remove_cache_control(value: &mut Value) {
    if let Some(obj) = value.as_object_mut() {
        obj.remove("cache_control");
    }
}

fn is_noise(block: &Value) -> bool {
    let part_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
    if part_type != "text" {
        return false;
    }
    let Some(text) = block.get("text").and_then(|v| v.as_str()) else {
        return false;
    };
    text.contains(SYSTEM_REMINDER_TAG)
        && !text.contains(PRESERVE_MARKER)
        && NOISE_MARKERS.iter().any(|m| text.contains(m))
}
