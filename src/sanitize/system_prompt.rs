// System prompt replacement

use serde_json::{json, Value};

use super::content::extract_text;
use super::rules::{ENV_CLOSE, ENV_OPEN, SYSTEM_PROMPT_MARKER};

pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("../prompts/default_system.txt");

/// Replaces the built-in assistant prompt inside `system` with `prompt`,
/// carrying over the live `<env>` block from the incoming system text.
pub fn replace_system_prompt(body: &mut Value, prompt: &str) {
    let Some(system) = body.get_mut("system") else {
        return;
    };
    let merged = merge_env(prompt, &extract_text(Some(&*system)));

    match system {
        Value::String(text) => {
            if text.contains(SYSTEM_PROMPT_MARKER) && *text != merged {
                *text = merged;
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                let is_prompt = item
                    .get("text")
                    .and_then(Value::as_str)
                    .map(|text| text.contains(SYSTEM_PROMPT_MARKER) && text != merged)
                    .unwrap_or(false);
                if is_prompt {
                    item["text"] = Value::String(merged.clone());
                }
            }
        }
        Value::Object(_) => {
            let is_prompt = system
                .get("text")
                .and_then(Value::as_str)
                .map(|text| text.contains(SYSTEM_PROMPT_MARKER))
                .unwrap_or(false);
            if is_prompt {
                *system = json!({"type": "text", "text": merged});
            }
        }
        _ => {}
    }
}

/// Whether `text` is `prompt` with some env block spliced in, i.e. the output
/// of a previous replacement.
pub fn is_replaced_prompt(text: &str, prompt: &str) -> bool {
    merge_env(prompt, text) == text
}

fn env_block(text: &str) -> Option<&str> {
    let start = text.find(ENV_OPEN)?;
    let end = text[start..].find(ENV_CLOSE)? + start + ENV_CLOSE.len();
    Some(&text[start..end])
}

/// `base` with its own env block swapped for the one in `original`.
fn merge_env(base: &str, original: &str) -> String {
    match (env_block(base), env_block(original)) {
        (Some(placeholder), Some(live)) => base.replacen(placeholder, live, 1),
        _ => base.to_string(),
    }
}
