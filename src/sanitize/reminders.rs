// Reminder stripping, plan-mode rewrite and tool-result compaction

use serde_json::Value;

use super::content::{Content, ContentMut};
use super::rules::{
    apply_literal_rules, apply_rules, CLAUDE_MD_REMINDER_RULE, ENV_CLOSE, MALWARE_MARKER,
    MALWARE_REMINDER_RULE, PLAN_MODE_MARKER, POST_ENV_RULE, RESULT_SEPARATOR,
    TOOL_CALL_LOG_RULE, TOOL_RESULT_OUTPUT,
};
use super::system_prompt::is_replaced_prompt;
use crate::config::TextReplacement;

type TextFn<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Removes the malware-check reminder from every message once any message
/// carries it.
pub fn strip_malware_reminders(body: &mut Value) {
    if !any_message_contains(body, MALWARE_MARKER) {
        return;
    }
    let strip = |text: &str| apply_rules(text, [&*MALWARE_REMINDER_RULE]);
    for_each_content(body, |content| {
        rewrite_text(content, &strip);
        rewrite_tool_results(content, &strip);
    });
}

/// Applies the plan-mode replacement table to message text when plan mode is
/// active.
pub fn rewrite_plan_mode(body: &mut Value, replacements: &[TextReplacement]) {
    if replacements.is_empty() || !any_message_contains(body, PLAN_MODE_MARKER) {
        return;
    }
    let rewrite = |text: &str| apply_literal_rules(text, replacements);
    for_each_content(body, |content| rewrite_text(content, &rewrite));
}

/// Trims verbose agent transcripts inside `<output>` wrappers of tool results.
pub fn compact_tool_results(body: &mut Value) {
    for_each_content(body, |content| rewrite_tool_results(content, &compact_output));
}

pub fn strip_claude_md_reminders(body: &mut Value) {
    let strip = |text: &str| apply_rules(text, [&*CLAUDE_MD_REMINDER_RULE]);
    for_each_content(body, |content| rewrite_text(content, &strip));
}

/// Cuts the system text right after the environment block. Text that is
/// already `replacement` (with a live env block spliced in) is left alone.
pub fn strip_post_env_info(body: &mut Value, replacement: Option<&str>) {
    let truncate = |text: &str| {
        if !text.contains(ENV_CLOSE) || replacement.is_some_and(|p| is_replaced_prompt(text, p)) {
            return None;
        }
        apply_rules(text, [&*POST_ENV_RULE])
    };
    if let Some(system) = body.get_mut("system") {
        rewrite_text(system, &truncate);
    }
}

fn compact_output(text: &str) -> Option<String> {
    let caps = TOOL_RESULT_OUTPUT.captures(text)?;
    let wrapped = caps.get(0)?.as_str();
    let inner = caps.get(1)?.as_str();

    let cleaned = match inner.find(RESULT_SEPARATOR) {
        Some(idx) => inner[idx..].trim().to_string(),
        None => apply_rules(inner, [&*TOOL_CALL_LOG_RULE])
            .as_deref()
            .unwrap_or(inner)
            .trim()
            .to_string(),
    };
    let replacement = format!("<output>\n{}\n</output>", cleaned);
    if replacement == wrapped {
        return None;
    }
    Some(text.replace(wrapped, &replacement))
}

fn any_message_contains(body: &Value, marker: &str) -> bool {
    body.get("messages")
        .and_then(Value::as_array)
        .map(|messages| {
            messages
                .iter()
                .any(|msg| Content::of(msg.get("content")).contains(marker))
        })
        .unwrap_or(false)
}

fn for_each_content(body: &mut Value, mut f: impl FnMut(&mut Value)) {
    let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
        return;
    };
    for content in messages.iter_mut().filter_map(|msg| msg.get_mut("content")) {
        f(content);
    }
}

/// Rewrites message-level content: a string or the text blocks of a list.
///
/// A rewrite that leaves a string blank is discarded. Blank text blocks are
/// dropped, but a list whose every block would go is left as it was.
fn rewrite_text(content: &mut Value, f: TextFn) {
    match ContentMut::of(Some(content)) {
        ContentMut::Text(text) => {
            if let Some(rewritten) = f(text) {
                if !rewritten.trim().is_empty() {
                    *text = rewritten;
                }
            }
        }
        ContentMut::Blocks(parts) => rewrite_blocks(parts, f, true),
        ContentMut::Other => {}
    }
}

fn rewrite_blocks(parts: &mut Vec<Value>, f: TextFn, keep_one: bool) {
    let mut updates: Vec<(usize, String)> = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        let part_type = part.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if part_type != "text" {
            continue;
        }
        if let Some(rewritten) = part.get("text").and_then(|v| v.as_str()).and_then(f) {
            updates.push((i, rewritten));
        }
    }
    if updates.is_empty() {
        return;
    }

    let blank = updates.iter().filter(|(_, t)| t.trim().is_empty()).count();
    if keep_one && blank == parts.len() {
        return;
    }
    for (i, text) in updates.into_iter().rev() {
        if text.trim().is_empty() {
            parts.remove(i);
        } else {
            parts[i]["text"] = Value::String(text);
        }
    }
}

/// Rewrites the `content` of every `tool_result` part. Unlike message text,
/// a tool result may end up empty.
fn rewrite_tool_results(content: &mut Value, f: TextFn) {
    let Some(parts) = content.as_array_mut() else {
        return;
    };
    for part in parts.iter_mut() {
        let part_type = part.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if part_type != "tool_result" {
            continue;
        }
        match part.get_mut("content") {
            Some(Value::String(text)) => {
                if let Some(rewritten) = f(text) {
                    *text = rewritten;
                }
            }
            Some(Value::Array(items)) => rewrite_blocks(items, f, false),
            _ => {}
        }
    }
}
