// Views over the "string or list of blocks" fields of a request body

use serde_json::Value;

/// Read-only view of a `system` or `content` value.
#[derive(Debug, Clone, Copy)]
pub enum Content<'a> {
    Text(&'a str),
    Blocks(&'a [Value]),
    /// A lone object, e.g. `system: {"type": "text", "text": ...}`.
    Block(&'a Value),
    Absent,
}

impl<'a> Content<'a> {
    pub fn of(value: Option<&'a Value>) -> Self {
        match value {
            Some(Value::String(text)) => Content::Text(text),
            Some(Value::Array(blocks)) => Content::Blocks(blocks),
            Some(block) if block.is_object() => Content::Block(block),
            _ => Content::Absent,
        }
    }

    /// Whether `marker` occurs in any text this content carries, including
    /// text inside `tool_result` blocks.
    pub fn contains(&self, marker: &str) -> bool {
        match self {
            Content::Text(text) => text.contains(marker),
            Content::Blocks(blocks) => blocks.iter().any(|b| block_contains(b, marker)),
            Content::Block(block) => block_contains(block, marker),
            Content::Absent => false,
        }
    }
}

/// Mutable view used by the sanitize stages.
pub enum ContentMut<'a> {
    Text(&'a mut String),
    Blocks(&'a mut Vec<Value>),
    Other,
}

impl<'a> ContentMut<'a> {
    pub fn of(value: Option<&'a mut Value>) -> Self {
        match value {
            Some(Value::String(text)) => ContentMut::Text(text),
            Some(Value::Array(blocks)) => ContentMut::Blocks(blocks),
            _ => ContentMut::Other,
        }
    }
}

fn block_contains(block: &Value, marker: &str) -> bool {
    let part_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match part_type {
        "text" => block
            .get("text")
            .and_then(|v| v.as_str())
            .map(|t| t.contains(marker))
            .unwrap_or(false),
        "tool_result" => Content::of(block.get("content")).contains(marker),
        _ => false,
    }
}

/// Plain text of a `system` or `content` value.
///
/// Strings come back unchanged. Lists join the `text` of each element with a
/// single space; elements that are not objects contribute their string form.
pub fn extract_text(value: Option<&Value>) -> String {
    match Content::of(value) {
        Content::Text(text) => text.to_string(),
        Content::Blocks(blocks) => blocks
            .iter()
            .map(|item| match item {
                Value::Object(map) => map.get("text").map(string_form).unwrap_or_default(),
                other => string_form(other),
            })
            .collect::<Vec<_>>()
            .join(" "),
        Content::Block(block) => block.get("text").map(string_form).unwrap_or_default(),
        Content::Absent => match value {
            Some(Value::Null) | None => String::new(),
            Some(other) => string_form(other),
        },
    }
}

fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
