// Tool usage tracking for delegated agents

use serde_json::{json, Value};

const WARNING_STEP: i64 = 10;
const CRITICAL_STEP: i64 = 20;

/// Number of `tool_use` blocks across assistant messages.
pub fn count_tool_invocations(messages: &[Value]) -> usize {
    let mut count = 0;
    for msg in messages {
        let role = msg.get("role").and_then(|v| v.as_str()).unwrap_or("");
        if role != "assistant" {
            continue;
        }
        let Some(Value::Array(parts)) = msg.get("content") else {
            continue;
        };
        for part in parts {
            let part_type = part.get("type").and_then(|v| v.as_str()).unwrap_or("");
            if part_type == "tool_use" {
                count += 1;
            }
        }
    }
    count
}

fn warning_message(count: i64, threshold: i64) -> Option<String> {
    if threshold <= 0 || count < threshold {
        return None;
    }
    let critical = threshold + CRITICAL_STEP;
    let strong = threshold + WARNING_STEP;

    let text = if count >= critical {
        format!(
            "<system-reminder>CRITICAL: You have used {count} tools (limit: {critical}). \
You MUST stop now and return your status to the main session immediately. \
Report what you've completed and what remains. Do not use any more tools.</system-reminder>"
        )
    } else if count >= strong {
        format!(
            "<system-reminder>WARNING: You have used {count} tools (threshold: {strong}). \
You should wrap up your current task now and return your status to the main session. \
Finish what you're doing and report back - don't start new work.</system-reminder>"
        )
    } else {
        format!(
            "<system-reminder>Tool usage notice: You have used {count} tools (threshold: {threshold}). \
Consider wrapping up your current task and returning your status to the main session. \
It's better to return partial progress than to continue indefinitely.</system-reminder>"
        )
    };
    Some(text)
}

/// Prepends the escalating reminder to the last user message. Returns whether
/// the body changed.
pub fn inject_warning(body: &mut Value, count: usize, threshold: i64) -> bool {
    let count = i64::try_from(count).unwrap_or(i64::MAX);
    let Some(reminder) = warning_message(count, threshold) else {
        return false;
    };
    let Some(message) = body
        .get_mut("messages")
        .and_then(Value::as_array_mut)
        .and_then(|messages| {
            messages
                .iter_mut()
                .rev()
                .find(|msg| msg.get("role").and_then(Value::as_str) == Some("user"))
        })
    else {
        return false;
    };

    let content = message
        .get_mut("content")
        .map(Value::take)
        .unwrap_or(Value::Null);
    message["content"] = match content {
        Value::String(text) => Value::String(format!("{}\n\n{}", reminder, text)),
        Value::Array(mut blocks) => {
            blocks.insert(0, json!({"type": "text", "text": reminder}));
            Value::Array(blocks)
        }
        _ => Value::String(reminder),
    };
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(tool_uses: usize) -> Vec<Value> {
        let mut messages = vec![json!({"role": "user", "content": "start"})];
        for i in 0..tool_uses {
            messages.push(json!({"role": "assistant", "content": [
                {"type": "text", "text": "working"},
                {"type": "tool_use", "id": format!("t{i}"), "name": "Read", "input": {}}
            ]}));
            messages.push(json!({"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": format!("t{i}"), "content": "ok"}
            ]}));
        }
        messages
    }

    #[test]
    fn test_counts_only_assistant_tool_use() {
        let mut messages = history(3);
        messages.push(json!({"role": "user", "content": [{"type": "tool_use", "id": "x"}]}));
        messages.push(json!({"role": "assistant", "content": "text only"}));
        assert_eq!(count_tool_invocations(&messages), 3);
    }

    #[test]
    fn test_noop_below_threshold_or_disabled() {
        let mut body = json!({"messages": history(2)});
        let original = body.clone();
        assert!(!inject_warning(&mut body, 2, 5));
        assert!(!inject_warning(&mut body, 50, 0));
        assert!(!inject_warning(&mut body, 50, -3));
        assert_eq!(body, original);
    }

    #[test]
    fn test_bands_name_their_boundary() {
        let notice = warning_message(5, 5).unwrap();
        assert!(notice.starts_with("<system-reminder>Tool usage notice: You have used 5 tools (threshold: 5)."));
        let notice = warning_message(14, 5).unwrap();
        assert!(notice.contains("(threshold: 5)"));

        let warning = warning_message(15, 5).unwrap();
        assert!(warning.starts_with("<system-reminder>WARNING: You have used 15 tools (threshold: 15)."));

        let critical = warning_message(25, 5).unwrap();
        assert!(critical.starts_with("<system-reminder>CRITICAL: You have used 25 tools (limit: 25)."));
        assert!(warning_message(400, 5).unwrap().contains("(limit: 25)"));
    }

    #[test]
    fn test_injects_into_last_user_message() {
        let mut body = json!({"messages": history(2)});
        assert!(inject_warning(&mut body, 2, 2));
        let last = &body["messages"][4]["content"];
        assert_eq!(last[0]["type"], "text");
        assert!(last[0]["text"].as_str().unwrap().contains("Tool usage notice"));
        assert_eq!(last[1]["type"], "tool_result");
        // Earlier user messages are untouched.
        assert_eq!(body["messages"][2]["content"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_string_and_missing_content() {
        let mut body = json!({"messages": [{"role": "user", "content": "go"}]});
        inject_warning(&mut body, 3, 1);
        let text = body["messages"][0]["content"].as_str().unwrap();
        assert!(text.starts_with("<system-reminder>Tool usage notice"));
        assert!(text.ends_with("</system-reminder>\n\ngo"));

        let mut body = json!({"messages": [{"role": "user"}]});
        inject_warning(&mut body, 3, 1);
        assert!(body["messages"][0]["content"].as_str().unwrap().starts_with("<system-reminder>"));
    }

    #[test]
    fn test_no_user_message() {
        let mut body = json!({"messages": [{"role": "assistant", "content": "hi"}]});
        let original = body.clone();
        assert!(!inject_warning(&mut body, 30, 1));
        assert_eq!(body, original);
    }
}
