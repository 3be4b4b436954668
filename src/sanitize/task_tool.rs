// Task tool description rewrite

use serde_json::Value;

use super::rules::{
    agent_entry_rule, apply_rules, Rule, TASK_CLEANUP_RULES, TASK_OPENING_RULE, TASK_TOOL_NAME,
};

/// Rewrites the description of the first `Task` tool: new opening text,
/// stripped agent entries, no context/example sections, no `(Tools: ...)`
/// suffixes.
pub fn rewrite_task_tool(body: &mut Value, stripped_agents: &[String]) {
    let Some(tools) = body.get_mut("tools").and_then(Value::as_array_mut) else {
        return;
    };
    let Some(task) = tools
        .iter_mut()
        .find(|tool| tool.get("name").and_then(Value::as_str) == Some(TASK_TOOL_NAME))
    else {
        return;
    };
    let Some(description) = task.get("description").and_then(Value::as_str) else {
        return;
    };
    if description.is_empty() {
        return;
    }

    let agent_rules: Vec<Rule> = stripped_agents
        .iter()
        .filter_map(|agent| agent_entry_rule(agent))
        .collect();
    let rules = std::iter::once(&*TASK_OPENING_RULE)
        .chain(agent_rules.iter())
        .chain(TASK_CLEANUP_RULES.iter());

    if let Some(rewritten) = apply_rules(description, rules) {
        task["description"] = Value::String(rewritten);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::rules::{TASK_OPENING, TASK_OPENING_REPLACEMENT};
    use serde_json::json;

    fn sample_description() -> String {
        format!(
            "{TASK_OPENING}\n\nAvailable agent types and the tools they have access to:\n\
- general-purpose: General agent for research. (Tools: *)\n\
- Bash: Command execution specialist for running bash commands. Use this for git operations, command execution, and other terminal tasks. (Tools: Bash)\n\
- codebase-explorer: Finds code. (Tools: Read, Grep)\n\
- Agents with \"access to current context\" can see the full conversation history before the tool call. \
When using these agents, you can write concise prompts that reference earlier context. The agent will receive all prior messages and understand the context.\n\
When NOT to use the Task tool:\n- Reading a single file\n\n\
Example usage:\n<example>user: hi</example>\n"
        )
    }

    fn agents() -> Vec<String> {
        vec!["general-purpose".to_string(), "Plan".to_string()]
    }

    #[test]
    fn test_rewrites_description() {
        let mut body = json!({"tools": [
            {"name": "Read", "description": TASK_OPENING},
            {"name": "Task", "description": sample_description()}
        ]});
        rewrite_task_tool(&mut body, &agents());

        let desc = body["tools"][1]["description"].as_str().unwrap();
        assert!(desc.starts_with(TASK_OPENING_REPLACEMENT));
        assert!(!desc.contains("general-purpose"));
        assert!(!desc.contains("(Tools:"));
        assert!(!desc.contains("access to current context"));
        assert!(!desc.contains("Example usage"));
        assert!(desc.contains("- codebase-explorer: Finds code.\n"));
        assert!(desc.contains("- Bash: Git and system commands ONLY."));
        assert!(desc.ends_with("- Reading a single file"));

        // Only the Task tool is touched.
        assert_eq!(body["tools"][0]["description"], TASK_OPENING);
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let mut body = json!({"tools": [{"name": "Task", "description": sample_description()}]});
        rewrite_task_tool(&mut body, &agents());
        let once = body.clone();
        rewrite_task_tool(&mut body, &agents());
        assert_eq!(body, once);
    }

    #[test]
    fn test_only_first_task_tool_is_rewritten() {
        let mut body = json!({"tools": [
            {"name": "Task", "description": sample_description()},
            {"name": "Task", "description": sample_description()}
        ]});
        rewrite_task_tool(&mut body, &agents());
        assert_ne!(body["tools"][0]["description"], body["tools"][1]["description"]);
        assert_eq!(body["tools"][1]["description"], sample_description());
    }

    #[test]
    fn test_missing_description_is_ignored() {
        let mut body = json!({"tools": [{"name": "Task", "input_schema": {}}]});
        let original = body.clone();
        rewrite_task_tool(&mut body, &agents());
        assert_eq!(body, original);
    }
}
