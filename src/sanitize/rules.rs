// Rewrite rule tables shared by the sanitize stages
//
// Every textual rewrite is data: an ordered list of (pattern, replacement)
// pairs consumed by `apply_rules` or `apply_literal_rules`.

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};

use crate::config::TextReplacement;

pub const MCP_TOOL_PREFIX: &str = "mcp__";
pub const TASK_TOOL_NAME: &str = "Task";

pub const MALWARE_MARKER: &str = "you should consider whether it would be considered malware";
pub const PLAN_MODE_MARKER: &str = "Plan mode is active";
pub const SYSTEM_PROMPT_MARKER: &str = "You are an interactive CLI tool";

pub const ENV_OPEN: &str = "<env>";
pub const ENV_CLOSE: &str = "</env>";

pub const RESULT_SEPARATOR: &str = "--- RESULT ---";

/// A compiled regex rewrite.
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: Regex,
    replacement: String,
}

impl Rule {
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Option<Self> {
        match Regex::new(pattern) {
            Ok(pattern) => Some(Self {
                pattern,
                replacement: replacement.into(),
            }),
            Err(e) => {
                tracing::warn!("Skipping invalid rewrite pattern {:?}: {}", pattern, e);
                None
            }
        }
    }

    /// Rule matching `text` literally.
    pub fn literal(text: &str, replacement: impl Into<String>) -> Option<Self> {
        Self::new(&regex::escape(text), replacement)
    }

    /// Rule deleting every match.
    pub fn remove(pattern: &str) -> Option<Self> {
        Self::new(pattern, String::new())
    }
}

fn compiled(pattern: &str, replacement: &str) -> Rule {
    Rule::new(pattern, replacement).expect("built-in rewrite pattern")
}

/// Applies `rules` in order. Returns `None` when nothing matched.
pub fn apply_rules<'r>(text: &str, rules: impl IntoIterator<Item = &'r Rule>) -> Option<String> {
    let mut current: Option<String> = None;
    for rule in rules {
        let source = current.as_deref().unwrap_or(text);
        if !rule.pattern.is_match(source) {
            continue;
        }
        let replaced = rule
            .pattern
            .replace_all(source, NoExpand(&rule.replacement))
            .into_owned();
        current = Some(replaced);
    }
    current
}

/// Applies literal find/replace pairs in order.
///
/// A pair whose replacement already appears in the text is skipped, so pairs
/// that extend the matched sentence do not stack on repeated runs.
pub fn apply_literal_rules(text: &str, rules: &[TextReplacement]) -> Option<String> {
    let mut current: Option<String> = None;
    for rule in rules {
        if rule.find.is_empty() {
            continue;
        }
        let source = current.as_deref().unwrap_or(text);
        if !source.contains(&rule.find) {
            continue;
        }
        if rule.replace.contains(&rule.find) && source.contains(&rule.replace) {
            continue;
        }
        current = Some(source.replace(&rule.find, &rule.replace));
    }
    current
}

// Task tool description

pub const TASK_OPENING: &str = "Launch a new agent to handle complex, multi-step tasks autonomously. \
\n\nThe Task tool launches specialized agents (subprocesses) that autonomously handle complex tasks. \
Each agent type has specific capabilities and tools available to it.";

pub const TASK_OPENING_REPLACEMENT: &str = "Delegate work to agents that run in isolation. \
Preserves main session context while agents handle focused tasks.\n\n\
**How to use effectively:**\n\
- Give focused, precise, scoped task per agent - broad tasks lead to incomplete work\n\
- Agents start fresh with no prior context - provide everything they need:\n\
  - File paths to read (specs, docs, code to reference/modify)\n\
  - Exact commands if they need to run builds, tests, docker, pre-commit hooks\n\
  - Write a context file (e.g., /tmp/task-context.md) and pass its path if context is complex\n\
- Don't paste file contents in the prompt - give paths and let agents read them\n\
- If unsure about command structure, verify it in main session first, then pass exact commands to agent\n\n\
**Pass file paths, not descriptions:**\n\
- Files to modify: `src/api/users.py, src/models/user.py`\n\
- Reference code: `src/utils/auth.py (see token handling)`\n\
- Previous agent outputs: `/tmp/zai-speckit/toon/abc123.toon, /tmp/zai-speckit/toon/def456.toon`\n\
- Plan file: `/tmp/plan.md (task 3)`\n\
- Specs/config: `docs/api-spec.md, pyproject.toml`";

const BASH_AGENT_ENTRY: &str = "- Bash: Command execution specialist for running bash commands. \
Use this for git operations, command execution, and other terminal tasks.";

const BASH_AGENT_REPLACEMENT: &str = "- Bash: Git and system commands ONLY. \
Use for: git operations, docker, npm/pip install, running tests/builds. \
NEVER for: reading files, searching code, exploring codebase (use codebase-explorer instead).";

pub static TASK_OPENING_RULE: Lazy<Rule> =
    Lazy::new(|| compiled(&regex::escape(TASK_OPENING), TASK_OPENING_REPLACEMENT));

/// Applied after per-agent entries are gone.
pub static TASK_CLEANUP_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        compiled(
            r#"(?s)- Agents with "access to current context".*?understand the context\.\n"#,
            "",
        ),
        compiled(r"(?s)\n*Example usage:.*$", ""),
        compiled(r" \(Tools: [^)]+\)", ""),
        compiled(&regex::escape(BASH_AGENT_ENTRY), BASH_AGENT_REPLACEMENT),
    ]
});

/// Removes the `- <agent>: ... (Tools: ...)` entry of one agent.
pub fn agent_entry_rule(agent: &str) -> Option<Rule> {
    Rule::remove(&format!(r"(?s)- {}:.*?\(Tools:.*?\)\n", regex::escape(agent)))
}

// Reminders

pub static MALWARE_REMINDER_RULE: Lazy<Rule> = Lazy::new(|| {
    compiled(
        r"(?s)<system-reminder>\s*Whenever you read a file, you should consider whether it would be considered malware\..*?</system-reminder>\s*",
        "",
    )
});

pub static CLAUDE_MD_REMINDER_RULE: Lazy<Rule> = Lazy::new(|| {
    compiled(
        r"(?s)<system-reminder>\s*As you answer the user's questions, you can use the following context:\s*# claudeMd.*?</system-reminder>\s*",
        "",
    )
});

pub static POST_ENV_RULE: Lazy<Rule> = Lazy::new(|| compiled(r"(?s)</env>\n.*$", ENV_CLOSE));

// Tool result compaction

pub static TOOL_RESULT_OUTPUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<output>\n\s*(.*?)\s*\n</output>").expect("output pattern"));

pub static TOOL_CALL_LOG_RULE: Lazy<Rule> =
    Lazy::new(|| compiled(r"(?m)^\[Tool: \w+\] \{.*?\}\n?", ""));

// Plan mode

pub const PLAN_MODE_REPLACEMENTS: &[(&str, &str)] = &[
    (
        "In this phase you should only use the Explore subagent type.",
        "In this phase you should use the zai-speckit-plugin:codebase-explorer subagent type. \
For investigating failures or debugging issues, use zai-speckit-plugin:root-cause-agent instead.",
    ),
    (
        "Launch up to 3 Explore agents IN PARALLEL",
        "Launch up to 3 zai-speckit-plugin:codebase-explorer agents IN PARALLEL",
    ),
    (
        "3. After exploring the code, use the AskUserQuestion tool to clarify ambiguities in the user request up front.",
        "3. After exploring the code, use the AskUserQuestion tool to clarify ambiguities in the user request up front.\n\n\
**Research agents available:**\n\
- **zai-speckit-plugin:context7-docs**: Look up library documentation (FastAPI, React, etc.)\n\
- **zai-speckit-plugin:web-research**: Search for best practices, tutorials, error codes, or API docs not in Context7. \
Also useful when investigating issues to look up error messages or stack traces.",
    ),
    (
        "Launch Plan agent(s) to design the implementation",
        "Launch zai-speckit-plugin:architect agent(s) to design the implementation",
    ),
    (
        "Launch at least 1 Plan agent for most tasks",
        "Launch at least 1 zai-speckit-plugin:architect agent for most tasks",
    ),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn replacement(find: &str, replace: &str) -> TextReplacement {
        TextReplacement {
            find: find.to_string(),
            replace: replace.to_string(),
        }
    }

    #[test]
    fn apply_rules_runs_in_order() {
        let rules = vec![
            Rule::literal("alpha", "beta").unwrap(),
            Rule::literal("beta", "gamma").unwrap(),
        ];
        assert_eq!(apply_rules("alpha", &rules).as_deref(), Some("gamma"));
        assert_eq!(apply_rules("nothing here", &rules), None);
    }

    #[test]
    fn replacement_text_is_not_expanded() {
        let rule = Rule::literal("price", "$1 and ${name}").unwrap();
        assert_eq!(
            apply_rules("the price", [&rule]).as_deref(),
            Some("the $1 and ${name}")
        );
    }

    #[test]
    fn literal_rules_that_extend_text_apply_once() {
        let rules = vec![replacement("step three.", "step three.\n\nExtra guidance.")];
        let once = apply_literal_rules("Do step three.", &rules).unwrap();
        assert_eq!(once, "Do step three.\n\nExtra guidance.");
        assert_eq!(apply_literal_rules(&once, &rules), None);
    }

    #[test]
    fn agent_entry_rule_removes_whole_entry() {
        let text = "Agents:\n- general-purpose: does things\nover lines (Tools: *)\n- Keep: stays (Tools: Read)\n";
        let rule = agent_entry_rule("general-purpose").unwrap();
        assert_eq!(
            apply_rules(text, [&rule]).as_deref(),
            Some("Agents:\n- Keep: stays (Tools: Read)\n")
        );
    }

    #[test]
    fn task_opening_rule_lists_example_paths() {
        let rewritten = apply_rules(TASK_OPENING, [&*TASK_OPENING_RULE]).unwrap();
        for path in [
            "src/api/users.py, src/models/user.py",
            "src/utils/auth.py (see token handling)",
            "/tmp/zai-speckit/toon/abc123.toon, /tmp/zai-speckit/toon/def456.toon",
            "/tmp/plan.md (task 3)",
            "docs/api-spec.md, pyproject.toml",
        ] {
            assert!(rewritten.contains(path), "missing {}", path);
        }
    }

    #[test]
    fn invalid_pattern_is_skipped() {
        assert!(Rule::new("(unclosed", "").is_none());
    }
}
