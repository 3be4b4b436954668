// Request body sanitization
//
// `sanitize` clones the body once and runs every stage over that copy in a
// fixed order. Stages are infallible and idempotent; a stage whose trigger is
// missing leaves the body untouched.

pub mod content;
pub mod reminders;
pub mod rules;
pub mod system_prompt;
pub mod task_tool;
pub mod tools;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::config::{SanitizeConfig, TextReplacement};

#[derive(Debug, Clone, Default)]
pub struct SanitizeOptions {
    pub strip_tools: bool,
    pub strip_mcp_tools: bool,
    pub strip_claude_md_reminder: bool,
    pub strip_post_env_info: bool,
    pub replace_system_prompt: bool,
    pub stripped_tools: HashSet<String>,
    pub stripped_agents: Vec<String>,
    pub mcp_allow_tools: HashSet<String>,
    pub mcp_allow_prefixes: Vec<String>,
    pub plan_mode_replacements: Vec<TextReplacement>,
    /// Replacement prompt; the built-in one when `None`.
    pub custom_system_prompt: Option<Arc<str>>,
}

impl SanitizeOptions {
    /// Options from config. Route-dependent flags start off.
    pub fn from_config(config: &SanitizeConfig, custom_system_prompt: Option<String>) -> Self {
        Self {
            strip_tools: config.strip_tools,
            strip_mcp_tools: false,
            strip_claude_md_reminder: false,
            strip_post_env_info: false,
            replace_system_prompt: config.replace_system_prompt,
            stripped_tools: config.hidden_tools.iter().cloned().collect(),
            stripped_agents: config.stripped_agents.clone(),
            mcp_allow_tools: config.mcp_allow_tools.iter().cloned().collect(),
            mcp_allow_prefixes: config.mcp_allow_prefixes.clone(),
            plan_mode_replacements: config.plan_mode_replacements.clone(),
            custom_system_prompt: custom_system_prompt.map(Arc::from),
        }
    }

    pub fn system_prompt(&self) -> &str {
        self.custom_system_prompt
            .as_deref()
            .unwrap_or(system_prompt::DEFAULT_SYSTEM_PROMPT)
    }
}

/// Returns a sanitized copy of `body`.
pub fn sanitize(body: &Value, options: &SanitizeOptions) -> Value {
    let mut body = body.clone();

    tools::filter_tools(&mut body, options);
    task_tool::rewrite_task_tool(&mut body, &options.stripped_agents);
    reminders::strip_malware_reminders(&mut body);
    reminders::rewrite_plan_mode(&mut body, &options.plan_mode_replacements);
    reminders::compact_tool_results(&mut body);
    if options.strip_claude_md_reminder {
        reminders::strip_claude_md_reminders(&mut body);
    }
    if options.strip_post_env_info {
        let replacement = options.replace_system_prompt.then(|| options.system_prompt());
        reminders::strip_post_env_info(&mut body, replacement);
    }
    if options.replace_system_prompt {
        system_prompt::replace_system_prompt(&mut body, options.system_prompt());
    }

    body
}
