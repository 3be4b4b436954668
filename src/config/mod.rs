// Configuration module for the split proxy

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR_NAME: &str = "claude-split-proxy";
const CONFIG_FILE_NAME: &str = "config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub primary: PrimaryConfig,

    #[serde(default)]
    pub secondary: SecondaryConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub sanitize: SanitizeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProxyConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug: false,
            log_dir: default_log_dir(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_log_dir() -> String {
    "logs".to_string()
}

/// Default upstream: receives the main session with the client's own credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PrimaryConfig {
    #[serde(default = "default_primary_name")]
    pub name: String,

    #[serde(default = "default_primary_base_url")]
    pub base_url: String,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            name: default_primary_name(),
            base_url: default_primary_base_url(),
        }
    }
}

fn default_primary_name() -> String {
    "Anthropic".to_string()
}

fn default_primary_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

/// Upstream for delegated agents, authenticated with a fixed API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SecondaryConfig {
    #[serde(default = "default_secondary_name")]
    pub name: String,

    #[serde(default = "default_secondary_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub model: Option<String>,
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            name: default_secondary_name(),
            base_url: default_secondary_base_url(),
            api_key: String::new(),
            model: None,
        }
    }
}

fn default_secondary_name() -> String {
    "z.ai".to_string()
}

fn default_secondary_base_url() -> String {
    "https://api.z.ai/api/anthropic".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct RoutingConfig {
    /// System prompt substrings that send a request to the secondary upstream.
    #[serde(default)]
    pub secondary_markers: Vec<String>,

    /// System prompt substrings that pin a request to the primary upstream.
    /// These win over `secondary_markers`.
    #[serde(default)]
    pub primary_markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LimitsConfig {
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    #[serde(default = "default_max_keepalive")]
    pub max_keepalive: usize,

    #[serde(default = "default_keepalive_expiry")]
    pub keepalive_expiry: f64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: f64,

    #[serde(default = "default_token_count_timeout")]
    pub token_count_timeout: f64,

    #[serde(default = "default_message_timeout")]
    pub message_timeout: f64,

    /// Tool invocations after which delegated agents get a wrap-up reminder. 0 disables it.
    #[serde(default)]
    pub subagent_tool_warning: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: default_max_body_size(),
            max_keepalive: default_max_keepalive(),
            keepalive_expiry: default_keepalive_expiry(),
            connect_timeout: default_connect_timeout(),
            token_count_timeout: default_token_count_timeout(),
            message_timeout: default_message_timeout(),
            subagent_tool_warning: 0,
        }
    }
}

impl LimitsConfig {
    pub fn connect_timeout(&self) -> Duration {
        secs(self.connect_timeout)
    }

    pub fn keepalive_expiry(&self) -> Duration {
        secs(self.keepalive_expiry)
    }

    pub fn token_count_timeout(&self) -> Duration {
        secs(self.token_count_timeout)
    }

    pub fn message_timeout(&self) -> Duration {
        secs(self.message_timeout)
    }

    fn durations(&self) -> [(&'static str, f64); 4] {
        [
            ("keepalive-expiry", self.keepalive_expiry),
            ("connect-timeout", self.connect_timeout),
            ("token-count-timeout", self.token_count_timeout),
            ("message-timeout", self.message_timeout),
        ]
    }
}

// `validate` rejects anything this cannot represent.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

fn default_max_body_size() -> usize {
    50 * 1024 * 1024
}

fn default_max_keepalive() -> usize {
    20
}

fn default_keepalive_expiry() -> f64 {
    30.0
}

fn default_connect_timeout() -> f64 {
    10.0
}

fn default_token_count_timeout() -> f64 {
    30.0
}

fn default_message_timeout() -> f64 {
    300.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SanitizeConfig {
    #[serde(default = "default_true")]
    pub strip_tools: bool,

    #[serde(default = "default_hidden_tools")]
    pub hidden_tools: Vec<String>,

    #[serde(default = "default_stripped_agents")]
    pub stripped_agents: Vec<String>,

    #[serde(default)]
    pub mcp_allow_tools: Vec<String>,

    #[serde(default = "default_mcp_allow_prefixes")]
    pub mcp_allow_prefixes: Vec<String>,

    #[serde(default)]
    pub strip_claude_md_markers: Vec<String>,

    #[serde(default = "default_true")]
    pub replace_system_prompt: bool,

    #[serde(default)]
    pub system_prompt_file: Option<String>,

    #[serde(default = "default_plan_mode_replacements")]
    pub plan_mode_replacements: Vec<TextReplacement>,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            strip_tools: true,
            hidden_tools: default_hidden_tools(),
            stripped_agents: default_stripped_agents(),
            mcp_allow_tools: Vec::new(),
            mcp_allow_prefixes: default_mcp_allow_prefixes(),
            strip_claude_md_markers: Vec::new(),
            replace_system_prompt: true,
            system_prompt_file: None,
            plan_mode_replacements: default_plan_mode_replacements(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextReplacement {
    pub find: String,
    pub replace: String,
}

fn default_true() -> bool {
    true
}

fn default_hidden_tools() -> Vec<String> {
    ["NotebookEdit", "WebFetch", "WebSearch"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_mcp_allow_prefixes() -> Vec<String> {
    vec!["mcp__semvex__".to_string()]
}

fn default_stripped_agents() -> Vec<String> {
    [
        "general-purpose",
        "statusline-setup",
        "Explore",
        "Plan",
        "claude-code-guide",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_plan_mode_replacements() -> Vec<TextReplacement> {
    crate::sanitize::rules::PLAN_MODE_REPLACEMENTS
        .iter()
        .map(|(find, replace)| TextReplacement {
            find: find.to_string(),
            replace: replace.to_string(),
        })
        .collect()
}

impl AppConfig {
    /// Problems that prevent the proxy from serving traffic.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.secondary.api_key.trim().is_empty() {
            problems.push(format!(
                "secondary.api-key is empty; {} requests cannot be authenticated",
                self.secondary.name
            ));
        }
        for (name, value) in self.limits.durations() {
            if Duration::try_from_secs_f64(value).is_err() {
                problems.push(format!(
                    "limits.{} must be a non-negative number of seconds (got {})",
                    name, value
                ));
            }
        }
        if self.limits.max_body_size == 0 {
            problems.push("limits.max-body-size must be greater than zero".to_string());
        }
        if self.primary.base_url.trim().is_empty() || self.secondary.base_url.trim().is_empty() {
            problems.push("upstream base-url values must not be empty".to_string());
        }
        problems
    }

    /// Custom replacement prompt, if one is configured.
    pub fn load_system_prompt(&self) -> Result<Option<String>> {
        match &self.sanitize.system_prompt_file {
            Some(path) => {
                let path = expand_home(path);
                let prompt = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read system prompt {:?}", path))?;
                Ok(Some(prompt))
            }
            None => Ok(None),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}

/// Writes a default config when `path` does not exist. Returns whether it did.
pub fn ensure_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let content = serde_yaml::to_string(&AppConfig::default())?;
    std::fs::write(path, content).with_context(|| format!("Failed to write config {:?}", path))?;
    Ok(true)
}

pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config {:?}", path))?;
    serde_yaml::from_str(&content).with_context(|| format!("Invalid config {:?}", path))
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
