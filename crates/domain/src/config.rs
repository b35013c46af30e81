//! Parley configuration, deserialized from `parley.toml`.
//!
//! Every section has serde defaults so a missing file yields a usable dev
//! configuration (in-memory stores, no auth).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Maximum simultaneously active response pipelines per user.
    #[serde(default = "d_pipeline_slots")]
    pub pipeline_slots_per_user: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            pipeline_slots_per_user: d_pipeline_slots(),
        }
    }
}

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    8420
}
fn d_pipeline_slots() -> usize {
    2
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "d_model_base_url")]
    pub base_url: String,
    /// Environment variable holding the model API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_model_name")]
    pub model: String,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: d_model_base_url(),
            api_key_env: d_api_key_env(),
            model: d_model_name(),
            max_tokens: d_max_tokens(),
        }
    }
}

fn d_model_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn d_api_key_env() -> String {
    "PARLEY_MODEL_API_KEY".into()
}
fn d_model_name() -> String {
    "claude-sonnet-4-20250514".into()
}
fn d_max_tokens() -> u32 {
    4096
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Features & quota
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Feature gating for chat responses.
///
/// `chat_enabled` is the master kill switch. When `beta_period` is set, users
/// must additionally appear in `beta_users`. Per-user quota overrides fall
/// back to `default_monthly_quota`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "d_true")]
    pub chat_enabled: bool,
    #[serde(default)]
    pub beta_period: bool,
    #[serde(default)]
    pub beta_users: Vec<String>,
    #[serde(default = "d_monthly_quota")]
    pub default_monthly_quota: u32,
    /// Per-user monthly quota overrides (user id -> limit).
    #[serde(default)]
    pub per_user_quota: HashMap<String, u32>,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            chat_enabled: d_true(),
            beta_period: false,
            beta_users: Vec::new(),
            default_monthly_quota: d_monthly_quota(),
            per_user_quota: HashMap::new(),
        }
    }
}

fn d_true() -> bool {
    true
}

/// Free-tier default: 50 responses per user per month.
fn d_monthly_quota() -> u32 {
    50
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where tool calls are dispatched. The gateway forwards each invocation to
/// `{base_url}/tools/{name}`; the sibling service owns the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "d_tools_base_url")]
    pub base_url: String,
    #[serde(default = "d_tool_timeout")]
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            base_url: d_tools_base_url(),
            timeout_secs: d_tool_timeout(),
        }
    }
}

fn d_tools_base_url() -> String {
    "http://127.0.0.1:8421".into()
}
fn d_tool_timeout() -> u64 {
    120
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "d_system_prompt")]
    pub system: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: d_system_prompt(),
        }
    }
}

fn d_system_prompt() -> String {
    "You are Parley, a helpful assistant. Use the available tools when they \
     help answer the user's request; otherwise answer directly."
        .into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration, returning all issues found.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.pipeline_slots_per_user == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.pipeline_slots_per_user".into(),
                message: "must be at least 1".into(),
            });
        }

        if self.model.base_url.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "model.base_url".into(),
                message: "must not be empty".into(),
            });
        }

        if self.features.default_monthly_quota == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "features.default_monthly_quota".into(),
                message: "quota of 0 denies every request".into(),
            });
        }

        if self.features.beta_period && self.features.beta_users.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "features.beta_users".into(),
                message: "beta period is active but no beta users are listed".into(),
            });
        }

        issues
    }
}
