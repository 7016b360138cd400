use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Job scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    /// Master switch; when off, jobs are stored but never run.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Job document path. `.db`/`.sqlite` selects the SQLite backend.
    /// Defaults to `~/.vigil/cron/jobs.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_path: None,
        }
    }
}

/// Stall detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StallConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How long a session may wait on the agent before a nudge fires.
    #[serde(default = "default_stall_timeout_ms")]
    pub timeout_ms: i64,
    #[serde(default = "default_stall_prompt")]
    pub prompt: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Drop idle, disarmed sessions after this long. Unset keeps them forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evict_after_ms: Option<i64>,
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: default_stall_timeout_ms(),
            prompt: default_stall_prompt(),
            poll_interval_ms: default_poll_interval_ms(),
            evict_after_ms: None,
        }
    }
}

/// How the reply-chain enforcer treats user messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserMessagePolicy {
    /// User messages leave the chain as it is.
    #[default]
    Ignore,
    /// Any user message disarms the chain immediately.
    Disarm,
}

/// Reply-chain enforcer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyChainConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reply_chain_timeout_ms")]
    pub timeout_ms: i64,
    #[serde(default = "default_reply_chain_prompt")]
    pub prompt: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub user_message_policy: UserMessagePolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evict_after_ms: Option<i64>,
}

impl Default for ReplyChainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: default_reply_chain_timeout_ms(),
            prompt: default_reply_chain_prompt(),
            poll_interval_ms: default_poll_interval_ms(),
            user_message_policy: UserMessagePolicy::default(),
            evict_after_ms: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_stall_timeout_ms() -> i64 {
    120_000
}

fn default_reply_chain_timeout_ms() -> i64 {
    300_000
}

fn default_stall_prompt() -> String {
    "You have not replied to the last message. Continue where you left off, or answer NO_REPLY if nothing is owed.".to_string()
}

fn default_reply_chain_prompt() -> String {
    "Your last turn ended without a sign-off. Finish the reply, or answer NO_REPLY if you are done.".to_string()
}

/// Top-level vigil configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default)]
    pub stall: StallConfig,
    #[serde(default)]
    pub reply_chain: ReplyChainConfig,
}

impl VigilConfig {
    /// Resolve the job store path, falling back to the config directory.
    pub fn cron_store_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.cron.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("cron").join("jobs.json")),
        }
    }
}

/// Resolve the vigil config directory (~/.vigil/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".vigil"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.vigil/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<VigilConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<VigilConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(VigilConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: VigilConfig = json5::from_str(&content)?;
    Ok(config)
}
