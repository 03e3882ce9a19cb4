//! Agent configuration
//!
//! Configuration lives in a YAML file (`config.yaml` by default). A missing
//! file is not an error: a default config derived from machine facts is
//! generated, written to the requested path, and used for the run. Partial
//! files parse too; every field has a sensible default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub task_polling: PollingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub git: GitConfig,
}

impl Config {
    /// Load configuration from `path`, generating a default file if absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let config = Self::default();
            let rendered = serde_yaml::to_string(&config)?;
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, rendered)?;
            info!(
                "Config file not found, generated a default at {}",
                path.display()
            );
            return Ok(config);
        }

        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Base URL of the control-plane API.
    #[serde(default = "default_platform_url")]
    pub url: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            url: default_platform_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Stable agent id, machine-derived when not configured.
    #[serde(default = "default_agent_id")]
    pub id: String,
    /// Base directory for per-task workspaces.
    #[serde(default = "default_workspace_dir")]
    pub workspace: PathBuf,
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
    /// Remove a task's workspace after its final status update.
    /// Defaults to false: artifacts are retained for inspection.
    #[serde(default)]
    pub cleanup_workspaces: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: default_agent_id(),
            workspace: default_workspace_dir(),
            tags: default_tags(),
            cleanup_workspaces: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between heartbeats.
    #[serde(default = "default_heartbeat_interval")]
    pub interval: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: default_heartbeat_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Seconds between task polls while idle.
    #[serde(default = "default_poll_interval")]
    pub interval: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_dir")]
    pub path: PathBuf,
    #[serde(default = "default_log_filename")]
    pub filename: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            path: default_log_dir(),
            filename: default_log_filename(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitConfig {
    /// Access token injected into https clone URLs, for private repositories.
    #[serde(default)]
    pub token: Option<String>,
}

impl GitConfig {
    /// The configured token, treating an empty string as unset.
    pub fn token(&self) -> Option<String> {
        self.token.as_ref().filter(|t| !t.is_empty()).cloned()
    }
}

fn default_platform_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_agent_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let digest = hex::encode(Sha256::digest(host.as_bytes()));
    format!("agent-{}-{}", host, &digest[..6])
}

fn default_workspace_dir() -> PathBuf {
    home_relative("workspace")
}

fn default_log_dir() -> PathBuf {
    home_relative("logs")
}

fn home_relative(dir: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("foreman")
        .join(dir)
}

fn default_tags() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_filename() -> String {
    "agent.log".to_string()
}
