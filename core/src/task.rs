//! Task wire model
//!
//! Tasks are deserialized from the platform's poll response. One task at a
//! time is owned by the agent for the duration of a single execution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default script timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 1800;

/// One unit of work: a script plus its execution parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub script: String,
    #[serde(default)]
    pub git_repo: Option<GitRepo>,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    /// Script timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Wipe any stale workspace contents before this task runs.
    #[serde(default = "default_workspace_clean")]
    pub workspace_clean: bool,
}

impl Task {
    /// Create a task with default execution parameters.
    pub fn new(id: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            script: script.into(),
            git_repo: None,
            env_vars: HashMap::new(),
            timeout: DEFAULT_TIMEOUT_SECS,
            workspace_clean: true,
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the repository to check out before the script runs
    pub fn with_git_repo(mut self, url: impl Into<String>, branch: impl Into<String>) -> Self {
        self.git_repo = Some(GitRepo {
            url: url.into(),
            branch: branch.into(),
        });
        self
    }

    /// Set the timeout in seconds
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a task-specific environment variable
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }
}

/// Repository to check out into the workspace before the script runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitRepo {
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

/// Task status reported to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Success,
    Failed,
    Timeout,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_workspace_clean() -> bool {
    true
}

fn default_branch() -> String {
    "main".to_string()
}
