//! Agent identity and status

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Stable identity reported to the platform. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub id: String,
    pub version: String,
    pub tags: Vec<String>,
}

impl AgentIdentity {
    pub fn from_config(config: &Config, version: impl Into<String>) -> Self {
        Self {
            id: config.agent.id.clone(),
            version: version.into(),
            tags: config.agent.tags.clone(),
        }
    }
}

/// What the agent is currently doing, as reported in heartbeats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Busy,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
