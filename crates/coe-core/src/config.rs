//! Configuration management for COE
//!
//! Repository-level settings: stability gate timing, impact analysis knobs,
//! rework weights, and the external commands backing each agent role.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{CoeError, Result};

/// Repository-level COE configuration
///
/// Loaded from `.coe/config.toml` in the repo root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoeConfig {
    /// Quiet-period gate used before verification
    #[serde(default)]
    pub stability: StabilityConfig,

    /// Change impact traversal settings
    #[serde(default)]
    pub impact: ImpactConfig,

    /// Rework estimate weights
    #[serde(default)]
    pub rework: ReworkWeights,

    /// External agent commands
    #[serde(default)]
    pub agents: AgentsConfig,
}

/// Stability gate timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilityConfig {
    /// Quiet period with no reported change, in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Upper bound on the total wait, in milliseconds
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl StabilityConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Change impact traversal settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactConfig {
    /// Follow dependency links to neighbouring features
    #[serde(default = "default_true")]
    pub include_transitive: bool,

    /// Maximum recursion depth for transitive feature traversal
    #[serde(default = "default_max_traversal_depth")]
    pub max_traversal_depth: usize,

    /// Ask the task-breakdown collaborator for affected tickets and teams
    #[serde(default = "default_true")]
    pub include_task_impact: bool,
}

/// Minutes of rework charged per affected item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReworkWeights {
    #[serde(default = "default_minutes_per_feature")]
    pub minutes_per_feature: u32,

    #[serde(default = "default_minutes_per_story")]
    pub minutes_per_story: u32,

    #[serde(default = "default_minutes_per_task")]
    pub minutes_per_task: u32,
}

/// Commands backing the planning, verification and answer agents
///
/// Each command receives the prompt on stdin and replies on stdout.
/// An empty command leaves that role unconfigured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub planning_command: Vec<String>,

    #[serde(default)]
    pub verification_command: Vec<String>,

    #[serde(default)]
    pub answer_command: Vec<String>,

    /// Per-call timeout; unbounded when absent
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

// Default value providers
fn default_delay_ms() -> u64 {
    60_000
}

fn default_max_wait_ms() -> u64 {
    300_000
}

fn default_true() -> bool {
    true
}

fn default_max_traversal_depth() -> usize {
    5
}

fn default_minutes_per_feature() -> u32 {
    60
}

fn default_minutes_per_story() -> u32 {
    15
}

fn default_minutes_per_task() -> u32 {
    30
}

impl CoeConfig {
    /// Load configuration from `.coe/config.toml` or use defaults
    pub fn load_or_default(repo_root: &Path) -> Result<Self> {
        let config_path = repo_root.join(".coe/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| CoeError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Write default configuration to `.coe/config.toml`
    pub fn write_default(repo_root: &Path) -> Result<()> {
        let config_dir = repo_root.join(".coe");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| CoeError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            include_transitive: true,
            max_traversal_depth: default_max_traversal_depth(),
            include_task_impact: true,
        }
    }
}

impl Default for ReworkWeights {
    fn default() -> Self {
        Self {
            minutes_per_feature: default_minutes_per_feature(),
            minutes_per_story: default_minutes_per_story(),
            minutes_per_task: default_minutes_per_task(),
        }
    }
}
