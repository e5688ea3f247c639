//! Core type definitions for COE orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task identifier (assigned by the planner, stable across plan edits)
pub type TaskId = String;

/// Task status
///
/// Terminal states are `Verified` and a manually-resolved `Failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Ready,
    Blocked,
    InProgress,
    Done,
    Failed,
    Investigation,
    Verified,
}

impl TaskStatus {
    /// Whether no further automatic transition applies
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Blocked => write!(f, "blocked"),
            Self::InProgress => write!(f, "in-progress"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::Investigation => write!(f, "investigation"),
            Self::Verified => write!(f, "verified"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "blocked" => Ok(Self::Blocked),
            "in-progress" | "in_progress" | "inprogress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "investigation" => Ok(Self::Investigation),
            "verified" => Ok(Self::Verified),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

/// External agent roles the orchestrator brokers calls to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Produces free-form implementation proposals
    Planning,
    /// Judges submitted code, returns a [`Verdict`]
    Verification,
    /// Answers free-form questions
    Answer,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Verification => write!(f, "verification"),
            Self::Answer => write!(f, "answer"),
        }
    }
}

/// A unit of work in the backlog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Ids of tasks that must be done before this one is offered
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Estimated effort in hours
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_effort: Option<f32>,
    /// Plan feature this task implements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_team: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            status: TaskStatus::Pending,
            dependencies: Vec::new(),
            estimated_effort: None,
            feature_id: None,
            assigned_team: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<TaskId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_feature(mut self, feature_id: impl Into<String>) -> Self {
        self.feature_id = Some(feature_id.into());
        self
    }

    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.assigned_team = Some(team.into());
        self
    }

    pub fn with_effort(mut self, hours: f32) -> Self {
        self.estimated_effort = Some(hours);
        self
    }

    /// Set status and bump the update timestamp
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Outcome of a verification agent run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    pub explanation: String,
}

impl Verdict {
    pub fn pass(explanation: impl Into<String>) -> Self {
        Self {
            passed: true,
            explanation: explanation.into(),
        }
    }

    pub fn fail(explanation: impl Into<String>) -> Self {
        Self {
            passed: false,
            explanation: explanation.into(),
        }
    }
}

/// Flattened single-line form used on the control channel
impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "{} - {}", label, self.explanation)
    }
}
