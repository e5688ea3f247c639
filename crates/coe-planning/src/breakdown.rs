//! Task-breakdown collaborator boundary
//!
//! The breakdown generator turns a plan into master tickets and tasks keyed
//! by feature id. Impact analysis consults it to report which tickets, tasks
//! and teams a plan edit reaches; it is advisory and may fail freely.

use async_trait::async_trait;
use coe_core::{Result, Task};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::plan::PlanSnapshot;

/// A master ticket grouping the tasks of one feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterTicket {
    pub id: String,
    pub feature_id: String,
    #[serde(default)]
    pub title: String,
}

/// A task produced by the breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownTask {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub feature_id: String,
    #[serde(default)]
    pub master_ticket_id: Option<String>,
    #[serde(default)]
    pub assigned_team: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBreakdownResult {
    #[serde(default)]
    pub master_tickets: Vec<MasterTicket>,
    #[serde(default)]
    pub tasks: Vec<BreakdownTask>,
}

impl TaskBreakdownResult {
    /// Derive a breakdown from backlog tasks that carry a feature id
    pub fn from_backlog<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let tasks = tasks
            .into_iter()
            .filter_map(|task| {
                task.feature_id.as_ref().map(|feature_id| BreakdownTask {
                    id: task.id.clone(),
                    title: task.title.clone(),
                    feature_id: feature_id.clone(),
                    master_ticket_id: None,
                    assigned_team: task.assigned_team.clone(),
                })
            })
            .collect();
        Self {
            master_tickets: Vec::new(),
            tasks,
        }
    }

    /// Teams assigned to tasks of the given features, sorted and deduplicated
    pub fn teams_for(&self, feature_ids: &HashSet<String>) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| feature_ids.contains(&t.feature_id))
            .filter_map(|t| t.assigned_team.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Source of master tickets and tasks for a plan
#[async_trait]
pub trait TaskBreakdown: Send + Sync {
    async fn breakdown(&self, plan: &PlanSnapshot) -> Result<TaskBreakdownResult>;
}

/// Breakdown that always answers with a fixed result
///
/// Used when the tickets are already known, e.g. loaded from a file or
/// derived from the orchestrator's backlog.
#[derive(Debug, Clone, Default)]
pub struct StaticBreakdown {
    result: TaskBreakdownResult,
}

impl StaticBreakdown {
    pub fn new(result: TaskBreakdownResult) -> Self {
        Self { result }
    }
}

#[async_trait]
impl TaskBreakdown for StaticBreakdown {
    async fn breakdown(&self, _plan: &PlanSnapshot) -> Result<TaskBreakdownResult> {
        Ok(self.result.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_backlog_skips_tasks_without_feature() {
        let tasks = vec![
            Task::new("T1", "Login form").with_feature("F1").with_team("web"),
            Task::new("T2", "CI cache"),
        ];
        let result = TaskBreakdownResult::from_backlog(&tasks);
        assert_eq!(result.tasks.len(), 1);
        assert_eq!(result.tasks[0].id, "T1");
        assert_eq!(result.tasks[0].assigned_team.as_deref(), Some("web"));
    }

    #[test]
    fn test_teams_for_is_sorted_and_unique() {
        let tasks = vec![
            Task::new("T1", "a").with_feature("F1").with_team("web"),
            Task::new("T2", "b").with_feature("F1").with_team("api"),
            Task::new("T3", "c").with_feature("F1").with_team("web"),
            Task::new("T4", "d").with_feature("F2").with_team("mobile"),
        ];
        let result = TaskBreakdownResult::from_backlog(&tasks);
        let features: HashSet<String> = ["F1".to_string()].into_iter().collect();
        assert_eq!(result.teams_for(&features), vec!["api", "web"]);
    }

    #[tokio::test]
    async fn test_static_breakdown_returns_fixed_result() {
        let fixed = TaskBreakdownResult {
            master_tickets: vec![MasterTicket {
                id: "M1".into(),
                feature_id: "F1".into(),
                title: "Login".into(),
            }],
            tasks: Vec::new(),
        };
        let breakdown = StaticBreakdown::new(fixed.clone());
        let result = breakdown.breakdown(&PlanSnapshot::new()).await.unwrap();
        assert_eq!(result, fixed);
    }
}
