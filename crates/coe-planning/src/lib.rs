//! COE Planning - plan snapshots and change impact analysis
//!
//! A plan is five id-keyed collections (features, developer stories, user
//! stories, success criteria, dependency links) that cross-reference each
//! other by id. This crate diffs two plan snapshots into [`PlanChange`]s and
//! traces each change through those references to find everything it
//! touches, with a coarse risk level and a rework estimate.

pub mod breakdown;
pub mod diff;
pub mod graph;
pub mod impact;
pub mod plan;

pub use breakdown::{BreakdownTask, MasterTicket, StaticBreakdown, TaskBreakdown, TaskBreakdownResult};
pub use diff::{detect_changes, ChangeKind, PlanChange};
pub use graph::AdjacencyList;
pub use impact::{
    analyze_impact, analyze_impact_with_tasks, compute_overall_risk, compute_summary, AffectedItem,
    ChangeAnalysisResult, ImpactAnalyzer, ImpactSummary, RiskLevel, Severity,
};
pub use plan::{
    DependencyLink, DevStory, ElementType, Feature, PlanElement, PlanSnapshot, SuccessCriterion,
    UserStory,
};
