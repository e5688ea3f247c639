//! Change impact analysis
//!
//! Traces each [`PlanChange`] through the plan's cross-references and
//! dependency links, then rolls the affected items up into a risk level and
//! a rework estimate. The traversal is a pure function of the snapshot; only
//! the optional task-breakdown step talks to a collaborator, and that step is
//! fail-open.

use coe_core::config::{CoeConfig, ImpactConfig, ReworkWeights};
use coe_core::fail_open::fail_open;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};

use crate::breakdown::{TaskBreakdown, TaskBreakdownResult};
use crate::diff::{detect_changes, ChangeKind, PlanChange};
use crate::graph::AdjacencyList;
use crate::plan::{ElementType, PlanElement, PlanSnapshot};

/// How strongly an affected item is implicated
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Overall blast radius of a set of changes
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A plan or task element implicated by a traced change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedItem {
    #[serde(rename = "type")]
    pub item_type: ElementType,
    pub id: String,
    pub name: String,
    pub reason: String,
    pub severity: Severity,
}

/// Counts, teams and rework estimate for an analysis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactSummary {
    pub total_changes: usize,
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub affected_features: usize,
    pub affected_stories: usize,
    pub affected_criteria: usize,
    pub affected_links: usize,
    /// Master tickets and tasks
    pub affected_tasks: usize,
    pub affected_teams: Vec<String>,
    pub estimated_rework_minutes: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAnalysisResult {
    pub changes: Vec<PlanChange>,
    pub affected_items: Vec<AffectedItem>,
    pub overall_risk: RiskLevel,
    pub summary: ImpactSummary,
    pub warnings: Vec<String>,
}

impl ChangeAnalysisResult {
    /// Result for an empty change list: nothing affected, low risk
    pub fn empty() -> Self {
        Self::default()
    }

    /// Ids of affected items of one type, in traversal order
    pub fn affected_ids(&self, item_type: ElementType) -> Vec<&str> {
        self.affected_items
            .iter()
            .filter(|i| i.item_type == item_type)
            .map(|i| i.id.as_str())
            .collect()
    }

    pub fn find(&self, item_type: ElementType, id: &str) -> Option<&AffectedItem> {
        self.affected_items
            .iter()
            .find(|i| i.item_type == item_type && i.id == id)
    }
}

impl std::fmt::Display for ChangeAnalysisResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = &self.summary;
        writeln!(
            f,
            "Change impact: {} risk",
            self.overall_risk.to_string().to_uppercase()
        )?;
        writeln!(
            f,
            "  Changes: {} ({} added, {} removed, {} modified)",
            s.total_changes, s.added, s.removed, s.modified
        )?;
        writeln!(
            f,
            "  Affected: {} features, {} stories, {} criteria, {} links, {} tasks",
            s.affected_features,
            s.affected_stories,
            s.affected_criteria,
            s.affected_links,
            s.affected_tasks
        )?;
        if !s.affected_teams.is_empty() {
            writeln!(f, "  Teams: {}", s.affected_teams.join(", "))?;
        }
        writeln!(
            f,
            "  Estimated rework: {}h {}m",
            s.estimated_rework_minutes / 60,
            s.estimated_rework_minutes % 60
        )?;

        if !self.affected_items.is_empty() {
            writeln!(f)?;
            writeln!(f, "Affected items:")?;
            for item in &self.affected_items {
                writeln!(
                    f,
                    "  [{}] {} {} \"{}\" - {}",
                    item.severity, item.item_type, item.id, item.name, item.reason
                )?;
            }
        }

        if !self.warnings.is_empty() {
            writeln!(f)?;
            writeln!(f, "Warnings:")?;
            for warning in &self.warnings {
                writeln!(f, "  - {}", warning)?;
            }
        }
        Ok(())
    }
}

/// Rule table mapping changes and affected items to a risk level
///
/// Monotonically non-decreasing in the number of affected items and in the
/// number of high/critical items.
pub fn compute_overall_risk(changes: &[PlanChange], affected: &[AffectedItem]) -> RiskLevel {
    let has_removal = changes.iter().any(PlanChange::is_removal);
    let any_critical = affected.iter().any(|i| i.severity == Severity::Critical);
    let high_count = affected
        .iter()
        .filter(|i| i.severity == Severity::High)
        .count();
    let total = affected.len();

    if any_critical || (has_removal && total > 10) {
        RiskLevel::Critical
    } else if high_count > 2 || total > 15 {
        RiskLevel::High
    } else if total > 5 || has_removal {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Count affected items by category and estimate rework
///
/// The estimate is a fixed linear weighting, not a measurement.
pub fn compute_summary(
    changes: &[PlanChange],
    affected: &[AffectedItem],
    teams: &[String],
    weights: &ReworkWeights,
) -> ImpactSummary {
    let count_kind = |kind: ChangeKind| changes.iter().filter(|c| c.kind == kind).count();
    let count_types = |types: &[ElementType]| {
        affected
            .iter()
            .filter(|i| types.contains(&i.item_type))
            .count()
    };

    let affected_features = count_types(&[ElementType::Feature]);
    let affected_stories = count_types(&[ElementType::DevStory, ElementType::UserStory]);
    let affected_tasks = count_types(&[ElementType::MasterTicket, ElementType::Task]);

    // Saturates rather than wrapping on oversized weights
    let charge = |count: usize, minutes: u32| {
        u32::try_from(count)
            .unwrap_or(u32::MAX)
            .saturating_mul(minutes)
    };
    let estimated_rework_minutes = charge(affected_features, weights.minutes_per_feature)
        .saturating_add(charge(affected_stories, weights.minutes_per_story))
        .saturating_add(charge(affected_tasks, weights.minutes_per_task));

    ImpactSummary {
        total_changes: changes.len(),
        added: count_kind(ChangeKind::Added),
        removed: count_kind(ChangeKind::Removed),
        modified: count_kind(ChangeKind::Modified),
        affected_features,
        affected_stories,
        affected_criteria: count_types(&[ElementType::SuccessCriterion]),
        affected_links: count_types(&[ElementType::DependencyLink]),
        affected_tasks,
        affected_teams: teams.to_vec(),
        estimated_rework_minutes,
    }
}

/// Analyze changes against a plan with default rework weights
pub fn analyze_impact(
    plan: &PlanSnapshot,
    changes: &[PlanChange],
    config: &ImpactConfig,
) -> ChangeAnalysisResult {
    ImpactAnalyzer::new(config.clone()).analyze(plan, changes)
}

/// Analyze changes and consult the task-breakdown collaborator
pub async fn analyze_impact_with_tasks(
    plan: &PlanSnapshot,
    changes: &[PlanChange],
    config: &ImpactConfig,
    breakdown: &dyn TaskBreakdown,
) -> ChangeAnalysisResult {
    ImpactAnalyzer::new(config.clone())
        .analyze_with_tasks(plan, None, changes, breakdown)
        .await
}

/// Change impact engine
///
/// Holds only configuration; safe to share and to call concurrently.
#[derive(Debug, Clone, Default)]
pub struct ImpactAnalyzer {
    config: ImpactConfig,
    weights: ReworkWeights,
}

impl ImpactAnalyzer {
    pub fn new(config: ImpactConfig) -> Self {
        Self {
            config,
            weights: ReworkWeights::default(),
        }
    }

    pub fn from_config(config: &CoeConfig) -> Self {
        Self::new(config.impact.clone()).with_weights(config.rework.clone())
    }

    pub fn with_weights(mut self, weights: ReworkWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn config(&self) -> &ImpactConfig {
        &self.config
    }

    /// Trace `changes` through `plan`
    pub fn analyze(&self, plan: &PlanSnapshot, changes: &[PlanChange]) -> ChangeAnalysisResult {
        self.analyze_against(plan, None, changes)
    }

    /// Diff two snapshots and trace the result through `new`
    ///
    /// `old` resolves elements that no longer exist in `new`.
    pub fn analyze_plan_update(
        &self,
        old: &PlanSnapshot,
        new: &PlanSnapshot,
    ) -> ChangeAnalysisResult {
        let changes = detect_changes(old, new);
        self.analyze_against(new, Some(old), &changes)
    }

    /// Trace `changes` through `plan`, resolving removed elements in `previous`
    #[instrument(skip_all, fields(changes = changes.len()))]
    pub fn analyze_against(
        &self,
        plan: &PlanSnapshot,
        previous: Option<&PlanSnapshot>,
        changes: &[PlanChange],
    ) -> ChangeAnalysisResult {
        if changes.is_empty() {
            return ChangeAnalysisResult::empty();
        }
        let trace = self.trace(plan, previous, changes);
        trace.finish(changes, Vec::new(), &self.weights)
    }

    /// Like [`analyze_against`](Self::analyze_against), plus tickets, tasks
    /// and teams from the breakdown collaborator
    ///
    /// A failing collaborator degrades to "no task impact"; the plan-level
    /// analysis is still returned.
    #[instrument(skip_all, fields(changes = changes.len()))]
    pub async fn analyze_with_tasks(
        &self,
        plan: &PlanSnapshot,
        previous: Option<&PlanSnapshot>,
        changes: &[PlanChange],
        breakdown: &dyn TaskBreakdown,
    ) -> ChangeAnalysisResult {
        if changes.is_empty() {
            return ChangeAnalysisResult::empty();
        }
        let mut trace = self.trace(plan, previous, changes);

        let mut teams = Vec::new();
        if self.config.include_task_impact {
            if let Some(result) = fail_open("task_breakdown", || breakdown.breakdown(plan)).await {
                teams = trace.record_task_impact(&result, changes);
            }
        }

        trace.finish(changes, teams, &self.weights)
    }

    fn trace<'a>(
        &'a self,
        plan: &'a PlanSnapshot,
        previous: Option<&'a PlanSnapshot>,
        changes: &[PlanChange],
    ) -> Trace<'a> {
        let mut trace = Trace::new(plan, previous, &self.config);
        for change in changes {
            trace.trace_change(change);
        }
        debug!(
            affected = trace.items.len(),
            warnings = trace.warnings.len(),
            "Impact traversal complete"
        );
        trace
    }
}

/// Mutable traversal state for one analysis
struct Trace<'a> {
    plan: &'a PlanSnapshot,
    previous: Option<&'a PlanSnapshot>,
    config: &'a ImpactConfig,
    adjacency: AdjacencyList,
    previous_adjacency: Option<AdjacencyList>,
    visited: HashSet<(ElementType, String)>,
    items: Vec<AffectedItem>,
    index: HashMap<(ElementType, String), usize>,
    warnings: Vec<String>,
}

impl<'a> Trace<'a> {
    fn new(
        plan: &'a PlanSnapshot,
        previous: Option<&'a PlanSnapshot>,
        config: &'a ImpactConfig,
    ) -> Self {
        Self {
            plan,
            previous,
            config,
            adjacency: plan.adjacency(),
            previous_adjacency: previous.map(PlanSnapshot::adjacency),
            visited: HashSet::new(),
            items: Vec::new(),
            index: HashMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Record an item, keeping the highest severity per (type, id)
    fn record(
        &mut self,
        item_type: ElementType,
        id: &str,
        name: &str,
        severity: Severity,
        reason: String,
    ) {
        let key = (item_type, id.to_string());
        if let Some(&idx) = self.index.get(&key) {
            let existing = &mut self.items[idx];
            if severity > existing.severity {
                existing.severity = severity;
                existing.reason = reason;
            }
            return;
        }
        self.index.insert(key, self.items.len());
        self.items.push(AffectedItem {
            item_type,
            id: id.to_string(),
            name: name.to_string(),
            reason,
            severity,
        });
    }

    fn warn(&mut self, warning: String) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    fn trace_change(&mut self, change: &PlanChange) {
        // Each change gets its own visited set; a feature reached as a
        // neighbour of one change may still be traced as the origin of another.
        self.visited.clear();
        match change.element_type {
            ElementType::Feature => self.trace_feature(&change.element_id, change.kind, 0),
            ElementType::DevStory | ElementType::UserStory => self.trace_story(change),
            ElementType::SuccessCriterion => self.trace_criterion(change),
            ElementType::DependencyLink => self.trace_link(change),
            ElementType::MasterTicket | ElementType::Task => self.warn(format!(
                "{} '{}' is not a plan element; change not traced",
                change.element_type.label(),
                change.element_id
            )),
        }
    }

    fn trace_feature(&mut self, feature_id: &str, kind: ChangeKind, depth: usize) {
        if !self
            .visited
            .insert((ElementType::Feature, feature_id.to_string()))
        {
            return;
        }

        let plan = self.plan;
        let removal = kind == ChangeKind::Removed;
        let feature = self.feature_name(feature_id);
        let why = if depth == 0 {
            format!("Feature '{}' was {}", feature, kind)
        } else {
            format!("Linked feature '{}' is affected", feature)
        };

        for story in plan
            .dev_stories
            .iter()
            .filter(|s| s.related_block_ids.iter().any(|id| id == feature_id))
        {
            let severity = if removal { Severity::High } else { Severity::Medium };
            self.record(ElementType::DevStory, &story.id, story.label(), severity, why.clone());
        }

        for story in plan
            .user_stories
            .iter()
            .filter(|s| s.related_block_ids.iter().any(|id| id == feature_id))
        {
            let severity = if removal { Severity::High } else { Severity::Low };
            self.record(ElementType::UserStory, &story.id, story.label(), severity, why.clone());
        }

        for criterion in plan
            .success_criteria
            .iter()
            .filter(|c| c.related_feature_ids.iter().any(|id| id == feature_id))
        {
            let severity = if removal { Severity::High } else { Severity::Medium };
            self.record(
                ElementType::SuccessCriterion,
                &criterion.id,
                criterion.label(),
                severity,
                why.clone(),
            );
        }

        if removal {
            for link in plan.dependency_links.iter().filter(|l| l.touches(feature_id)) {
                self.record(
                    ElementType::DependencyLink,
                    &link.id,
                    link.label(),
                    Severity::High,
                    format!("Link endpoint '{}' was removed", feature),
                );
            }
        }

        if !self.config.include_transitive {
            return;
        }

        for neighbour in self.neighbours(feature_id) {
            if self
                .visited
                .contains(&(ElementType::Feature, neighbour.clone()))
            {
                continue;
            }
            if depth + 1 > self.config.max_traversal_depth {
                self.warn(format!(
                    "Maximum traversal depth ({}) reached at feature '{}'; not following link to '{}'",
                    self.config.max_traversal_depth, feature_id, neighbour
                ));
                continue;
            }

            let severity = if removal { Severity::Medium } else { Severity::Low };
            let name = self.feature_name(&neighbour);
            self.record(
                ElementType::Feature,
                &neighbour,
                &name,
                severity,
                format!("Linked to feature '{}' ({} hop(s) away)", feature, depth + 1),
            );
            self.trace_feature(&neighbour, ChangeKind::Modified, depth + 1);
        }
    }

    fn trace_story(&mut self, change: &PlanChange) {
        let id = change.element_id.as_str();
        let refs = match change.element_type {
            ElementType::DevStory => self
                .find(|p| p.dev_story(id))
                .map(|s| (s.related_block_ids.clone(), s.related_story_ids.clone())),
            _ => self
                .find(|p| p.user_story(id))
                .map(|s| (s.related_block_ids.clone(), s.related_story_ids.clone())),
        };
        let Some((feature_ids, story_ids)) = refs else {
            self.warn(format!(
                "{} '{}' not found in plan; references not traced",
                change.element_type.label(),
                id
            ));
            return;
        };

        let why = format!(
            "Referenced by {} '{}' ({})",
            change.element_type.label().to_lowercase(),
            id,
            change.kind
        );

        for feature_id in &feature_ids {
            let name = self.feature_name(feature_id);
            self.record(ElementType::Feature, feature_id, &name, Severity::Low, why.clone());
        }

        // Related stories in both directions: the ones this story names and
        // the ones naming this story.
        let plan = self.plan;
        let mut related: Vec<String> = story_ids;
        related.extend(
            plan.dev_stories
                .iter()
                .filter(|s| s.related_story_ids.iter().any(|r| r == id))
                .map(|s| s.id.clone()),
        );
        related.extend(
            plan.user_stories
                .iter()
                .filter(|s| s.related_story_ids.iter().any(|r| r == id))
                .map(|s| s.id.clone()),
        );

        for story_id in related.iter().filter(|s| s.as_str() != id) {
            if let Some(story) = self.find(|p| p.dev_story(story_id)) {
                let label = story.label().to_string();
                self.record(ElementType::DevStory, story_id, &label, Severity::Low, why.clone());
            } else if let Some(story) = self.find(|p| p.user_story(story_id)) {
                let label = story.label().to_string();
                self.record(ElementType::UserStory, story_id, &label, Severity::Low, why.clone());
            }
        }
    }

    fn trace_criterion(&mut self, change: &PlanChange) {
        let id = change.element_id.as_str();
        let Some(criterion) = self.find(|p| p.criterion(id)) else {
            self.warn(format!(
                "Success criterion '{}' not found in plan; references not traced",
                id
            ));
            return;
        };

        let why = format!("Success criterion '{}' was {}", id, change.kind);
        for feature_id in &criterion.related_feature_ids {
            let name = self.feature_name(feature_id);
            self.record(ElementType::Feature, feature_id, &name, Severity::Low, why.clone());
        }
    }

    fn trace_link(&mut self, change: &PlanChange) {
        let id = change.element_id.as_str();
        let Some(link) = self.find(|p| p.link(id)) else {
            self.warn(format!(
                "Dependency link '{}' not found in plan; endpoints not traced",
                id
            ));
            return;
        };

        let why = format!("Endpoint of dependency link '{}' ({})", id, change.kind);
        for feature_id in [&link.source_block_id, &link.target_block_id] {
            let name = self.feature_name(feature_id);
            self.record(ElementType::Feature, feature_id, &name, Severity::Medium, why.clone());
        }
    }

    /// Add tickets and tasks tied to affected or changed features
    ///
    /// Returns the teams assigned to those tasks.
    fn record_task_impact(
        &mut self,
        breakdown: &TaskBreakdownResult,
        changes: &[PlanChange],
    ) -> Vec<String> {
        let mut feature_ids: HashSet<String> = self
            .items
            .iter()
            .filter(|i| i.item_type == ElementType::Feature)
            .map(|i| i.id.clone())
            .collect();
        feature_ids.extend(
            changes
                .iter()
                .filter(|c| c.element_type == ElementType::Feature)
                .map(|c| c.element_id.clone()),
        );
        let removed: HashSet<&str> = changes
            .iter()
            .filter(|c| c.element_type == ElementType::Feature && c.is_removal())
            .map(|c| c.element_id.as_str())
            .collect();

        let severity_for = |feature_id: &str| {
            if removed.contains(feature_id) {
                Severity::High
            } else {
                Severity::Medium
            }
        };

        for ticket in breakdown
            .master_tickets
            .iter()
            .filter(|t| feature_ids.contains(&t.feature_id))
        {
            let name = if ticket.title.is_empty() {
                &ticket.id
            } else {
                &ticket.title
            };
            self.record(
                ElementType::MasterTicket,
                &ticket.id,
                name,
                severity_for(&ticket.feature_id),
                format!("Ticket for affected feature '{}'", ticket.feature_id),
            );
        }

        for task in breakdown
            .tasks
            .iter()
            .filter(|t| feature_ids.contains(&t.feature_id))
        {
            let name = if task.title.is_empty() {
                &task.id
            } else {
                &task.title
            };
            self.record(
                ElementType::Task,
                &task.id,
                name,
                severity_for(&task.feature_id),
                format!("Task for affected feature '{}'", task.feature_id),
            );
        }

        breakdown.teams_for(&feature_ids)
    }

    fn finish(
        self,
        changes: &[PlanChange],
        teams: Vec<String>,
        weights: &ReworkWeights,
    ) -> ChangeAnalysisResult {
        let overall_risk = compute_overall_risk(changes, &self.items);
        let summary = compute_summary(changes, &self.items, &teams, weights);
        ChangeAnalysisResult {
            changes: changes.to_vec(),
            affected_items: self.items,
            overall_risk,
            summary,
            warnings: self.warnings,
        }
    }

    /// Look an element up in the current plan, then in the previous one
    fn find<T>(&self, lookup: impl Fn(&'a PlanSnapshot) -> Option<&'a T>) -> Option<&'a T> {
        lookup(self.plan).or_else(|| self.previous.and_then(&lookup))
    }

    fn feature_name(&self, feature_id: &str) -> String {
        self.find(|p| p.feature(feature_id))
            .map(|f| f.label().to_string())
            .unwrap_or_else(|| feature_id.to_string())
    }

    /// Neighbours across both snapshots' links
    fn neighbours(&self, feature_id: &str) -> Vec<String> {
        let mut out: Vec<String> = self.adjacency.neighbors(feature_id).to_vec();
        if let Some(previous) = &self.previous_adjacency {
            for n in previous.neighbors(feature_id) {
                if !out.contains(n) {
                    out.push(n.clone());
                }
            }
        }
        out
    }
}
