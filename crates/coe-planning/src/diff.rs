//! Plan snapshot diffing

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::plan::{ElementType, PlanElement, PlanSnapshot};

/// How an element differs between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Removed => write!(f, "removed"),
            Self::Modified => write!(f, "modified"),
        }
    }
}

/// A single element-level edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanChange {
    pub element_type: ElementType,
    pub element_id: String,
    pub kind: ChangeKind,
    pub description: String,
}

impl PlanChange {
    pub fn new(element_type: ElementType, element_id: impl Into<String>, kind: ChangeKind) -> Self {
        let element_id = element_id.into();
        let description = format!("{} '{}' {}", element_type.label(), element_id, kind);
        Self {
            element_type,
            element_id,
            kind,
            description,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_removal(&self) -> bool {
        self.kind == ChangeKind::Removed
    }
}

/// Diff two snapshots collection by collection
///
/// Emits `added` for ids only in `new`, `removed` for ids only in `old`, and
/// `modified` for ids in both whose serialized content differs. Unchanged ids
/// produce nothing, so `detect_changes(p, p)` is always empty.
pub fn detect_changes(old: &PlanSnapshot, new: &PlanSnapshot) -> Vec<PlanChange> {
    let mut changes = Vec::new();
    diff_collection(&old.features, &new.features, &mut changes);
    diff_collection(&old.dev_stories, &new.dev_stories, &mut changes);
    diff_collection(&old.user_stories, &new.user_stories, &mut changes);
    diff_collection(&old.success_criteria, &new.success_criteria, &mut changes);
    diff_collection(&old.dependency_links, &new.dependency_links, &mut changes);
    changes
}

fn diff_collection<T: PlanElement>(old: &[T], new: &[T], changes: &mut Vec<PlanChange>) {
    // Later duplicates of an id win, matching a map keyed by id.
    let old_by_id: HashMap<&str, &T> = old.iter().map(|e| (e.id(), e)).collect();
    let new_by_id: HashMap<&str, &T> = new.iter().map(|e| (e.id(), e)).collect();

    let mut seen = HashSet::new();
    for element in new {
        let id = element.id();
        if !seen.insert(id) {
            continue;
        }
        let current = new_by_id[id];
        match old_by_id.get(id) {
            None => changes.push(
                PlanChange::new(T::ELEMENT_TYPE, id, ChangeKind::Added).with_description(
                    format!("{} '{}' added", T::ELEMENT_TYPE.label(), current.label()),
                ),
            ),
            Some(previous) if content_differs(*previous, current) => changes.push(
                PlanChange::new(T::ELEMENT_TYPE, id, ChangeKind::Modified).with_description(
                    format!("{} '{}' modified", T::ELEMENT_TYPE.label(), current.label()),
                ),
            ),
            Some(_) => {}
        }
    }

    let mut seen = HashSet::new();
    for element in old {
        let id = element.id();
        if !seen.insert(id) || new_by_id.contains_key(id) {
            continue;
        }
        changes.push(
            PlanChange::new(T::ELEMENT_TYPE, id, ChangeKind::Removed).with_description(format!(
                "{} '{}' removed",
                T::ELEMENT_TYPE.label(),
                old_by_id[id].label()
            )),
        );
    }
}

fn content_differs<T: PlanElement>(a: &T, b: &T) -> bool {
    serde_json::to_value(a).ok() != serde_json::to_value(b).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{DependencyLink, DevStory, Feature, SuccessCriterion, UserStory};

    fn sample_plan() -> PlanSnapshot {
        PlanSnapshot::new()
            .with_feature(Feature::new("F1", "Login"))
            .with_feature(Feature::new("F2", "Profile"))
            .with_dev_story(DevStory::new("D1", "Session API").for_features(&["F1"]))
            .with_user_story(UserStory::new("U1", "Sign in").for_features(&["F1"]))
            .with_criterion(SuccessCriterion::new("C1", "p95 < 200ms").for_features(&["F1"]))
            .with_link(DependencyLink::new("L1", "F2", "F1"))
    }

    #[test]
    fn test_identical_snapshots_have_no_changes() {
        let plan = sample_plan();
        assert!(detect_changes(&plan, &plan).is_empty());
        assert!(detect_changes(&PlanSnapshot::new(), &PlanSnapshot::new()).is_empty());
    }

    #[test]
    fn test_removed_feature_yields_single_removal() {
        let old = PlanSnapshot::new().with_feature(Feature::new("F1", "Login"));
        let new = PlanSnapshot::new();

        let changes = detect_changes(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].element_type, ElementType::Feature);
        assert_eq!(changes[0].element_id, "F1");
        assert_eq!(changes[0].kind, ChangeKind::Removed);
        assert_eq!(changes[0].description, "Feature 'Login' removed");
    }

    #[test]
    fn test_added_and_modified() {
        let old = sample_plan();
        let mut new = sample_plan();
        new.features[1].description = "Edit avatar and bio".to_string();
        new.user_stories.push(UserStory::new("U2", "Reset password"));

        let changes = detect_changes(&old, &new);
        assert_eq!(changes.len(), 2);
        assert_eq!(
            changes[0],
            PlanChange::new(ElementType::Feature, "F2", ChangeKind::Modified)
                .with_description("Feature 'Profile' modified")
        );
        assert_eq!(changes[1].element_type, ElementType::UserStory);
        assert_eq!(changes[1].kind, ChangeKind::Added);
    }

    #[test]
    fn test_extra_fields_count_as_content() {
        let old = sample_plan();
        let mut new = sample_plan();
        new.features[0]
            .extra
            .insert("x".to_string(), serde_json::json!(300));

        let changes = detect_changes(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].element_id, "F1");
        assert_eq!(changes[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn test_link_retarget_is_modification() {
        let old = sample_plan();
        let mut new = sample_plan();
        new.dependency_links[0].target_block_id = "F3".to_string();

        let changes = detect_changes(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].element_type, ElementType::DependencyLink);
        assert_eq!(changes[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn test_change_kind_wire_format() {
        let change = PlanChange::new(ElementType::DevStory, "D1", ChangeKind::Removed);
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["elementType"], "devStory");
        assert_eq!(json["kind"], "removed");
    }
}
