//! Plan snapshot model
//!
//! Elements reference each other by id only: stories point at features
//! through `relatedBlockIds` (a feature is a "block" on the planning canvas),
//! criteria through `relatedFeatureIds`, links through
//! `sourceBlockId`/`targetBlockId`. Fields this model does not know about are
//! kept in `extra` so that edits to them still show up as modifications.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::graph::AdjacencyList;

/// Kind of element a change or an affected item refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementType {
    Feature,
    DevStory,
    UserStory,
    SuccessCriterion,
    DependencyLink,
    /// Ticket from the task-breakdown collaborator
    MasterTicket,
    /// Task from the task-breakdown collaborator
    Task,
}

impl ElementType {
    /// Human-readable label used in change descriptions
    pub fn label(&self) -> &'static str {
        match self {
            Self::Feature => "Feature",
            Self::DevStory => "Developer story",
            Self::UserStory => "User story",
            Self::SuccessCriterion => "Success criterion",
            Self::DependencyLink => "Dependency link",
            Self::MasterTicket => "Master ticket",
            Self::Task => "Task",
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Feature => write!(f, "feature"),
            Self::DevStory => write!(f, "devStory"),
            Self::UserStory => write!(f, "userStory"),
            Self::SuccessCriterion => write!(f, "successCriterion"),
            Self::DependencyLink => write!(f, "dependencyLink"),
            Self::MasterTicket => write!(f, "masterTicket"),
            Self::Task => write!(f, "task"),
        }
    }
}

/// Common view over the five plan collections
pub trait PlanElement: Serialize {
    const ELEMENT_TYPE: ElementType;

    fn id(&self) -> &str;

    /// Display name (falls back to the id when the element has none)
    fn label(&self) -> &str;
}

/// A feature block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Feature {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            extra: Map::new(),
        }
    }
}

/// A developer story
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevStory {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Features this story implements
    #[serde(default)]
    pub related_block_ids: Vec<String>,
    /// Other stories (developer or user) this story relates to
    #[serde(default)]
    pub related_story_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DevStory {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            related_block_ids: Vec::new(),
            related_story_ids: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn for_features(mut self, feature_ids: &[&str]) -> Self {
        self.related_block_ids = feature_ids.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// A user story
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStory {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub related_block_ids: Vec<String>,
    #[serde(default)]
    pub related_story_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserStory {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            related_block_ids: Vec::new(),
            related_story_ids: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn for_features(mut self, feature_ids: &[&str]) -> Self {
        self.related_block_ids = feature_ids.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// A success criterion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessCriterion {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub related_feature_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SuccessCriterion {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            related_feature_ids: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn for_features(mut self, feature_ids: &[&str]) -> Self {
        self.related_feature_ids = feature_ids.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// A dependency link between two features
///
/// Authored direction is kept for display; impact traversal treats links
/// as undirected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyLink {
    pub id: String,
    pub source_block_id: String,
    pub target_block_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DependencyLink {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_block_id: source.into(),
            target_block_id: target.into(),
            extra: Map::new(),
        }
    }

    pub fn touches(&self, feature_id: &str) -> bool {
        self.source_block_id == feature_id || self.target_block_id == feature_id
    }
}

macro_rules! plan_element {
    ($ty:ty, $kind:expr, $label:ident) => {
        impl PlanElement for $ty {
            const ELEMENT_TYPE: ElementType = $kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn label(&self) -> &str {
                if self.$label.is_empty() {
                    &self.id
                } else {
                    &self.$label
                }
            }
        }
    };
}

plan_element!(Feature, ElementType::Feature, name);
plan_element!(DevStory, ElementType::DevStory, title);
plan_element!(UserStory, ElementType::UserStory, title);
plan_element!(SuccessCriterion, ElementType::SuccessCriterion, description);
plan_element!(DependencyLink, ElementType::DependencyLink, id);

/// An immutable view of a plan at one point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSnapshot {
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub dev_stories: Vec<DevStory>,
    #[serde(default)]
    pub user_stories: Vec<UserStory>,
    #[serde(default)]
    pub success_criteria: Vec<SuccessCriterion>,
    #[serde(default)]
    pub dependency_links: Vec<DependencyLink>,
}

impl PlanSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
            && self.dev_stories.is_empty()
            && self.user_stories.is_empty()
            && self.success_criteria.is_empty()
            && self.dependency_links.is_empty()
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.push(feature);
        self
    }

    pub fn with_dev_story(mut self, story: DevStory) -> Self {
        self.dev_stories.push(story);
        self
    }

    pub fn with_user_story(mut self, story: UserStory) -> Self {
        self.user_stories.push(story);
        self
    }

    pub fn with_criterion(mut self, criterion: SuccessCriterion) -> Self {
        self.success_criteria.push(criterion);
        self
    }

    pub fn with_link(mut self, link: DependencyLink) -> Self {
        self.dependency_links.push(link);
        self
    }

    pub fn feature(&self, id: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.id == id)
    }

    pub fn dev_story(&self, id: &str) -> Option<&DevStory> {
        self.dev_stories.iter().find(|s| s.id == id)
    }

    pub fn user_story(&self, id: &str) -> Option<&UserStory> {
        self.user_stories.iter().find(|s| s.id == id)
    }

    pub fn criterion(&self, id: &str) -> Option<&SuccessCriterion> {
        self.success_criteria.iter().find(|c| c.id == id)
    }

    pub fn link(&self, id: &str) -> Option<&DependencyLink> {
        self.dependency_links.iter().find(|l| l.id == id)
    }

    /// Symmetric feature graph built from the dependency links
    pub fn adjacency(&self) -> AdjacencyList {
        AdjacencyList::from_links(&self.dependency_links)
    }
}
