//! Feature adjacency built from dependency links

use std::collections::HashMap;

use crate::plan::DependencyLink;

/// Symmetric feature-id graph
///
/// A link authored `A -> B` yields both `A -> B` and `B -> A`: a change to
/// either endpoint can affect the other regardless of authoring direction.
/// Neighbours keep first-seen order so traversal output is deterministic.
#[derive(Debug, Clone, Default)]
pub struct AdjacencyList {
    edges: HashMap<String, Vec<String>>,
}

impl AdjacencyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_links(links: &[DependencyLink]) -> Self {
        let mut graph = Self::new();
        for link in links {
            graph.add_edge(&link.source_block_id, &link.target_block_id);
        }
        graph
    }

    /// Add an undirected edge; self-loops and duplicates are ignored
    pub fn add_edge(&mut self, a: &str, b: &str) {
        if a == b {
            return;
        }
        self.insert(a, b);
        self.insert(b, a);
    }

    fn insert(&mut self, from: &str, to: &str) {
        let neighbours = self.edges.entry(from.to_string()).or_default();
        if !neighbours.iter().any(|n| n == to) {
            neighbours.push(to.to_string());
        }
    }

    pub fn neighbors(&self, id: &str) -> &[String] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.edges.contains_key(id)
    }

    /// Number of nodes with at least one edge
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
