//! Discovery graph projection over the provenance log.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::instrument;

use opencraft_shared::{BASE_ELEMENTS, PLACEHOLDER_EMOJI, Result};
use opencraft_storage::Storage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub emoji: String,
}

/// One craft: two operands flowing into a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub from1: String,
    pub from2: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Accumulates nodes in first-seen order, deduplicated case-insensitively.
struct NodeSet<'a> {
    registry: &'a HashMap<String, String>,
    seen: HashSet<String>,
    nodes: Vec<GraphNode>,
}

impl<'a> NodeSet<'a> {
    fn new(registry: &'a HashMap<String, String>) -> Self {
        Self {
            registry,
            seen: HashSet::new(),
            nodes: Vec::new(),
        }
    }

    /// Add `name` unless present. The registry emoji wins over `fallback`.
    fn add(&mut self, name: &str, fallback: Option<&str>) {
        let key = name.to_lowercase();
        if !self.seen.insert(key.clone()) {
            return;
        }
        let emoji = self
            .registry
            .get(&key)
            .map(String::as_str)
            .or(fallback)
            .filter(|e| !e.is_empty())
            .unwrap_or(PLACEHOLDER_EMOJI);
        self.nodes.push(GraphNode {
            id: name.to_string(),
            label: name.to_string(),
            emoji: emoji.to_string(),
        });
    }
}

/// Build the graph for one user's log, or for everyone when `username` is
/// `None`. The base elements are always present.
#[instrument(skip(storage))]
pub async fn graph(storage: &Storage, username: Option<&str>) -> Result<GraphView> {
    let registry: HashMap<String, String> = storage
        .list_materials()
        .await?
        .into_iter()
        .map(|m| (m.name.to_lowercase(), m.emoji))
        .collect();
    let log = storage.list_combinations(username).await?;

    let mut nodes = NodeSet::new(&registry);
    for (name, emoji) in BASE_ELEMENTS {
        nodes.add(name, Some(emoji));
    }

    let mut edges = Vec::with_capacity(log.len());
    for row in &log {
        nodes.add(&row.first_word, None);
        nodes.add(&row.second_word, None);
        nodes.add(&row.result_name, Some(&row.result_emoji));
        edges.push(GraphEdge {
            from1: row.first_word.clone(),
            from2: row.second_word.clone(),
            to: row.result_name.clone(),
        });
    }

    tracing::debug!(nodes = nodes.nodes.len(), edges = edges.len(), "graph built");
    Ok(GraphView {
        nodes: nodes.nodes,
        edges,
    })
}
