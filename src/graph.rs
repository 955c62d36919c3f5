use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    definition::{EdgeDefinition, NodeDefinition, WorkflowDefinition},
    node::{ConfigPatch, NodeConfig, NodeKind},
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),
}

/// Canvas coordinates. Editor-only, never part of a [`WorkflowDefinition`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    id: String,
    #[serde(rename = "type")]
    kind: NodeKind,
    pub position: Position,
    config: NodeConfig,
}

impl Node {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
}

/// Editor-side workflow graph: nodes with layout, edges with port handles.
///
/// Nodes and edges are kept in insertion order so that [`WorkflowGraph::serialize`]
/// is deterministic. Edges can only be created between nodes that already exist,
/// which keeps every serialized edge pointing at a real node.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    #[serde(skip)]
    next_id: u64,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a new node of `kind` at `position` with that kind's default config.
    pub fn add_node(&mut self, kind: NodeKind, position: Position) -> &Node {
        let id = self.fresh_id(kind);
        tracing::debug!("| graph | add node {id} ({kind})");
        self.nodes.push(Node {
            id,
            kind,
            position,
            config: kind.default_config(),
        });
        // Safety: we just pushed a node
        self.nodes.last().unwrap()
    }

    fn fresh_id(&mut self, kind: NodeKind) -> String {
        loop {
            self.next_id += 1;
            let id = format!("{}-{}", kind.editor_key(), self.next_id);
            if self.node(&id).is_none() {
                return id;
            }
        }
    }

    /// Merge `patch` into the config of `node_id`.
    ///
    /// Unknown ids and patches for a different node kind are ignored.
    pub fn update_node_config(&mut self, node_id: &str, patch: impl Into<ConfigPatch>) {
        let patch = patch.into();
        let Some(node) = self.nodes.iter_mut().find(|node| node.id == node_id) else {
            tracing::warn!("| graph | config patch for unknown node {node_id} ignored");
            return;
        };
        let patch_kind = patch.kind();
        if !node.config.apply(patch) {
            tracing::warn!(
                "| graph | {patch_kind} patch does not apply to {} node {node_id}",
                node.kind
            );
            return;
        }
        tracing::debug!("| graph | updated config of {node_id}");
    }

    /// Add a directed edge between two existing nodes.
    ///
    /// Self-loops, duplicates and cycles are all accepted here.
    pub fn connect(
        &mut self,
        source: &str,
        target: &str,
        source_handle: Option<String>,
        target_handle: Option<String>,
    ) -> Result<&Edge, GraphError> {
        if self.node(source).is_none() {
            return Err(GraphError::NodeNotFound(source.to_owned()));
        }
        if self.node(target).is_none() {
            return Err(GraphError::NodeNotFound(target.to_owned()));
        }

        tracing::debug!("| graph | connect {source} -> {target}");
        self.edges.push(Edge {
            source: source.to_owned(),
            target: target.to_owned(),
            source_handle,
            target_handle,
        });
        // Safety: we just pushed an edge
        Ok(self.edges.last().unwrap())
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&mut self, node_id: &str) -> Option<Node> {
        let index = self.nodes.iter().position(|node| node.id == node_id)?;
        let node = self.nodes.remove(index);
        let before = self.edges.len();
        self.edges
            .retain(|edge| edge.source != node_id && edge.target != node_id);
        tracing::debug!(
            "| graph | removed node {node_id} and {} incident edge(s)",
            before - self.edges.len()
        );
        Some(node)
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == node_id)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The wire form of this graph: positions and handles are dropped, kinds become labels.
    pub fn serialize(&self) -> WorkflowDefinition {
        WorkflowDefinition {
            nodes: self
                .nodes
                .iter()
                .map(|node| NodeDefinition {
                    id: node.id.clone(),
                    kind: node.kind,
                    config: node.config.clone(),
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|edge| EdgeDefinition {
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild an editor graph from a wire definition. Every node lands at the origin.
    pub fn from_definition(definition: &WorkflowDefinition) -> Result<Self, GraphError> {
        let mut seen = HashSet::with_capacity(definition.nodes.len());
        let mut graph = Self::new();
        for node in &definition.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
            graph.nodes.push(Node {
                id: node.id.clone(),
                kind: node.kind,
                position: Position::default(),
                config: node.config.clone(),
            });
        }
        for edge in &definition.edges {
            graph.connect(&edge.source, &edge.target, None, None)?;
        }
        Ok(graph)
    }
}
