use std::collections::HashMap;

use petgraph::{
    Direction,
    algo::{has_path_connecting, toposort},
    graph::NodeIndex,
    prelude::StableGraph,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{definition::WorkflowDefinition, node::NodeKind};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Workflow must include a UserQuery component")]
    MissingUserQuery,
    #[error("Workflow must include an Output component")]
    MissingOutput,
    #[error("Edge {from} -> {to} references an unknown node")]
    DanglingEdge { from: String, to: String },
    #[error("Workflow must be a directed acyclic graph, cycle through node '{0}'")]
    CycleDetected(String),
    #[error("No Output component is reachable from a UserQuery component")]
    OutputUnreachable,
}

/// How much checking happens before a run is allowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Node-type presence only.
    #[default]
    Permissive,
    /// Presence plus edge integrity, acyclicity and UserQuery -> Output reachability.
    Strict,
}

impl ValidationMode {
    pub fn validate(&self, definition: &WorkflowDefinition) -> Result<(), ValidationError> {
        match self {
            ValidationMode::Permissive => validate(definition),
            ValidationMode::Strict => validate_strict(definition),
        }
    }
}

/// Gate a run: the definition needs at least one UserQuery and at least one Output node.
///
/// Edges and other node types play no part. UserQuery is checked first.
pub fn validate(definition: &WorkflowDefinition) -> Result<(), ValidationError> {
    if !definition.contains_kind(NodeKind::UserQuery) {
        return Err(ValidationError::MissingUserQuery);
    }
    if !definition.contains_kind(NodeKind::Output) {
        return Err(ValidationError::MissingOutput);
    }
    Ok(())
}

/// [`validate`] followed by the structural checks of [`GraphAnalysis`].
///
/// Never accepts a definition that [`validate`] rejects.
pub fn validate_strict(definition: &WorkflowDefinition) -> Result<(), ValidationError> {
    validate(definition)?;
    let analysis = GraphAnalysis::new(definition)?;
    if let Some(node) = analysis.cycle_node() {
        return Err(ValidationError::CycleDetected(node.to_owned()));
    }
    if !analysis.output_reachable() {
        return Err(ValidationError::OutputUnreachable);
    }
    Ok(())
}

/// Adjacency view of a definition for optional structural checks.
pub struct GraphAnalysis<'a> {
    definition: &'a WorkflowDefinition,
    graph: StableGraph<&'a str, ()>,
    id_to_node: HashMap<&'a str, NodeIndex>,
}

impl<'a> GraphAnalysis<'a> {
    /// Fails if an edge points at a node id the definition does not contain.
    pub fn new(definition: &'a WorkflowDefinition) -> Result<Self, ValidationError> {
        let mut graph = StableGraph::new();
        let mut id_to_node = HashMap::with_capacity(definition.nodes.len());
        for node in &definition.nodes {
            id_to_node
                .entry(node.id.as_str())
                .or_insert_with(|| graph.add_node(node.id.as_str()));
        }

        for edge in &definition.edges {
            let (Some(&from), Some(&to)) = (
                id_to_node.get(edge.source.as_str()),
                id_to_node.get(edge.target.as_str()),
            ) else {
                return Err(ValidationError::DanglingEdge {
                    from: edge.source.clone(),
                    to: edge.target.clone(),
                });
            };
            graph.add_edge(from, to, ());
        }

        Ok(Self {
            definition,
            graph,
            id_to_node,
        })
    }

    /// A node that lies on a cycle, if there is one.
    pub fn cycle_node(&self) -> Option<&'a str> {
        toposort(&self.graph, None)
            .err()
            .and_then(|cycle| self.graph.node_weight(cycle.node_id()).copied())
    }

    /// Node ids in an order where every edge points forward, or `None` when cyclic.
    pub fn execution_order(&self) -> Option<Vec<&'a str>> {
        toposort(&self.graph, None).ok().map(|order| {
            order
                .into_iter()
                .filter_map(|idx| self.graph.node_weight(idx).copied())
                .collect()
        })
    }

    /// Whether some Output node can be reached from some UserQuery node.
    pub fn output_reachable(&self) -> bool {
        let queries = self.indices_of(NodeKind::UserQuery);
        let outputs = self.indices_of(NodeKind::Output);
        queries.iter().any(|&query| {
            outputs
                .iter()
                .any(|&output| has_path_connecting(&self.graph, query, output, None))
        })
    }

    /// Nodes with neither incoming nor outgoing edges.
    pub fn isolated_nodes(&self) -> Vec<&'a str> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
                    && self
                        .graph
                        .neighbors_directed(idx, Direction::Outgoing)
                        .next()
                        .is_none()
            })
            .filter_map(|idx| self.graph.node_weight(idx).copied())
            .collect()
    }

    fn indices_of(&self, kind: NodeKind) -> Vec<NodeIndex> {
        self.definition
            .nodes
            .iter()
            .filter(|node| node.kind == kind)
            .filter_map(|node| self.id_to_node.get(node.id.as_str()).copied())
            .collect()
    }
}
