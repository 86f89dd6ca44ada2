//! Graph construction and structural validation
//!
//! A workflow is turned into a petgraph `DiGraph` whose edge weights carry the
//! optional branch tag. Everything the walk relies on is checked here, before
//! any block runs.

use crate::blocks::Block;
use crate::error::EngineError;
use crate::workflow::types::{BlockCategory, Branch, Edge, Node};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

#[derive(Debug)]
pub struct WorkflowGraph {
    graph: DiGraph<Node, Option<Branch>>,
    node_id_to_index: HashMap<String, NodeIndex>,
    blocks: Vec<Block>,
}

impl WorkflowGraph {
    /// Build and validate a graph
    pub fn build(nodes: &[Node], edges: &[Edge]) -> Result<Self, EngineError> {
        let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
        let mut node_id_to_index = HashMap::with_capacity(nodes.len());
        let mut blocks = Vec::with_capacity(nodes.len());

        for node in nodes {
            let block = Block::from_label(&node.label).ok_or_else(|| {
                invalid(format!("node '{}' uses unknown block '{}'", node.id, node.label))
            })?;
            if block.category() != node.category {
                return Err(invalid(format!(
                    "node '{}' declares category {:?} but '{}' is a {:?}",
                    node.id,
                    node.category,
                    node.label,
                    block.category()
                )));
            }

            let index = graph.add_node(node.clone());
            if node_id_to_index.insert(node.id.clone(), index).is_some() {
                return Err(invalid(format!("duplicate node id '{}'", node.id)));
            }
            blocks.push(block);
        }

        for edge in edges {
            let source = *node_id_to_index
                .get(&edge.source)
                .ok_or_else(|| invalid(format!("edge references unknown node '{}'", edge.source)))?;
            let target = *node_id_to_index
                .get(&edge.target)
                .ok_or_else(|| invalid(format!("edge references unknown node '{}'", edge.target)))?;
            graph.add_edge(source, target, edge.branch);
        }

        let built = Self {
            graph,
            node_id_to_index,
            blocks,
        };
        built.validate_outgoing()?;

        tracing::debug!(
            "📊 Built workflow graph with {} nodes and {} edges",
            built.graph.node_count(),
            built.graph.edge_count()
        );
        Ok(built)
    }

    /// Branch rules per source node
    fn validate_outgoing(&self) -> Result<(), EngineError> {
        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            let tags: Vec<Option<Branch>> = self
                .graph
                .edges_directed(index, Direction::Outgoing)
                .map(|e| *e.weight())
                .collect();

            if self.block(index).category() == BlockCategory::Condition {
                if tags.iter().any(Option::is_none) {
                    return Err(invalid(format!(
                        "condition '{}' has an edge without a true/false branch",
                        node.id
                    )));
                }
                for branch in [Branch::True, Branch::False] {
                    if tags.iter().filter(|t| **t == Some(branch)).count() > 1 {
                        return Err(invalid(format!(
                            "condition '{}' has more than one {:?} edge",
                            node.id, branch
                        )));
                    }
                }
            } else {
                if tags.iter().any(Option::is_some) {
                    return Err(invalid(format!(
                        "only conditions may have branch edges, '{}' is not one",
                        node.id
                    )));
                }
                if tags.len() > 1 {
                    return Err(invalid(format!(
                        "node '{}' fans out to {} nodes, only one outgoing edge is allowed",
                        node.id,
                        tags.len()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.graph[index]
    }

    pub fn block(&self, index: NodeIndex) -> Block {
        self.blocks[index.index()]
    }

    pub fn index_of(&self, node_id: &str) -> Option<NodeIndex> {
        self.node_id_to_index.get(node_id).copied()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Nodes without incoming edges, in declaration order
    pub fn start_nodes(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&i| self.graph.edges_directed(i, Direction::Incoming).next().is_none())
            .collect()
    }

    /// Where to go after `index`
    ///
    /// Conditions follow the edge tagged with their outcome; every other node
    /// has at most one untagged edge.
    pub fn next(&self, index: NodeIndex, outcome: bool) -> Option<NodeIndex> {
        let wanted = match self.block(index).category() {
            BlockCategory::Condition => Some(Branch::from_bool(outcome)),
            _ => None,
        };
        self.graph
            .edges_directed(index, Direction::Outgoing)
            .find(|e| *e.weight() == wanted)
            .map(|e| e.target())
    }
}

fn invalid(message: String) -> EngineError {
    tracing::warn!("🚫 Rejected workflow graph: {}", message);
    EngineError::InvalidGraph(message)
}
