use crate::GraphError;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable definition of a flow: nodes plus directed, acyclic edges.
/// Owned by a project and never mutated at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowGraph {
    pub flow_id: String,
    pub nodes: Vec<GraphNode>,
}

/// A node declaration with its outgoing edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(default)]
    pub out_nodes: Vec<String>,
}

impl FlowGraph {
    pub fn new(flow_id: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            nodes: Vec::new(),
        }
    }

    pub fn add_node(&mut self, id: impl Into<String>) -> &mut Self {
        self.nodes.push(GraphNode {
            id: id.into(),
            out_nodes: Vec::new(),
        });
        self
    }

    pub fn add_edge(&mut self, from: &str, to: impl Into<String>) -> &mut Self {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.id == from) {
            node.out_nodes.push(to.into());
        }
        self
    }

    pub fn find_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.find_node(id).is_some()
    }

    /// Validate the graph and compute each node's topological depth:
    /// 0 for sources, and strictly increasing along every edge.
    pub fn levels(&self) -> Result<HashMap<String, u32>, GraphError> {
        let (graph, index_of) = self.build_petgraph()?;

        let order = toposort(&graph, None)
            .map_err(|_| GraphError::CyclicDependency(self.flow_id.clone()))?;

        let mut levels: HashMap<String, u32> = HashMap::new();
        for idx in order {
            let id = &graph[idx];
            let depth = graph
                .neighbors_directed(idx, petgraph::Direction::Incoming)
                .map(|dep| levels[&graph[dep]] + 1)
                .max()
                .unwrap_or(0);
            levels.insert(id.clone(), depth);
        }

        debug_assert_eq!(levels.len(), index_of.len());
        Ok(levels)
    }

    /// Full structural validation: duplicate ids, dangling edges, cycles.
    pub fn validate(&self) -> Result<(), GraphError> {
        self.levels().map(|_| ())
    }

    fn build_petgraph(
        &self,
    ) -> Result<(DiGraph<String, ()>, HashMap<&str, NodeIndex>), GraphError> {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();

        for node in &self.nodes {
            if index_of.contains_key(node.id.as_str()) {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
            let idx = graph.add_node(node.id.clone());
            index_of.insert(node.id.as_str(), idx);
        }

        for node in &self.nodes {
            let from = index_of[node.id.as_str()];
            for out in &node.out_nodes {
                let to = index_of
                    .get(out.as_str())
                    .ok_or_else(|| GraphError::UnknownNode(out.clone()))?;
                graph.add_edge(from, *to, ());
            }
        }

        Ok((graph, index_of))
    }
}
