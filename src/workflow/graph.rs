/// Execution plan builder
///
/// Converts the flat node/edge lists into a petgraph DAG and groups nodes into
/// layers: every node sits one level below its deepest upstream dependency, so
/// all nodes of a layer can run concurrently once earlier layers are done.

use crate::error::ValidationError;
use crate::workflow::types::{Edge, Node};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Layered, validated execution order for one workflow
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Node weights are node ids, edge weights are indices into `edges`
    graph: DiGraph<String, usize>,
    node_id_to_index: HashMap<String, NodeIndex>,
    edges: Vec<Edge>,
    layers: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Build the plan, rejecting duplicate ids, dangling or self-loop edges
    /// and cycles
    pub fn build(nodes: &[Node], edges: &[Edge]) -> Result<Self, ValidationError> {
        let mut graph = DiGraph::new();
        let mut node_id_to_index = HashMap::new();

        for node in nodes {
            if node_id_to_index.contains_key(&node.id) {
                return Err(ValidationError::DuplicateNode(node.id.clone()));
            }
            let index = graph.add_node(node.id.clone());
            node_id_to_index.insert(node.id.clone(), index);
        }

        // Sorted so downstream merge order never depends on editor order
        let mut edges = edges.to_vec();
        edges.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.source.cmp(&b.source)));

        for (position, edge) in edges.iter().enumerate() {
            if edge.source == edge.target {
                return Err(ValidationError::SelfLoop { edge_id: edge.id.clone(), node_id: edge.source.clone() });
            }
            let from = endpoint(&node_id_to_index, edge, &edge.source)?;
            let to = endpoint(&node_id_to_index, edge, &edge.target)?;
            graph.add_edge(from, to, position);
        }

        let order = toposort(&graph, None).map_err(|_| ValidationError::Cycle { node_ids: cycle_members(&graph) })?;
        let layers = compute_layers(&graph, &order);

        tracing::debug!(nodes = graph.node_count(), edges = graph.edge_count(), layers = layers.len(), "built execution plan");

        Ok(Self { graph, node_id_to_index, edges, layers })
    }

    /// Layers in execution order; node ids within a layer are sorted
    pub fn layers(&self) -> &[Vec<String>] {
        &self.layers
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Edges pointing at `node_id`, in (edge id, source id) order
    pub fn incoming(&self, node_id: &str) -> Vec<&Edge> {
        let Some(&index) = self.node_id_to_index.get(node_id) else {
            return Vec::new();
        };
        let mut positions: Vec<usize> = self
            .graph
            .edges_directed(index, Direction::Incoming)
            .map(|edge| *edge.weight())
            .collect();
        positions.sort_unstable();
        positions.into_iter().map(|p| &self.edges[p]).collect()
    }

    /// Direct upstream node ids, sorted
    pub fn upstream(&self, node_id: &str) -> Vec<&str> {
        let ids: BTreeSet<&str> = self.incoming(node_id).into_iter().map(|e| e.source.as_str()).collect();
        ids.into_iter().collect()
    }

    /// Every node reachable upstream of `node_id`
    pub fn ancestors(&self, node_id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let Some(&start) = self.node_id_to_index.get(node_id) else {
            return seen;
        };
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            for parent in self.graph.neighbors_directed(current, Direction::Incoming) {
                if seen.insert(self.graph[parent].clone()) {
                    stack.push(parent);
                }
            }
        }
        seen
    }

    /// Index of the layer holding `node_id`
    pub fn layer_of(&self, node_id: &str) -> Option<usize> {
        self.layers.iter().position(|layer| layer.iter().any(|id| id == node_id))
    }
}

fn endpoint(index: &HashMap<String, NodeIndex>, edge: &Edge, node_id: &str) -> Result<NodeIndex, ValidationError> {
    index.get(node_id).copied().ok_or_else(|| ValidationError::DanglingEdge {
        edge_id: edge.id.clone(),
        node_id: node_id.to_string(),
    })
}

/// Node ids of the first non-trivial strongly connected component, sorted
fn cycle_members(graph: &DiGraph<String, usize>) -> Vec<String> {
    let mut components: Vec<Vec<String>> = tarjan_scc(graph)
        .into_iter()
        .filter(|component| component.len() > 1)
        .map(|component| {
            let mut ids: Vec<String> = component.into_iter().map(|ix| graph[ix].clone()).collect();
            ids.sort();
            ids
        })
        .collect();
    components.sort();
    components.into_iter().next().unwrap_or_default()
}

/// Longest-path level of each node, grouped into layers
fn compute_layers(graph: &DiGraph<String, usize>, order: &[NodeIndex]) -> Vec<Vec<String>> {
    let mut level: HashMap<NodeIndex, usize> = HashMap::with_capacity(order.len());
    for &ix in order {
        let depth = graph
            .neighbors_directed(ix, Direction::Incoming)
            .filter_map(|parent| level.get(&parent))
            .map(|parent_level| parent_level + 1)
            .max()
            .unwrap_or(0);
        level.insert(ix, depth);
    }

    let depth = level.values().copied().max().map_or(0, |max| max + 1);
    let mut layers = vec![Vec::new(); depth];
    for (ix, l) in level {
        layers[l].push(graph[ix].clone());
    }
    for layer in &mut layers {
        layer.sort();
    }
    layers
}
