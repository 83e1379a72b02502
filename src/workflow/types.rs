/// Core workflow type definitions
///
/// Defines the workflow graph exactly as the visual editor persists it: a flat
/// list of nodes and a flat list of edges. The engine only ever reads these
/// types; execution artifacts live in `runtime::trace`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A complete workflow definition containing nodes and their connections
///
/// Node and edge order carry no meaning. Every edge endpoint must name a node
/// in the same workflow and the whole graph must be acyclic to be runnable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier (e.g., "wf-rag-qa")
    pub id: String,
    /// Human-readable workflow name
    #[serde(default)]
    pub name: String,
    /// List of nodes in this workflow
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// List of edges connecting nodes
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Workflow-level execution settings
    #[serde(default)]
    pub settings: WorkflowSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Per-workflow overrides of engine behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Hand upstream outputs to the routing collaborator instead of smart merge.
    /// `None` defers to the engine configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intelligent_routing_enabled: Option<bool>,
}

/// A single node in the workflow DAG
///
/// `node_type` is a key into the node registry. `config` is the author-supplied
/// static configuration; the engine injects reserved keys before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the workflow (e.g., "n1", "embedder")
    pub id: String,
    /// Registry key which determines execution behavior
    #[serde(rename = "type")]
    pub node_type: String,
    /// Canvas position, opaque to the engine
    #[serde(default)]
    pub position: Position,
    /// Node-specific configuration parameters as flexible JSON
    #[serde(default, alias = "data")]
    pub config: Map<String, Value>,
}

/// Canvas coordinates; carried through untouched
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Directed data-flow connection between two nodes
///
/// Handles name a specific output port on the source or input port on the
/// target when a node exposes more than one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Edge identifier, also the tie-breaker for merge ordering
    pub id: String,
    /// Source node ID
    pub source: String,
    /// Target node ID
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Workflow {
    /// Create an empty workflow with the given id and name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            settings: WorkflowSettings::default(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Builder-style helper to append a node
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Builder-style helper to append an edge with a generated id
    pub fn with_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        let id = format!("e{}", self.edges.len() + 1);
        self.edges.push(Edge::new(id, source, target));
        self
    }

    /// Look up a node by id
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Parse a workflow from its persisted JSON form
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl Node {
    /// Create a node with an empty configuration
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            position: Position::default(),
            config: Map::new(),
        }
    }

    /// Builder-style helper to set a config entry
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

impl Edge {
    /// Create an edge without handles
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }

    /// Builder-style helper to set the source/target ports
    pub fn with_handles(mut self, source_handle: Option<&str>, target_handle: Option<&str>) -> Self {
        self.source_handle = source_handle.map(str::to_string);
        self.target_handle = target_handle.map(str::to_string);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_editor_json() {
        let json = r#"{
            "id": "wf-1",
            "name": "Demo",
            "nodes": [
                {"id": "a", "type": "text_input", "position": {"x": 10, "y": 20}, "config": {"text": "hello"}},
                {"id": "b", "type": "uppercase", "data": {}}
            ],
            "edges": [
                {"id": "e1", "source": "a", "target": "b", "sourceHandle": "text"}
            ]
        }"#;
        let wf = Workflow::from_json(json).unwrap();
        assert_eq!(wf.nodes.len(), 2);
        assert_eq!(wf.nodes[0].node_type, "text_input");
        assert_eq!(wf.nodes[0].position, Position { x: 10.0, y: 20.0 });
        assert_eq!(wf.nodes[0].config["text"], "hello");
        assert_eq!(wf.edges[0].source_handle.as_deref(), Some("text"));
        assert!(wf.edges[0].target_handle.is_none());
        assert!(wf.settings.intelligent_routing_enabled.is_none());
    }

    #[test]
    fn test_builder_generates_edge_ids() {
        let wf = Workflow::new("wf", "wf")
            .with_node(Node::new("a", "text_input"))
            .with_node(Node::new("b", "uppercase"))
            .with_edge("a", "b");
        assert_eq!(wf.edges[0].id, "e1");
        assert_eq!(wf.node("b").unwrap().node_type, "uppercase");
        assert!(wf.node("zzz").is_none());
    }
}
