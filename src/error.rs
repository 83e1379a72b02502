/// Error taxonomy for the engine
///
/// Validation errors are detected before anything runs and abort the whole
/// execution. Node-level failures are captured as data (`NodeFailure`) on the
/// node's result instead of propagating, so one failing node never tears down
/// its siblings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lookup failures against the node registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),
}

/// A single config field that failed node-level validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Structural problems that make a workflow unrunnable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("workflow has no nodes")]
    EmptyWorkflow,

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("node '{node_id}': {source}")]
    UnknownNodeType {
        node_id: String,
        #[source]
        source: RegistryError,
    },

    #[error("edge '{edge_id}' references unknown node '{node_id}'")]
    DanglingEdge { edge_id: String, node_id: String },

    #[error("edge '{edge_id}' connects node '{node_id}' to itself")]
    SelfLoop { edge_id: String, node_id: String },

    #[error("graph contains a cycle through nodes [{}]", .node_ids.join(", "))]
    Cycle { node_ids: Vec<String> },

    #[error("node '{node_id}' has invalid config: {}", join_fields(.errors))]
    InvalidConfig { node_id: String, errors: Vec<FieldError> },
}

fn join_fields(errors: &[FieldError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl ValidationError {
    /// Node id the error is about, when it concerns a single node
    pub fn node_id(&self) -> Option<&str> {
        match self {
            ValidationError::DuplicateNode(id) => Some(id),
            ValidationError::UnknownNodeType { node_id, .. }
            | ValidationError::DanglingEdge { node_id, .. }
            | ValidationError::SelfLoop { node_id, .. }
            | ValidationError::InvalidConfig { node_id, .. } => Some(node_id),
            ValidationError::EmptyWorkflow | ValidationError::Cycle { .. } => None,
        }
    }
}

/// The routing collaborator could not produce inputs for a target node
#[derive(Debug, Error)]
pub enum DataCollectionError {
    #[error("router failed for node '{node_id}': {source:#}")]
    Router {
        node_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("router timed out for node '{node_id}' after {timeout_ms}ms")]
    RouterTimeout { node_id: String, timeout_ms: u64 },
}

/// Illegal move in the execution state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid execution transition from {from} to {to}")]
pub struct StateTransitionError {
    pub from: String,
    pub to: String,
}

/// Classification of a captured node failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Raised by the node's own `execute`
    Execution,
    /// The engine's timeout guard fired
    Timeout,
    /// Inputs could not be assembled for the node
    DataCollection,
    /// The node task panicked or was aborted
    Panic,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Execution => "execution",
            ErrorKind::Timeout => "timeout",
            ErrorKind::DataCollection => "data_collection",
            ErrorKind::Panic => "panic",
        }
    }
}

/// Node failure captured as data
///
/// `detail` keeps the full context chain so a failure can be understood
/// without re-running the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl NodeFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), detail: None }
    }

    /// Capture an `anyhow` error raised by a node
    pub fn from_execution(err: &anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Execution,
            message: err.to_string(),
            detail: Some(format!("{err:?}")),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(ErrorKind::Timeout, format!("node timed out after {timeout_ms}ms"))
    }

    pub fn data_collection(err: &DataCollectionError) -> Self {
        Self {
            kind: ErrorKind::DataCollection,
            message: err.to_string(),
            detail: Some(format!("{err:?}")),
        }
    }
}

impl std::fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_type_names_node_and_type() {
        let err = ValidationError::UnknownNodeType {
            node_id: "n1".into(),
            source: RegistryError::UnknownNodeType("does_not_exist".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("n1"));
        assert!(msg.contains("does_not_exist"));
        assert_eq!(err.node_id(), Some("n1"));
    }

    #[test]
    fn test_cycle_message_lists_nodes() {
        let err = ValidationError::Cycle { node_ids: vec!["A".into(), "B".into()] };
        assert_eq!(err.to_string(), "graph contains a cycle through nodes [A, B]");
        assert!(err.node_id().is_none());
    }

    #[test]
    fn test_failure_keeps_context_chain() {
        let err = anyhow::anyhow!("socket closed").context("embedding request failed");
        let failure = NodeFailure::from_execution(&err);
        assert_eq!(failure.kind, ErrorKind::Execution);
        assert_eq!(failure.message, "embedding request failed");
        assert!(failure.detail.unwrap().contains("socket closed"));
    }
}
