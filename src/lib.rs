/// Nodeflow: node-based workflow execution engine for AI/RAG pipelines
///
/// Resolves a visual node/edge graph into a layered execution plan, runs each
/// layer concurrently on tokio, merges upstream outputs into node inputs, and
/// records per-node cost, token usage and spans on a replayable Execution.

// Core configuration and setup
pub mod config;

// Error taxonomy shared across layers
pub mod error;

// Node contract, registry and built-in node types
pub mod nodes;

// Workflow definitions, planning, validation and storage
pub mod workflow;

// Runtime execution engine - layered DAG execution and tracing
pub mod runtime;

// Re-export commonly used types for external consumers
pub use config::{Config, EngineConfig};
pub use error::{DataCollectionError, ErrorKind, NodeFailure, RegistryError, ValidationError};
pub use nodes::{NodeContext, NodeHandler, NodeMetadata, NodeOutput, NodeRegistry, NodeSchema, OutputRole};
pub use runtime::{Execution, ExecutionStatus, NodeResult, NodeStatus, WorkflowEngine};
pub use workflow::{Edge, Node, Workflow};
