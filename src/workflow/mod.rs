/// Workflow Management Layer
///
/// This module handles workflow definitions and everything the engine needs
/// before a run starts:
/// - Type definitions (Workflow, Node, Edge) in the editor's JSON shape
/// - Execution plan construction with petgraph
/// - Pre-run validation
/// - Workflow sources and execution sinks (memory, JSON files, SQLite)

// Core workflow type definitions
pub mod types;

// Layered execution plan (topological sort, cycle detection)
pub mod graph;

// Structural and config validation
pub mod validation;

// Persistence adapters
pub mod storage;

// Re-export commonly used types
pub use graph::ExecutionPlan;
pub use storage::{ExecutionSink, JsonFileSource, MemoryStore, NullSink, SqliteStore, WorkflowSource};
pub use types::{Edge, Node, Position, Workflow, WorkflowSettings};
pub use validation::{validate, ValidationReport};
