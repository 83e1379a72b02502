/// Runtime Execution Engine
///
/// This module drives workflows once they are validated:
/// - Layered execution of the petgraph plan on tokio tasks
/// - Input collection (smart merge or routed) for every node
/// - Cost accounting, execution trace and span model
/// - Non-blocking progress reporting

// Layered execution engine
pub mod engine;

// Upstream output merging and routing
pub mod collector;

// Pricing and cost aggregation
pub mod cost;

// Progress channel and consumers
pub mod events;

// Execution, NodeResult, step and span records
pub mod trace;

// Re-export main types
pub use collector::{DataCollector, RoutedInputs, Router, RoutingRequest};
pub use cost::{CostBreakdown, CostTracker, OperationCategory, PricingTable, Rate, StaticPricing, TokenUsage, UsageRecord};
pub use engine::{WorkflowEngine, WorkflowEngineBuilder};
pub use events::{BroadcastProgress, ProgressConsumer, ProgressEvent, ProgressReporter};
pub use trace::{ChildSpan, Execution, ExecutionStatus, ExecutionStep, NodeResult, NodeStatus, Span, SpanType, StepAction};
