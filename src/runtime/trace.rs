//! Execution trace and span model.
//!
//! An `Execution` is created `pending`, driven by exactly one engine run, and
//! frozen once it reaches a terminal status. Steps and spans are append-only;
//! a span never changes after it is finished apart from its evaluation
//! metrics, which are computed after the run.

use crate::error::{ErrorKind, NodeFailure, StateTransitionError};
use crate::runtime::cost::{CostBreakdown, OperationCategory, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    /// `pending -> running | failed`, `running -> any terminal`
    fn can_move_to(&self, next: ExecutionStatus) -> bool {
        match self {
            ExecutionStatus::Pending => matches!(next, ExecutionStatus::Running | ExecutionStatus::Failed),
            ExecutionStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Outcome of one node within one execution
///
/// Built only through the constructors so that `failed` always carries an
/// error and `completed` always carries an output mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_id: String,
    pub node_type: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub cost: f64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub category: OperationCategory,
}

impl NodeResult {
    fn base(node_id: &str, node_type: &str, status: NodeStatus) -> Self {
        Self {
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            status,
            output: None,
            error: None,
            error_kind: None,
            error_detail: None,
            cost: 0.0,
            duration_ms: 0,
            started_at: None,
            completed_at: None,
            token_usage: None,
            model: None,
            provider: None,
            category: OperationCategory::Other,
        }
    }

    pub fn completed(node_id: &str, node_type: &str, output: Map<String, Value>) -> Self {
        Self { output: Some(output), ..Self::base(node_id, node_type, NodeStatus::Completed) }
    }

    pub fn failed(node_id: &str, node_type: &str, failure: &NodeFailure) -> Self {
        Self {
            error: Some(failure.message.clone()),
            error_kind: Some(failure.kind),
            error_detail: failure.detail.clone(),
            ..Self::base(node_id, node_type, NodeStatus::Failed)
        }
    }

    pub fn skipped(node_id: &str, node_type: &str, reason: &str) -> Self {
        Self { error: Some(reason.to_string()), ..Self::base(node_id, node_type, NodeStatus::Skipped) }
    }

    pub fn with_timing(mut self, started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> Self {
        self.duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
        self.started_at = Some(started_at);
        self.completed_at = Some(completed_at);
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == NodeStatus::Completed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Started,
    Completed,
    Error,
    Progress,
}

/// One entry of the execution's ordered event log
///
/// `node_id` is `None` for run-level entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub action: StepAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ExecutionStep {
    pub fn new(node_id: Option<&str>, action: StepAction, data: Option<Value>) -> Self {
        Self { node_id: node_id.map(str::to_string), timestamp: Utc::now(), action, data }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanType {
    Workflow,
    Embedding,
    Llm,
    VectorSearch,
    Rerank,
    Routing,
    Tool,
    Other,
}

impl From<OperationCategory> for SpanType {
    fn from(category: OperationCategory) -> Self {
        match category {
            OperationCategory::Embedding => SpanType::Embedding,
            OperationCategory::Llm => SpanType::Llm,
            OperationCategory::VectorSearch => SpanType::VectorSearch,
            OperationCategory::Rerank => SpanType::Rerank,
            OperationCategory::Routing => SpanType::Routing,
            OperationCategory::Tool => SpanType::Tool,
            OperationCategory::Other => SpanType::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Running,
    Completed,
    Failed,
}

/// Trace record of one operation, possibly nested under a parent span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub name: String,
    pub span_type: SpanType,
    pub status: SpanStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Map<String, Value>>,
}

impl Span {
    pub fn start(name: impl Into<String>, span_type: SpanType, parent_span_id: Option<&str>) -> Self {
        Self {
            span_id: uuid::Uuid::new_v4().to_string(),
            parent_span_id: parent_span_id.map(str::to_string),
            node_id: None,
            name: name.into(),
            span_type,
            status: SpanStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: 0,
            cost: 0.0,
            token_usage: None,
            model: None,
            provider: None,
            input: None,
            output: None,
            error_type: None,
            error_stack: None,
            evaluation: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status != SpanStatus::Running
    }
}

/// Span reported by a node for an operation inside its own execution
///
/// The engine attaches it under the node's span and clamps its time window
/// into the parent's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildSpan {
    pub name: String,
    pub span_type: SpanType,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// What a span ended with
#[derive(Debug, Clone, Default)]
pub struct SpanOutcome {
    pub cost: f64,
    pub token_usage: Option<TokenUsage>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub output: Option<Value>,
    pub error: Option<NodeFailure>,
}

/// Run-level record produced by the workflow engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub node_results: BTreeMap<String, NodeResult>,
    pub total_cost: f64,
    pub token_usage: TokenUsage,
    #[serde(default)]
    pub cost_breakdown: CostBreakdown,
    pub steps: Vec<ExecutionStep>,
    pub spans: Vec<Span>,
    /// Run-level error (validation failure, timeout, cancellation reason)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,
}

impl Execution {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            node_results: BTreeMap::new(),
            total_cost: 0.0,
            token_usage: TokenUsage::default(),
            cost_breakdown: CostBreakdown::default(),
            steps: Vec::new(),
            spans: Vec::new(),
            error: None,
            validation_errors: Vec::new(),
        }
    }

    /// Move the state machine, stamping start/completion times
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), StateTransitionError> {
        if !self.status.can_move_to(next) {
            return Err(StateTransitionError {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        if next == ExecutionStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Record a node result. Results are write-once per node.
    pub fn record_result(&mut self, result: NodeResult) -> bool {
        if self.status.is_terminal() || self.node_results.contains_key(&result.node_id) {
            return false;
        }
        self.node_results.insert(result.node_id.clone(), result);
        true
    }

    pub fn push_step(&mut self, step: ExecutionStep) -> Option<&ExecutionStep> {
        if self.status.is_terminal() {
            return None;
        }
        self.steps.push(step);
        self.steps.last()
    }

    /// Append a span and return its id
    pub fn add_span(&mut self, span: Span) -> String {
        let id = span.span_id.clone();
        self.spans.push(span);
        id
    }

    /// Finish a running span. A finished span is left untouched.
    pub fn finish_span(&mut self, span_id: &str, outcome: SpanOutcome) -> bool {
        let Some(span) = self.spans.iter_mut().find(|s| s.span_id == span_id) else {
            return false;
        };
        if span.is_finished() {
            return false;
        }
        let now = Utc::now();
        span.completed_at = Some(now);
        span.duration_ms = (now - span.started_at).num_milliseconds().max(0) as u64;
        span.cost = outcome.cost;
        span.token_usage = outcome.token_usage;
        span.model = outcome.model;
        span.provider = outcome.provider;
        span.output = outcome.output;
        match outcome.error {
            Some(failure) => {
                span.status = SpanStatus::Failed;
                span.error_type = Some(failure.kind.as_str().to_string());
                span.error_stack = failure.detail.or(Some(failure.message));
            }
            None => span.status = SpanStatus::Completed,
        }
        true
    }

    /// Attach a node-reported child span under `parent_span_id`
    pub fn attach_child_span(&mut self, parent_span_id: &str, node_id: &str, child: ChildSpan) -> Option<String> {
        let parent = self.spans.iter().find(|s| s.span_id == parent_span_id)?;
        let parent_start = parent.started_at;
        // Wall-clock stamps can step backwards; an inverted window collapses to its start
        let parent_end = parent.completed_at.unwrap_or_else(Utc::now).max(parent_start);

        let started_at = child.started_at.max(parent_start).min(parent_end);
        let completed_at = child.completed_at.max(started_at).min(parent_end);
        let mut span = Span::start(child.name, child.span_type, Some(parent_span_id));
        span.node_id = Some(node_id.to_string());
        span.started_at = started_at;
        span.completed_at = Some(completed_at);
        span.duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
        span.cost = child.cost;
        span.token_usage = child.token_usage;
        span.model = child.model;
        span.provider = child.provider;
        span.output = child.data;
        span.status = match child.error {
            Some(error) => {
                span.error_type = Some(ErrorKind::Execution.as_str().to_string());
                span.error_stack = Some(error);
                SpanStatus::Failed
            }
            None => SpanStatus::Completed,
        };
        Some(self.add_span(span))
    }

    /// Post-hoc quality metrics for a finished span
    pub fn attach_evaluation(&mut self, span_id: &str, metrics: Map<String, Value>) -> bool {
        match self.spans.iter_mut().find(|s| s.span_id == span_id) {
            Some(span) if span.is_finished() => {
                span.evaluation.get_or_insert_with(Map::new).extend(metrics);
                true
            }
            _ => false,
        }
    }

    /// Recompute totals from the recorded node results
    pub fn aggregate(&mut self) {
        self.cost_breakdown = CostBreakdown::from_results(self.node_results.values());
        self.total_cost = self.cost_breakdown.total;
        let mut usage = TokenUsage::default();
        for result in self.node_results.values() {
            if let Some(tokens) = &result.token_usage {
                usage.add(tokens);
            }
        }
        self.token_usage = usage;
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeResult> {
        self.node_results.get(node_id)
    }

    pub fn failed_nodes(&self) -> Vec<&NodeResult> {
        self.node_results.values().filter(|r| r.status == NodeStatus::Failed).collect()
    }

    pub fn node_span(&self, node_id: &str) -> Option<&Span> {
        self.spans
            .iter()
            .find(|s| s.node_id.as_deref() == Some(node_id) && s.span_type != SpanType::Routing && s.parent_span_id.as_deref() == self.root_span_id())
    }

    pub fn root_span_id(&self) -> Option<&str> {
        self.spans
            .iter()
            .find(|s| s.span_type == SpanType::Workflow)
            .map(|s| s.span_id.as_str())
    }
}
