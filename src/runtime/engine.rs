/// Layered workflow execution engine
///
/// Validates a workflow, builds its layered execution plan and runs it layer
/// by layer. Nodes of a layer are spawned as independent tokio tasks and the
/// engine waits for the whole layer before starting the next one, so a node
/// never starts before all of its upstream nodes have finished.
///
/// Node failures are data: a failed node gets a `failed` result and the run
/// continues with whatever its dependants can still collect, unless fail-fast
/// is configured.

use crate::config::EngineConfig;
use crate::error::{ErrorKind, NodeFailure};
use crate::nodes::{
    NodeContext, NodeMetadata, NodeOutput, NodeRegistry, RegisteredNode, EXECUTION_ID_KEY, NODE_ID_KEY, ROUTING_KEY,
    TIMEOUT_KEY,
};
use crate::runtime::collector::{DataCollector, RoutingOutcome, Router, Upstream};
use crate::runtime::cost::{CostTracker, PricingTable, TokenUsage};
use crate::runtime::events::{ProgressConsumer, ProgressEvent, ProgressReporter};
use crate::runtime::trace::{
    ChildSpan, Execution, ExecutionStatus, ExecutionStep, NodeResult, Span, SpanOutcome, SpanStatus, SpanType, StepAction,
};
use crate::workflow::graph::ExecutionPlan;
use crate::workflow::storage::{ExecutionSink, NullSink, WorkflowSource};
use crate::workflow::types::{Edge, Node, Workflow};
use crate::workflow::validation::validate;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinError, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Workflow engine: owns every Execution it drives
pub struct WorkflowEngine {
    registry: Arc<NodeRegistry>,
    collector: DataCollector,
    costs: CostTracker,
    sink: Arc<dyn ExecutionSink>,
    progress: Option<Arc<dyn ProgressConsumer>>,
    config: EngineConfig,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("node_types", &self.registry.len())
            .field("collector", &self.collector)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for `WorkflowEngine`
pub struct WorkflowEngineBuilder {
    registry: Arc<NodeRegistry>,
    sink: Arc<dyn ExecutionSink>,
    progress: Option<Arc<dyn ProgressConsumer>>,
    pricing: Option<Arc<dyn PricingTable>>,
    router: Option<Arc<dyn Router>>,
    config: EngineConfig,
}

impl WorkflowEngineBuilder {
    /// Where execution snapshots and steps are persisted (default: discarded)
    pub fn sink(mut self, sink: Arc<dyn ExecutionSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Receiver of progress and node completion events
    pub fn progress(mut self, consumer: Arc<dyn ProgressConsumer>) -> Self {
        self.progress = Some(consumer);
        self
    }

    /// Pricing table used to turn usage into cost (default: built-in rates)
    pub fn pricing(mut self, pricing: Arc<dyn PricingTable>) -> Self {
        self.pricing = Some(pricing);
        self
    }

    /// Collaborator that maps upstream bundles when routing is enabled
    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Timeouts, fail-fast and routing defaults
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Finish configuration
    pub fn build(self) -> WorkflowEngine {
        let costs = self.pricing.map(CostTracker::new).unwrap_or_default();
        let collector = DataCollector::new(self.router, self.config.router_timeout(), costs.clone());
        WorkflowEngine {
            registry: self.registry,
            collector,
            costs,
            sink: self.sink,
            progress: self.progress,
            config: self.config,
        }
    }
}

/// Owned upstream data moved into a node task
struct UpstreamOutput {
    edge: Edge,
    metadata: Arc<NodeMetadata>,
    output: Option<Map<String, Value>>,
}

/// Everything a node task needs, owned
struct NodeJob {
    node_id: String,
    entry: Arc<RegisteredNode>,
    upstream: Vec<UpstreamOutput>,
    config: Map<String, Value>,
    routing: bool,
    timeout: Option<Duration>,
    ctx: NodeContext,
    collector: DataCollector,
}

/// What came back from one node task
struct NodeRun {
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    inputs: Option<Map<String, Value>>,
    estimated_cost: f64,
    routing: Option<RoutingOutcome>,
    outcome: std::result::Result<NodeOutput, NodeFailure>,
}

/// Why the layer loop stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Cancelled,
    FailFast,
    TimedOut,
}

impl Halt {
    fn reason(&self) -> &'static str {
        match self {
            Halt::Cancelled => "execution cancelled before this node was scheduled",
            Halt::FailFast => "skipped after an earlier node failed (fail-fast)",
            Halt::TimedOut => "execution timed out before this node was scheduled",
        }
    }
}

impl WorkflowEngine {
    /// Start configuring an engine over `registry`
    pub fn builder(registry: Arc<NodeRegistry>) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder {
            registry,
            sink: Arc::new(NullSink),
            progress: None,
            pricing: None,
            router: None,
            config: EngineConfig::default(),
        }
    }

    /// Engine with default collaborators
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::builder(registry).build()
    }

    /// Registry the engine resolves node types against
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Active engine policies
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load a workflow from `source` and execute it
    pub async fn run(&self, source: &dyn WorkflowSource, workflow_id: &str) -> Result<Execution> {
        let workflow = source
            .load(workflow_id)
            .await
            .with_context(|| format!("failed to load workflow '{workflow_id}'"))?;
        Ok(self.execute(&workflow).await)
    }

    /// Execute a workflow to completion
    pub async fn execute(&self, workflow: &Workflow) -> Execution {
        self.execute_with_cancel(workflow, CancellationToken::new()).await
    }

    /// Execute a workflow, stopping before the next layer once `cancel` fires
    ///
    /// Always returns a terminal Execution; every problem is recorded on it.
    pub async fn execute_with_cancel(&self, workflow: &Workflow, cancel: CancellationToken) -> Execution {
        let mut exec = Execution::new(&workflow.id);
        let run_span = tracing::info_span!("execution", execution_id = %exec.id, workflow_id = %workflow.id);
        self.drive(workflow, &mut exec, cancel).instrument(run_span).await;
        exec
    }

    async fn drive(&self, workflow: &Workflow, exec: &mut Execution, cancel: CancellationToken) {
        let run_started = std::time::Instant::now();
        tracing::info!(nodes = workflow.nodes.len(), edges = workflow.edges.len(), "starting workflow execution");

        // Validation: any error fails the run before it ever enters `running`
        let report = validate(workflow, &self.registry);
        for warning in &report.warnings {
            tracing::warn!("{warning}");
        }
        if !report.is_valid() {
            self.fail_validation(exec, report.messages()).await;
            return;
        }
        let plan = match ExecutionPlan::build(&workflow.nodes, &workflow.edges) {
            Ok(plan) => plan,
            Err(err) => {
                self.fail_validation(exec, vec![err.to_string()]).await;
                return;
            }
        };

        // One consistent snapshot of the registry for the whole run
        let mut entries: HashMap<String, Arc<RegisteredNode>> = HashMap::with_capacity(workflow.nodes.len());
        for node in &workflow.nodes {
            match self.registry.get(&node.node_type) {
                Ok(entry) => {
                    entries.insert(node.id.clone(), entry);
                }
                Err(err) => {
                    self.fail_validation(exec, vec![format!("node '{}': {err}", node.id)]).await;
                    return;
                }
            }
        }
        let nodes: HashMap<&str, &Node> = workflow.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        if let Err(err) = exec.transition(ExecutionStatus::Running) {
            tracing::error!(error = %err, "could not start execution");
            return;
        }
        let root_span = exec.add_span(Span::start(root_span_name(workflow), SpanType::Workflow, None));
        self.step(exec, None, StepAction::Started, Some(json!({"layers": plan.layers().len()}))).await;
        self.persist(exec).await;

        let (progress_tx, mut progress_rx) = mpsc::channel(self.config.progress_buffer.max(1));
        let deadline = self.config.execution_timeout().map(|limit| Instant::now() + limit);
        let mut halt: Option<Halt> = None;

        for (layer_index, layer) in plan.layers().iter().enumerate() {
            if halt.is_none() {
                halt = self.check_halt(exec, &cancel, deadline);
            }
            if let Some(reason) = halt {
                for node_id in layer {
                    let node_type = nodes.get(node_id.as_str()).map_or("", |n| n.node_type.as_str());
                    exec.record_result(NodeResult::skipped(node_id, node_type, reason.reason()));
                }
                continue;
            }

            tracing::debug!(layer = layer_index, nodes = ?layer, "dispatching layer");
            let mut handles = Vec::with_capacity(layer.len());
            for node_id in layer {
                let (Some(node), Some(entry)) = (nodes.get(node_id.as_str()), entries.get(node_id)) else {
                    continue;
                };
                let job = self.prepare_job(workflow, exec, &plan, &entries, node, entry.clone(), &progress_tx);
                self.step(exec, Some(node_id.as_str()), StepAction::Started, Some(json!({"node_type": node.node_type}))).await;

                let span = tracing::info_span!("node", node_id = %node.id, node_type = %node.node_type);
                handles.push((node_id.clone(), Utc::now(), tokio::spawn(run_node(job).instrument(span))));
            }

            let dispatched: Vec<(String, DateTime<Utc>)> = handles.iter().map(|(id, at, _)| (id.clone(), *at)).collect();
            let aborts: Vec<_> = handles.iter().map(|(_, _, h)| h.abort_handle()).collect();
            let mut layer_future = Box::pin(join_all(handles.into_iter().map(|(_, _, h)| h)));

            let joined = loop {
                tokio::select! {
                    results = &mut layer_future => break results,
                    Some(event) = progress_rx.recv() => self.on_progress(exec, event).await,
                    _ = sleep_until(deadline) => {
                        tracing::warn!(layer = layer_index, "execution timed out, abandoning in-flight layer");
                        for abort in &aborts {
                            abort.abort();
                        }
                        halt = Some(Halt::TimedOut);
                        break (&mut layer_future).await;
                    }
                }
            };
            while let Ok(event) = progress_rx.try_recv() {
                self.on_progress(exec, event).await;
            }

            for ((node_id, dispatched_at), joined) in dispatched.into_iter().zip(joined) {
                let (Some(node), Some(entry)) = (nodes.get(node_id.as_str()), entries.get(&node_id)) else {
                    continue;
                };
                let run = joined.unwrap_or_else(|err| self.join_failure(err, dispatched_at, halt == Some(Halt::TimedOut)));
                self.record_run(exec, &root_span, node, &entry.metadata, run).await;
            }

            // A cancel observed while the layer ran still ends the run as cancelled
            if halt.is_none() && cancel.is_cancelled() {
                tracing::info!(layer = layer_index, "cancellation observed during layer, no further layers will start");
                halt = Some(Halt::Cancelled);
            }

            if self.config.fail_fast && halt.is_none() && !exec.failed_nodes().is_empty() {
                tracing::warn!(layer = layer_index, "node failure with fail-fast enabled, stopping");
                halt = Some(Halt::FailFast);
            }
        }

        self.finish(exec, &root_span, halt, run_started).await;
    }

    fn check_halt(&self, exec: &Execution, cancel: &CancellationToken, deadline: Option<Instant>) -> Option<Halt> {
        if cancel.is_cancelled() {
            tracing::info!(execution_id = %exec.id, "cancellation observed, no further layers will start");
            return Some(Halt::Cancelled);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(Halt::TimedOut);
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn prepare_job(
        &self,
        workflow: &Workflow,
        exec: &Execution,
        plan: &ExecutionPlan,
        entries: &HashMap<String, Arc<RegisteredNode>>,
        node: &Node,
        entry: Arc<RegisteredNode>,
        progress_tx: &mpsc::Sender<ProgressEvent>,
    ) -> NodeJob {
        let upstream = plan
            .incoming(&node.id)
            .into_iter()
            .filter_map(|edge| {
                let source = entries.get(&edge.source)?;
                Some(UpstreamOutput {
                    edge: edge.clone(),
                    metadata: source.metadata.clone(),
                    output: exec.node(&edge.source).and_then(|r| r.output.clone()),
                })
            })
            .collect();

        let mut config = node.config.clone();
        config.insert(NODE_ID_KEY.into(), Value::String(node.id.clone()));
        config.insert(EXECUTION_ID_KEY.into(), Value::String(exec.id.clone()));

        let routing = node
            .config
            .get(ROUTING_KEY)
            .and_then(Value::as_bool)
            .or(workflow.settings.intelligent_routing_enabled)
            .unwrap_or(self.config.intelligent_routing);
        let timeout = node
            .config
            .get(TIMEOUT_KEY)
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
            .or_else(|| self.config.node_timeout());

        let progress = ProgressReporter::new(&exec.id, &node.id, progress_tx.clone());
        NodeJob {
            node_id: node.id.clone(),
            entry,
            upstream,
            config,
            routing,
            timeout,
            ctx: NodeContext::new(&node.id, &exec.id, progress, self.costs.clone()),
            collector: self.collector.clone(),
        }
    }

    /// Result for a task that never returned; `started_at` is its dispatch time
    fn join_failure(&self, err: JoinError, started_at: DateTime<Utc>, timed_out: bool) -> NodeRun {
        let failure = if err.is_panic() {
            NodeFailure::new(ErrorKind::Panic, format!("node panicked: {}", panic_message(err)))
        } else if timed_out {
            let limit = self.config.execution_timeout_ms.unwrap_or_default();
            NodeFailure::new(ErrorKind::Timeout, format!("execution timed out after {limit}ms while node was running"))
        } else {
            NodeFailure::new(ErrorKind::Panic, "node task was aborted")
        };
        NodeRun {
            started_at,
            completed_at: Utc::now().max(started_at),
            inputs: None,
            estimated_cost: 0.0,
            routing: None,
            outcome: Err(failure),
        }
    }

    /// Turn a finished node task into its result, spans and steps
    async fn record_run(&self, exec: &mut Execution, root_span: &str, node: &Node, metadata: &NodeMetadata, run: NodeRun) {
        let routing_cost = run.routing.as_ref().map_or(0.0, |r| r.cost);
        let routing_tokens = run.routing.as_ref().and_then(|r| r.token_usage);

        let mut span = Span::start(node.id.clone(), SpanType::from(metadata.operation), Some(root_span));
        span.node_id = Some(node.id.clone());
        span.started_at = run.started_at;
        span.completed_at = Some(run.completed_at);
        span.duration_ms = (run.completed_at - run.started_at).num_milliseconds().max(0) as u64;
        span.input = run.inputs.map(Value::Object);

        let (mut result, child_spans) = match run.outcome {
            Ok(output) => {
                let own_cost = match (output.cost, &output.usage) {
                    (Some(cost), _) if cost.is_finite() => cost.max(0.0),
                    (_, Some(usage)) => self.costs.cost_of(usage),
                    _ => 0.0,
                };
                let mut result = NodeResult::completed(&node.id, &node.node_type, output.data.clone());
                result.cost = own_cost + routing_cost;
                result.token_usage = merge_tokens(output.usage.as_ref().map(TokenUsage::from), routing_tokens);
                result.model = output.model.clone();
                result.provider = output.provider.clone();
                span.status = SpanStatus::Completed;
                span.output = Some(Value::Object(output.data));
                (result, output.spans)
            }
            Err(failure) => {
                tracing::error!(node_id = %node.id, kind = failure.kind.as_str(), error = %failure.message, "node failed");
                let mut result = NodeResult::failed(&node.id, &node.node_type, &failure);
                result.cost = routing_cost;
                result.token_usage = routing_tokens;
                span.status = SpanStatus::Failed;
                span.error_type = Some(failure.kind.as_str().to_string());
                span.error_stack = failure.detail.clone().or_else(|| Some(failure.message.clone()));
                (result, Vec::new())
            }
        };
        result.category = metadata.operation;
        result = result.with_timing(run.started_at, run.completed_at);

        span.cost = result.cost;
        span.token_usage = result.token_usage;
        span.model = result.model.clone();
        span.provider = result.provider.clone();
        let span_id = exec.add_span(span);

        if let Some(routing) = &run.routing {
            exec.attach_child_span(
                &span_id,
                &node.id,
                ChildSpan {
                    name: "routing".into(),
                    span_type: SpanType::Routing,
                    started_at: routing.started_at,
                    completed_at: routing.completed_at,
                    cost: routing.cost,
                    token_usage: routing.token_usage,
                    model: routing.model.clone(),
                    provider: routing.provider.clone(),
                    error: None,
                    data: None,
                },
            );
        }
        for child in child_spans {
            exec.attach_child_span(&span_id, &node.id, child);
        }

        let (action, data, message) = if result.is_completed() {
            tracing::info!(node_id = %node.id, duration_ms = result.duration_ms, cost = result.cost, "node completed");
            let data = json!({
                "cost": result.cost,
                "estimated_cost": run.estimated_cost,
                "duration_ms": result.duration_ms,
                "token_usage": result.token_usage,
            });
            (StepAction::Completed, data, "completed".to_string())
        } else {
            let error = result.error.clone().unwrap_or_default();
            let data = json!({"error": error, "kind": result.error_kind, "cost": result.cost});
            (StepAction::Error, data, format!("failed: {error}"))
        };

        if let Some(consumer) = &self.progress {
            consumer.emit(&ProgressEvent::new(&exec.id, &node.id, 1.0, Some(message)));
        }
        exec.record_result(result);
        self.step(exec, Some(node.id.as_str()), action, Some(data)).await;
        self.persist(exec).await;
    }

    async fn on_progress(&self, exec: &mut Execution, event: ProgressEvent) {
        if let Some(consumer) = &self.progress {
            consumer.emit(&event);
        }
        let data = json!({"fraction": event.fraction, "message": event.message});
        self.step(exec, Some(event.node_id.as_str()), StepAction::Progress, Some(data)).await;
    }

    async fn finish(&self, exec: &mut Execution, root_span: &str, halt: Option<Halt>, run_started: std::time::Instant) {
        exec.aggregate();

        let all_completed = exec.node_results.values().all(NodeResult::is_completed);
        let status = match halt {
            Some(Halt::Cancelled) => ExecutionStatus::Cancelled,
            _ if all_completed => ExecutionStatus::Completed,
            _ => ExecutionStatus::Failed,
        };

        let failed: Vec<String> = exec.failed_nodes().iter().map(|r| r.node_id.clone()).collect();
        exec.error = match (halt, status) {
            (_, ExecutionStatus::Completed) => None,
            (Some(Halt::Cancelled), _) => Some("execution cancelled".to_string()),
            (Some(Halt::TimedOut), _) => Some(format!(
                "execution timed out after {}ms",
                self.config.execution_timeout_ms.unwrap_or_default()
            )),
            _ => Some(format!("{} node(s) failed: {}", failed.len(), failed.join(", "))),
        };

        let root_error = exec
            .error
            .as_ref()
            .filter(|_| status != ExecutionStatus::Completed)
            .map(|message| NodeFailure::new(ErrorKind::Execution, message.clone()));
        exec.finish_span(
            root_span,
            SpanOutcome {
                cost: exec.total_cost,
                token_usage: Some(exec.token_usage).filter(|t| !t.is_empty()),
                error: root_error,
                ..Default::default()
            },
        );

        let action = if status == ExecutionStatus::Completed { StepAction::Completed } else { StepAction::Error };
        let data = json!({"status": status, "total_cost": exec.total_cost, "error": exec.error});
        self.step(exec, None, action, Some(data)).await;

        if let Err(err) = exec.transition(status) {
            tracing::error!(error = %err, "could not finish execution");
        }
        tracing::info!(
            status = %status,
            total_cost = exec.total_cost,
            tokens = exec.token_usage.total_tokens,
            duration_ms = run_started.elapsed().as_millis() as u64,
            "workflow execution finished"
        );
        self.persist(exec).await;
    }

    async fn fail_validation(&self, exec: &mut Execution, errors: Vec<String>) {
        tracing::error!(errors = ?errors, "workflow validation failed");
        exec.error = Some(format!("workflow validation failed: {}", errors.join("; ")));
        exec.validation_errors = errors;
        let data = json!({"validation_errors": exec.validation_errors});
        self.step(exec, None, StepAction::Error, Some(data)).await;
        if let Err(err) = exec.transition(ExecutionStatus::Failed) {
            tracing::error!(error = %err, "could not fail execution");
        }
        self.persist(exec).await;
    }

    /// Record a step and forward it to the sink
    async fn step(&self, exec: &mut Execution, node_id: Option<&str>, action: StepAction, data: Option<Value>) {
        let step = ExecutionStep::new(node_id, action, data);
        if exec.push_step(step.clone()).is_none() {
            return;
        }
        if let Err(err) = self.sink.append_step(&exec.id, &step).await {
            tracing::warn!(error = %err, "failed to persist execution step");
        }
    }

    async fn persist(&self, exec: &Execution) {
        if let Err(err) = self.sink.save(exec).await {
            tracing::warn!(error = %err, "failed to persist execution");
        }
    }
}

/// Body of one node task: collect inputs, estimate, execute under timeout
async fn run_node(job: NodeJob) -> NodeRun {
    let started_at = Utc::now();
    let handler = job.entry.handler.clone();
    let upstream: Vec<Upstream<'_>> = job
        .upstream
        .iter()
        .map(|u| Upstream { edge: &u.edge, metadata: u.metadata.as_ref(), output: u.output.as_ref() })
        .collect();

    let collected = match job.collector.collect(&job.node_id, &job.entry.metadata, &upstream, job.routing).await {
        Ok(collected) => collected,
        Err(err) => {
            tracing::warn!(error = %err, "input collection failed");
            return NodeRun {
                started_at,
                completed_at: Utc::now(),
                inputs: None,
                estimated_cost: 0.0,
                routing: None,
                outcome: Err(NodeFailure::data_collection(&err)),
            };
        }
    };

    let inputs = collected.inputs;
    let estimated_cost = handler.estimate_cost(&job.ctx, &inputs, &job.config);
    tracing::debug!(inputs = inputs.len(), estimated_cost, "executing node");

    let execution = handler.execute(&job.ctx, inputs.clone(), job.config);
    let outcome = match job.timeout {
        Some(limit) => match tokio::time::timeout(limit, execution).await {
            Ok(result) => result.map_err(|err| NodeFailure::from_execution(&err)),
            Err(_) => Err(NodeFailure::timeout(limit.as_millis() as u64)),
        },
        None => execution.await.map_err(|err| NodeFailure::from_execution(&err)),
    };

    NodeRun {
        started_at,
        completed_at: Utc::now(),
        inputs: Some(inputs),
        estimated_cost,
        routing: collected.routing,
        outcome,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn merge_tokens(a: Option<TokenUsage>, b: Option<TokenUsage>) -> Option<TokenUsage> {
    match (a, b) {
        (Some(mut a), Some(b)) => {
            a.add(&b);
            Some(a)
        }
        (a, b) => a.or(b),
    }
}

fn panic_message(err: JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn root_span_name(workflow: &Workflow) -> String {
    if workflow.name.is_empty() {
        workflow.id.clone()
    } else {
        workflow.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::builtin::bootstrap_registry;
    use crate::runtime::trace::NodeStatus;

    fn linear() -> Workflow {
        Workflow::new("wf", "linear")
            .with_node(Node::new("A", "text_input").with_config("text", "hello"))
            .with_node(Node::new("B", "uppercase"))
            .with_edge("A", "B")
    }

    #[tokio::test]
    async fn test_linear_pipeline() {
        let engine = WorkflowEngine::new(Arc::new(bootstrap_registry()));
        let exec = engine.execute(&linear()).await;
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert_eq!(exec.node("B").unwrap().output.as_ref().unwrap()["text"], "HELLO");
        assert!(exec.node_results.values().all(|r| r.status == NodeStatus::Completed));
    }

    #[tokio::test]
    async fn test_span_tree() {
        let engine = WorkflowEngine::new(Arc::new(bootstrap_registry()));
        let exec = engine.execute(&linear()).await;
        let root = exec.root_span_id().unwrap().to_string();
        assert_eq!(exec.spans.iter().filter(|s| s.parent_span_id.as_deref() == Some(root.as_str())).count(), 2);
        assert!(exec.spans.iter().all(|s| s.is_finished()));
        let b = exec.node_span("B").unwrap();
        assert!(b.input.as_ref().unwrap().get("A_text").is_some());
    }
}
