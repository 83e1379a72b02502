/// Node contract
///
/// Every node type implements `NodeHandler`. The engine only ever talks to
/// nodes through this trait: it validates static config before a run, asks for
/// a cost estimate, then calls `execute` with the inputs assembled by the data
/// collector. `execute` is the only method allowed to perform I/O.

use crate::error::FieldError;
use crate::runtime::cost::{CostTracker, UsageRecord};
use crate::runtime::events::ProgressReporter;
use crate::runtime::trace::ChildSpan;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod builtin;
pub mod registry;

pub use registry::{NodeRegistry, RegisteredNode};

/// Reserved config key carrying the node's own id
pub const NODE_ID_KEY: &str = "__node_id";
/// Reserved config key carrying the execution id
pub const EXECUTION_ID_KEY: &str = "__execution_id";
/// Per-node timeout override (milliseconds)
pub const TIMEOUT_KEY: &str = "timeout_ms";
/// Per-node routing mode override
pub const ROUTING_KEY: &str = "intelligent_routing_enabled";

/// The capability every node type implements
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Declared config/input/output shape of this node type
    fn schema(&self) -> NodeSchema;

    /// Check static config against the declared schema. Must not perform I/O.
    fn validate(&self, config: &Map<String, Value>) -> Result<(), Vec<FieldError>> {
        self.schema().validate_config(config)
    }

    /// Best-effort pre-execution estimate; 0.0 when not estimable.
    fn estimate_cost(&self, _ctx: &NodeContext, _inputs: &Map<String, Value>, _config: &Map<String, Value>) -> f64 {
        0.0
    }

    /// Run the node. An `Err` marks the node failed.
    async fn execute(
        &self,
        ctx: &NodeContext,
        inputs: Map<String, Value>,
        config: Map<String, Value>,
    ) -> anyhow::Result<NodeOutput>;
}

/// Per-invocation handle passed to a node
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub node_id: String,
    pub execution_id: String,
    pub progress: ProgressReporter,
    pub costs: CostTracker,
}

impl NodeContext {
    pub fn new(node_id: &str, execution_id: &str, progress: ProgressReporter, costs: CostTracker) -> Self {
        Self {
            node_id: node_id.to_string(),
            execution_id: execution_id.to_string(),
            progress,
            costs,
        }
    }

    /// Context with progress disabled, for calling a node directly
    pub fn detached(node_id: &str) -> Self {
        Self::new(node_id, "", ProgressReporter::disabled(node_id), CostTracker::default())
    }
}

/// What a node returns on success
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    /// Output mapping handed to downstream nodes
    pub data: Map<String, Value>,
    /// Billable usage, priced by the cost tracker when `cost` is not given
    pub usage: Option<UsageRecord>,
    /// Explicit monetary cost, overrides pricing of `usage`
    pub cost: Option<f64>,
    pub model: Option<String>,
    pub provider: Option<String>,
    /// Nested operations performed by the node (e.g. tool calls)
    pub spans: Vec<ChildSpan>,
}

impl NodeOutput {
    pub fn new(data: Map<String, Value>) -> Self {
        Self { data, ..Default::default() }
    }

    /// Output whose primary content is `text`, published under both `text`
    /// and `output` so downstream probing finds it
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut data = Map::new();
        data.insert("text".into(), Value::String(text.clone()));
        data.insert("output".into(), Value::String(text));
        Self::new(data)
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_usage(mut self, usage: UsageRecord) -> Self {
        if self.provider.is_none() {
            self.provider = usage.provider.clone();
        }
        if self.model.is_none() {
            self.model = usage.model.clone();
        }
        self.usage = Some(usage);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_span(mut self, span: ChildSpan) -> Self {
        self.spans.push(span);
        self
    }
}

/// JSON kind accepted by a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
            FieldKind::Any => true,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Array => "array",
            FieldKind::Object => "object",
            FieldKind::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl FieldSpec {
    pub fn required(name: &str, kind: FieldKind) -> Self {
        Self { name: name.to_string(), kind, required: true, description: String::new() }
    }

    pub fn optional(name: &str, kind: FieldKind) -> Self {
        Self { name: name.to_string(), kind, required: false, description: String::new() }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// Declared config, input and output fields of a node type
///
/// The input list is what the routing collaborator maps upstream data onto.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSchema {
    #[serde(default)]
    pub config: Vec<FieldSpec>,
    #[serde(default)]
    pub inputs: Vec<FieldSpec>,
    #[serde(default)]
    pub outputs: Vec<FieldSpec>,
}

impl NodeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, field: FieldSpec) -> Self {
        self.config.push(field);
        self
    }

    pub fn input(mut self, field: FieldSpec) -> Self {
        self.inputs.push(field);
        self
    }

    pub fn output(mut self, field: FieldSpec) -> Self {
        self.outputs.push(field);
        self
    }

    /// Required fields must be present and non-null; present fields must
    /// match their declared kind. Unknown keys are allowed.
    pub fn validate_config(&self, config: &Map<String, Value>) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        for field in &self.config {
            match config.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    errors.push(FieldError::new(&field.name, "is required"));
                }
                Some(value) if !value.is_null() && !field.kind.matches(value) => {
                    errors.push(FieldError::new(&field.name, format!("expected {}", field.kind.as_str())));
                }
                _ => {}
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Semantic role of a node's output, declared at registration
///
/// The data collector maps upstream outputs onto downstream input keys by
/// this role instead of guessing field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputRole {
    PrimaryText,
    Context,
    Summary,
    StructuredRecords,
    FormattedDocument,
    Metadata,
    #[default]
    Generic,
}

/// Output role plus the field holding the node's primary content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub role: OutputRole,
    pub primary_field: String,
}

impl OutputSpec {
    pub fn new(role: OutputRole, primary_field: &str) -> Self {
        Self { role, primary_field: primary_field.to_string() }
    }
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self::new(OutputRole::Generic, "output")
    }
}

/// Formatter applied to a node's merged primary content before it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    Html,
    PlainText,
}

/// Palette entry describing a registered node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub type_key: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub output: OutputSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_format: Option<InputFormat>,
    /// Operation category used for span typing and cost breakdowns
    #[serde(default)]
    pub operation: crate::runtime::cost::OperationCategory,
    #[serde(default)]
    pub schema: NodeSchema,
}

impl NodeMetadata {
    pub fn new(type_key: &str, name: &str, category: &str) -> Self {
        Self {
            type_key: type_key.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            description: String::new(),
            output: OutputSpec::default(),
            input_format: None,
            operation: Default::default(),
            schema: NodeSchema::default(),
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn output(mut self, role: OutputRole, primary_field: &str) -> Self {
        self.output = OutputSpec::new(role, primary_field);
        self
    }

    pub fn input_format(mut self, format: InputFormat) -> Self {
        self.input_format = Some(format);
        self
    }

    pub fn operation(mut self, operation: crate::runtime::cost::OperationCategory) -> Self {
        self.operation = operation;
        self
    }

    pub fn schema(mut self, schema: NodeSchema) -> Self {
        self.schema = schema;
        self
    }
}

/// Read a string config entry
pub fn config_str<'a>(config: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str)
}

/// Primary text of a merged input mapping, probing the common keys
pub fn input_text(inputs: &Map<String, Value>) -> Option<String> {
    ["text", "output", "content", "context", "summary"]
        .iter()
        .find_map(|key| inputs.get(*key))
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> NodeSchema {
        NodeSchema::new()
            .config(FieldSpec::required("text", FieldKind::String))
            .config(FieldSpec::optional("max", FieldKind::Integer))
    }

    #[test]
    fn test_validate_config_ok() {
        let config = json!({"text": "hi", "max": 3, "extra": true});
        assert!(schema().validate_config(config.as_object().unwrap()).is_ok());
    }

    #[test]
    fn test_validate_config_reports_each_field() {
        let config = json!({"max": "three"});
        let errors = schema().validate_config(config.as_object().unwrap()).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "text");
        assert_eq!(errors[1].message, "expected integer");
    }

    #[test]
    fn test_text_output_publishes_common_keys() {
        let out = NodeOutput::text("hello");
        assert_eq!(out.data["text"], "hello");
        assert_eq!(out.data["output"], "hello");
        assert!(out.usage.is_none());
    }

    #[test]
    fn test_with_usage_fills_attribution() {
        let usage = UsageRecord::new(crate::runtime::cost::OperationCategory::Llm).with_model("openai", "gpt-4o");
        let out = NodeOutput::text("x").with_usage(usage);
        assert_eq!(out.provider.as_deref(), Some("openai"));
        assert_eq!(out.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn test_input_text_lookup_order() {
        let inputs = json!({"context": "c", "text": "t"});
        assert_eq!(input_text(inputs.as_object().unwrap()).as_deref(), Some("t"));
        assert!(input_text(&Map::new()).is_none());
    }
}
