/// Data collector
///
/// Builds the `inputs` mapping of a target node from the outputs of its
/// upstream nodes. Two modes:
///
/// - smart merge: deterministic, local. Upstream outputs are mapped onto
///   semantic keys by the source's declared `OutputRole`, and every field is
///   also kept under `<source_id>_<field>`.
/// - routed: every upstream field is namespaced by source id and the bundle is
///   handed to an external `Router` together with the target's schema.
///
/// Missing upstream output (failed or skipped sources) is never an error here;
/// the collector merges whatever is present.

use crate::error::DataCollectionError;
use crate::nodes::{InputFormat, NodeMetadata, NodeSchema, OutputRole};
use crate::runtime::cost::{CostTracker, TokenUsage, UsageRecord};
use crate::workflow::types::Edge;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, LazyLock},
    time::Duration,
};

/// Key priorities; higher wins, equal priority is last-writer-wins
const PRIORITY_HANDLE: u8 = 3;
const PRIORITY_ROLE: u8 = 2;
const PRIORITY_FALLBACK: u8 = 1;

/// Keys commonly looked up on outputs of nodes without a specific role
const COMMON_KEYS: [&str; 4] = ["output", "data", "text", "results"];

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern"));
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));
static PARAGRAPH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").expect("paragraph pattern"));

/// One edge into the target together with what its source produced
#[derive(Debug, Clone, Copy)]
pub struct Upstream<'a> {
    pub edge: &'a Edge,
    pub metadata: &'a NodeMetadata,
    /// `None` when the source failed or was skipped
    pub output: Option<&'a Map<String, Value>>,
}

/// What the routing collaborator receives
#[derive(Debug, Clone, Serialize)]
pub struct RoutingRequest {
    pub target_node_id: String,
    pub target_type: String,
    /// Every upstream field, keyed `<source_id>_<field>`
    pub bundle: Map<String, Value>,
    pub schema: NodeSchema,
}

/// Router answer: final inputs plus what producing them cost
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutedInputs {
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub usage: Option<UsageRecord>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// Maps an upstream bundle onto a target node's declared inputs
#[async_trait]
pub trait Router: Send + Sync {
    async fn route(&self, request: &RoutingRequest) -> anyhow::Result<RoutedInputs>;
}

/// Cost and timing of one routing call
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingOutcome {
    pub cost: f64,
    pub token_usage: Option<TokenUsage>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectedInputs {
    pub inputs: Map<String, Value>,
    /// Present when the router produced the inputs
    pub routing: Option<RoutingOutcome>,
}

#[derive(Clone, Default)]
pub struct DataCollector {
    router: Option<Arc<dyn Router>>,
    router_timeout: Option<Duration>,
    costs: CostTracker,
}

impl std::fmt::Debug for DataCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCollector")
            .field("router", &self.router.is_some())
            .field("router_timeout", &self.router_timeout)
            .finish()
    }
}

impl DataCollector {
    pub fn new(router: Option<Arc<dyn Router>>, router_timeout: Option<Duration>, costs: CostTracker) -> Self {
        Self { router, router_timeout, costs }
    }

    pub fn has_router(&self) -> bool {
        self.router.is_some()
    }

    /// Produce the target's inputs
    ///
    /// With routing requested but no router configured this falls back to
    /// smart merge.
    pub async fn collect(
        &self,
        target_id: &str,
        target: &NodeMetadata,
        upstream: &[Upstream<'_>],
        routing_enabled: bool,
    ) -> Result<CollectedInputs, DataCollectionError> {
        let router = match (&self.router, routing_enabled) {
            (Some(router), true) => router.clone(),
            (None, true) => {
                tracing::warn!(node_id = target_id, "intelligent routing requested but no router configured, using smart merge");
                return Ok(CollectedInputs { inputs: smart_merge(target, upstream), routing: None });
            }
            (_, false) => return Ok(CollectedInputs { inputs: smart_merge(target, upstream), routing: None }),
        };

        if upstream.is_empty() {
            return Ok(CollectedInputs { inputs: Map::new(), routing: None });
        }

        let request = RoutingRequest {
            target_node_id: target_id.to_string(),
            target_type: target.type_key.clone(),
            bundle: passthrough_bundle(upstream),
            schema: target.schema.clone(),
        };

        tracing::debug!(node_id = target_id, fields = request.bundle.len(), "routing upstream bundle");
        let started_at = Utc::now();
        let routed = match self.router_timeout {
            Some(limit) => tokio::time::timeout(limit, router.route(&request))
                .await
                .map_err(|_| DataCollectionError::RouterTimeout {
                    node_id: target_id.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                })?,
            None => router.route(&request).await,
        }
        .map_err(|source| DataCollectionError::Router { node_id: target_id.to_string(), source })?;
        let completed_at = Utc::now();

        let cost = match (routed.cost, &routed.usage) {
            (Some(cost), _) => cost.max(0.0),
            (None, Some(usage)) => self.costs.cost_of(usage),
            (None, None) => 0.0,
        };
        let outcome = RoutingOutcome {
            cost,
            token_usage: routed.usage.as_ref().map(TokenUsage::from),
            model: routed.model.or_else(|| routed.usage.as_ref().and_then(|u| u.model.clone())),
            provider: routed.provider.or_else(|| routed.usage.as_ref().and_then(|u| u.provider.clone())),
            started_at,
            completed_at,
        };

        Ok(CollectedInputs { inputs: routed.inputs, routing: Some(outcome) })
    }
}

/// Semantic keys a role's primary content is written under
fn role_keys(role: OutputRole) -> &'static [(&'static str, u8)] {
    match role {
        OutputRole::PrimaryText => &[("text", PRIORITY_ROLE), ("topic", PRIORITY_ROLE)],
        OutputRole::Context => &[("context", PRIORITY_ROLE), ("file_content", PRIORITY_ROLE), ("text", PRIORITY_FALLBACK)],
        OutputRole::Summary => &[("summary", PRIORITY_ROLE), ("text", PRIORITY_FALLBACK)],
        OutputRole::StructuredRecords => &[("results", PRIORITY_ROLE), ("records", PRIORITY_ROLE), ("data", PRIORITY_FALLBACK)],
        OutputRole::FormattedDocument => &[("document", PRIORITY_ROLE), ("html", PRIORITY_ROLE), ("text", PRIORITY_FALLBACK)],
        OutputRole::Metadata => &[("metadata", PRIORITY_ROLE)],
        OutputRole::Generic => &[("output", PRIORITY_FALLBACK)],
    }
}

#[derive(Default)]
struct Merge {
    values: Map<String, Value>,
    priorities: HashMap<String, u8>,
}

impl Merge {
    fn offer(&mut self, key: &str, value: &Value, priority: u8) {
        let current = self.priorities.get(key).copied().unwrap_or(0);
        if priority >= current {
            self.priorities.insert(key.to_string(), priority);
            self.values.insert(key.to_string(), value.clone());
        }
    }
}

/// Resolve a source handle: a plain field name, or a JSONPath when it starts
/// with `$`
fn select(output: &Map<String, Value>, handle: &str) -> Option<Value> {
    if !handle.starts_with('$') {
        return output.get(handle).cloned();
    }
    let document = Value::Object(output.clone());
    match jsonpath_lib::select(&document, handle) {
        Ok(found) => match found.as_slice() {
            [] => None,
            [single] => Some((*single).clone()),
            many => Some(Value::Array(many.iter().map(|v| (*v).clone()).collect())),
        },
        Err(err) => {
            tracing::debug!(handle, error = ?err, "invalid JSONPath source handle");
            None
        }
    }
}

/// Deterministic role-based merge of upstream outputs
pub fn smart_merge(target: &NodeMetadata, upstream: &[Upstream<'_>]) -> Map<String, Value> {
    let mut merge = Merge::default();
    let mut dumps = SourceDumps::default();

    for source in upstream {
        let Some(output) = source.output else {
            continue;
        };
        let source_id = &source.edge.source;
        let spec = &source.metadata.output;

        let selected = match source.edge.source_handle.as_deref() {
            Some(handle) => select(output, handle),
            None => output.get(&spec.primary_field).cloned(),
        };

        if let Some(handle) = source.edge.target_handle.as_deref() {
            let value = selected.clone().unwrap_or_else(|| Value::Object(output.clone()));
            merge.offer(handle, &value, PRIORITY_HANDLE);
        } else if let (Some(handle), Some(value)) = (source.edge.source_handle.as_deref(), &selected) {
            if !handle.starts_with('$') {
                merge.offer(handle, value, PRIORITY_HANDLE);
            }
            for (key, priority) in role_keys(spec.role) {
                merge.offer(key, value, *priority);
            }
        } else {
            if let Some(value) = &selected {
                for (key, priority) in role_keys(spec.role) {
                    merge.offer(key, value, *priority);
                }
            }
            if spec.role == OutputRole::Generic {
                for key in COMMON_KEYS {
                    if let Some(value) = output.get(key) {
                        merge.offer(key, value, PRIORITY_FALLBACK);
                    }
                }
            }
        }

        dumps.add(source_id, output);
    }

    let mut inputs = merge.values;
    if let Some(format) = target.input_format {
        apply_format(&mut inputs, format);
    }
    // Source-prefixed dumps always survive, never displacing a semantic key
    dumps.write_into(&mut inputs);
    inputs
}

/// Mode B bundle: every field of every source, namespaced by source id
pub fn passthrough_bundle(upstream: &[Upstream<'_>]) -> Map<String, Value> {
    let mut dumps = SourceDumps::default();
    for source in upstream {
        if let Some(output) = source.output {
            dumps.add(&source.edge.source, output);
        }
    }
    let mut bundle = Map::new();
    dumps.write_into(&mut bundle);
    bundle
}

/// Every field of every source, each source taken once in edge order
#[derive(Default)]
struct SourceDumps<'a> {
    seen: HashSet<&'a str>,
    fields: Vec<(&'a str, &'a str, &'a Value)>,
}

impl<'a> SourceDumps<'a> {
    fn add(&mut self, source_id: &'a str, output: &'a Map<String, Value>) {
        if !self.seen.insert(source_id) {
            return;
        }
        for (field, value) in output {
            self.fields.push((source_id, field.as_str(), value));
        }
    }

    /// Write `<source>_<field>` keys. A key already taken is written as
    /// `<source>::<field>` instead (then `::<field>#<n>`), so no value is lost.
    fn write_into(self, target: &mut Map<String, Value>) {
        for (source_id, field, value) in self.fields {
            let mut key = format!("{source_id}_{field}");
            if target.contains_key(&key) {
                let base = format!("{source_id}::{field}");
                key = base.clone();
                let mut n = 2;
                while target.contains_key(&key) {
                    key = format!("{base}#{n}");
                    n += 1;
                }
                tracing::warn!(source = source_id, field, key = %key, "upstream key collision, field stored under a qualified key");
            }
            target.insert(key, value.clone());
        }
    }
}

fn apply_format(inputs: &mut Map<String, Value>, format: InputFormat) {
    let Some(Value::String(text)) = inputs.get("text") else {
        return;
    };
    let formatted = match format {
        InputFormat::Html => {
            let raw = text.clone();
            let html = to_html_paragraphs(&raw);
            inputs.insert("raw_text".into(), Value::String(raw));
            html
        }
        InputFormat::PlainText => to_plain_text(text),
    };
    inputs.insert("text".into(), Value::String(formatted));
}

/// Escape and wrap blank-line separated paragraphs in `<p>`
pub fn to_html_paragraphs(text: &str) -> String {
    PARAGRAPH_RE
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("<p>{}</p>", escape_html(p).replace('\n', "<br>")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip tags and collapse whitespace
pub fn to_plain_text(text: &str) -> String {
    let stripped = TAG_RE.replace_all(text, " ");
    WHITESPACE_RE.replace_all(&stripped, " ").trim().to_string()
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(role: OutputRole, primary: &str) -> NodeMetadata {
        NodeMetadata::new("t", "t", "test").output(role, primary)
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_primary_text_keys_and_prefix() {
        let edge = Edge::new("e1", "A", "B");
        let source = meta(OutputRole::PrimaryText, "text");
        let out = obj(json!({"text": "hello"}));
        let inputs = smart_merge(&meta(OutputRole::Generic, "output"), &[Upstream { edge: &edge, metadata: &source, output: Some(&out) }]);
        assert_eq!(inputs["text"], "hello");
        assert_eq!(inputs["topic"], "hello");
        assert_eq!(inputs["A_text"], "hello");
    }

    #[test]
    fn test_role_beats_fallback_regardless_of_order() {
        let text_meta = meta(OutputRole::PrimaryText, "text");
        let file_meta = meta(OutputRole::Context, "text");
        let t_out = obj(json!({"text": "from text"}));
        let f_out = obj(json!({"text": "from file"}));
        let e1 = Edge::new("e1", "T1", "M");
        let e2 = Edge::new("e2", "F1", "M");

        for order in [[0, 1], [1, 0]] {
            let all = [
                Upstream { edge: &e1, metadata: &text_meta, output: Some(&t_out) },
                Upstream { edge: &e2, metadata: &file_meta, output: Some(&f_out) },
            ];
            let upstream: Vec<_> = order.iter().map(|&i| all[i]).collect();
            let inputs = smart_merge(&meta(OutputRole::Generic, "output"), &upstream);
            assert_eq!(inputs["text"], "from text");
            assert_eq!(inputs["context"], "from file");
            assert_eq!(inputs["T1_text"], "from text");
            assert_eq!(inputs["F1_text"], "from file");
        }
    }

    #[test]
    fn test_equal_priority_last_writer_wins() {
        let m = meta(OutputRole::PrimaryText, "text");
        let a = obj(json!({"text": "a"}));
        let b = obj(json!({"text": "b"}));
        let e1 = Edge::new("e1", "A", "M");
        let e2 = Edge::new("e2", "B", "M");
        let inputs = smart_merge(
            &meta(OutputRole::Generic, "output"),
            &[Upstream { edge: &e1, metadata: &m, output: Some(&a) }, Upstream { edge: &e2, metadata: &m, output: Some(&b) }],
        );
        assert_eq!(inputs["text"], "b");
        assert_eq!(inputs["A_text"], "a");
    }

    #[test]
    fn test_handles_select_and_rename() {
        let m = meta(OutputRole::StructuredRecords, "results");
        let out = obj(json!({"results": [{"title": "x"}, {"title": "y"}], "count": 2}));
        let e1 = Edge::new("e1", "S", "M").with_handles(Some("$.results[*].title"), Some("titles"));
        let e2 = Edge::new("e2", "S", "M").with_handles(Some("count"), None);
        let inputs = smart_merge(
            &meta(OutputRole::Generic, "output"),
            &[Upstream { edge: &e1, metadata: &m, output: Some(&out) }, Upstream { edge: &e2, metadata: &m, output: Some(&out) }],
        );
        assert_eq!(inputs["titles"], json!(["x", "y"]));
        assert_eq!(inputs["count"], json!(2));
        assert_eq!(inputs["S_count"], json!(2));
    }

    #[test]
    fn test_missing_output_contributes_nothing() {
        let m = meta(OutputRole::PrimaryText, "text");
        let edge = Edge::new("e1", "A", "B");
        let inputs = smart_merge(&meta(OutputRole::Generic, "output"), &[Upstream { edge: &edge, metadata: &m, output: None }]);
        assert!(inputs.is_empty());
    }

    #[test]
    fn test_html_formatter_keeps_raw() {
        let m = meta(OutputRole::PrimaryText, "text");
        let out = obj(json!({"text": "a < b\n\nsecond"}));
        let edge = Edge::new("e1", "A", "H");
        let target = NodeMetadata::new("html_output", "HTML", "output").input_format(InputFormat::Html);
        let inputs = smart_merge(&target, &[Upstream { edge: &edge, metadata: &m, output: Some(&out) }]);
        assert_eq!(inputs["text"], "<p>a &lt; b</p>\n<p>second</p>");
        assert_eq!(inputs["raw_text"], "a < b\n\nsecond");
        assert_eq!(inputs["A_text"], "a < b\n\nsecond");
    }

    #[test]
    fn test_ambiguous_prefixes_keep_both_values() {
        let generic = meta(OutputRole::Generic, "output");
        let text = meta(OutputRole::PrimaryText, "text");
        let a = obj(json!({"x_text": "from A"}));
        let ax = obj(json!({"text": "from A_x"}));
        let e1 = Edge::new("e1", "A", "M");
        let e2 = Edge::new("e2", "A_x", "M");
        let upstream = [
            Upstream { edge: &e1, metadata: &generic, output: Some(&a) },
            Upstream { edge: &e2, metadata: &text, output: Some(&ax) },
        ];

        let inputs = smart_merge(&generic, &upstream);
        assert_eq!(inputs["A_x_text"], "from A");
        assert_eq!(inputs["A_x::text"], "from A_x");

        let bundle = passthrough_bundle(&upstream);
        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle["A_x_text"], "from A");
        assert_eq!(bundle["A_x::text"], "from A_x");
    }

    #[test]
    fn test_prefixed_dump_never_replaces_semantic_key() {
        let m = meta(OutputRole::PrimaryText, "text");
        let out = obj(json!({"text": "first\n\nsecond"}));
        let edge = Edge::new("e1", "raw", "H");
        let target = NodeMetadata::new("html_output", "HTML", "output").input_format(InputFormat::Html);
        let inputs = smart_merge(&target, &[Upstream { edge: &edge, metadata: &m, output: Some(&out) }]);
        assert_eq!(inputs["raw_text"], "first\n\nsecond");
        assert_eq!(inputs["raw::text"], "first\n\nsecond");
        assert_eq!(inputs["text"], "<p>first</p>\n<p>second</p>");
    }

    #[test]
    fn test_plain_text_formatter() {
        assert_eq!(to_plain_text("<b>Hello</b>\n\n  <i>world</i> "), "Hello world");
    }

    #[test]
    fn test_passthrough_namespaces_everything() {
        let m = meta(OutputRole::PrimaryText, "text");
        let a = obj(json!({"text": "a", "n": 1}));
        let b = obj(json!({"text": "b"}));
        let e1 = Edge::new("e1", "A", "M");
        let e2 = Edge::new("e2", "B", "M");
        let bundle = passthrough_bundle(&[
            Upstream { edge: &e1, metadata: &m, output: Some(&a) },
            Upstream { edge: &e2, metadata: &m, output: Some(&b) },
        ]);
        assert_eq!(bundle.len(), 3);
        assert_eq!(bundle["B_text"], "b");
        assert!(!bundle.contains_key("text"));
    }

    struct Failing;

    #[async_trait]
    impl Router for Failing {
        async fn route(&self, _request: &RoutingRequest) -> anyhow::Result<RoutedInputs> {
            anyhow::bail!("mapper unavailable")
        }
    }

    #[tokio::test]
    async fn test_router_error_is_data_collection_error() {
        let collector = DataCollector::new(Some(Arc::new(Failing)), None, CostTracker::default());
        let m = meta(OutputRole::PrimaryText, "text");
        let out = obj(json!({"text": "a"}));
        let edge = Edge::new("e1", "A", "B");
        let err = collector
            .collect("B", &meta(OutputRole::Generic, "output"), &[Upstream { edge: &edge, metadata: &m, output: Some(&out) }], true)
            .await
            .unwrap_err();
        assert!(matches!(err, DataCollectionError::Router { ref node_id, .. } if node_id == "B"));
    }

    #[tokio::test]
    async fn test_routing_without_router_falls_back() {
        let collector = DataCollector::default();
        let m = meta(OutputRole::PrimaryText, "text");
        let out = obj(json!({"text": "a"}));
        let edge = Edge::new("e1", "A", "B");
        let collected = collector
            .collect("B", &meta(OutputRole::Generic, "output"), &[Upstream { edge: &edge, metadata: &m, output: Some(&out) }], true)
            .await
            .unwrap();
        assert!(collected.routing.is_none());
        assert_eq!(collected.inputs["text"], "a");
    }
}
