/// Text-shaped built-in nodes
///
/// `text_input`, `uppercase`, `template`, `summarize` and `html_output`. None of
/// them perform I/O, so they double as the canonical fixtures for engine tests.

use crate::nodes::{
    config_str, input_text, FieldKind, FieldSpec, InputFormat, NodeContext, NodeHandler, NodeMetadata, NodeOutput,
    NodeSchema, OutputRole,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").expect("placeholder pattern"));
static SENTENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^.!?]+[.!?]*").expect("sentence pattern"));

/// Emits its configured `text`
pub struct TextInput;

impl TextInput {
    pub fn metadata() -> NodeMetadata {
        NodeMetadata::new("text_input", "Text Input", "input")
            .describe("Static text entered by the workflow author")
            .output(OutputRole::PrimaryText, "text")
            .schema(TextInput.schema())
    }
}

#[async_trait]
impl NodeHandler for TextInput {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new()
            .config(FieldSpec::required("text", FieldKind::String))
            .output(FieldSpec::required("text", FieldKind::String))
    }

    async fn execute(&self, _ctx: &NodeContext, _inputs: Map<String, Value>, config: Map<String, Value>) -> Result<NodeOutput> {
        let text = config_str(&config, "text").ok_or_else(|| anyhow!("text_input requires a 'text' config value"))?;
        Ok(NodeOutput::text(text))
    }
}

/// Upper-cases the primary text of its inputs
pub struct Uppercase;

impl Uppercase {
    pub fn metadata() -> NodeMetadata {
        NodeMetadata::new("uppercase", "Uppercase", "transform")
            .output(OutputRole::PrimaryText, "text")
            .schema(Uppercase.schema())
    }
}

#[async_trait]
impl NodeHandler for Uppercase {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new()
            .input(FieldSpec::required("text", FieldKind::String).describe("Text to transform"))
            .output(FieldSpec::required("text", FieldKind::String))
    }

    async fn execute(&self, ctx: &NodeContext, inputs: Map<String, Value>, _config: Map<String, Value>) -> Result<NodeOutput> {
        let text = input_text(&inputs).ok_or_else(|| anyhow!("node '{}' received no text input", ctx.node_id))?;
        Ok(NodeOutput::text(text.to_uppercase()))
    }
}

/// Renders `{{key}}` / `{{key.field}}` placeholders against its inputs
pub struct Template;

impl Template {
    pub fn metadata() -> NodeMetadata {
        NodeMetadata::new("template", "Template", "transform")
            .describe("Fill a text template from upstream values")
            .output(OutputRole::PrimaryText, "text")
            .schema(Template.schema())
    }
}

/// Substitute placeholders; unresolved placeholders are left as written
pub fn render_template(template: &str, values: &Map<String, Value>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            let mut parts = key.splitn(2, '.');
            let head = parts.next().unwrap_or_default();
            let found = match (values.get(key), parts.next()) {
                (Some(value), _) => Some(value),
                (None, Some(field)) => values.get(head).and_then(|v| lookup(v, field)),
                (None, None) => None,
            };
            match found {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[async_trait]
impl NodeHandler for Template {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new()
            .config(FieldSpec::required("template", FieldKind::String))
            .output(FieldSpec::required("text", FieldKind::String))
    }

    async fn execute(&self, _ctx: &NodeContext, inputs: Map<String, Value>, config: Map<String, Value>) -> Result<NodeOutput> {
        let template = config_str(&config, "template").ok_or_else(|| anyhow!("template requires a 'template' config value"))?;
        Ok(NodeOutput::text(render_template(template, &inputs)))
    }
}

/// Extractive summary: the first `sentences` sentences of its input
pub struct Summarize;

impl Summarize {
    pub fn metadata() -> NodeMetadata {
        NodeMetadata::new("summarize", "Summarize", "transform")
            .output(OutputRole::Summary, "summary")
            .schema(Summarize.schema())
    }
}

#[async_trait]
impl NodeHandler for Summarize {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new()
            .config(FieldSpec::optional("sentences", FieldKind::Integer))
            .input(FieldSpec::required("text", FieldKind::String))
            .output(FieldSpec::required("summary", FieldKind::String))
    }

    async fn execute(&self, ctx: &NodeContext, inputs: Map<String, Value>, config: Map<String, Value>) -> Result<NodeOutput> {
        let text = input_text(&inputs).ok_or_else(|| anyhow!("node '{}' has nothing to summarize", ctx.node_id))?;
        let limit = config.get("sentences").and_then(Value::as_u64).unwrap_or(2).max(1) as usize;
        let summary = SENTENCE_RE
            .find_iter(&text)
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .take(limit)
            .collect::<Vec<_>>()
            .join(" ");

        Ok(NodeOutput::text(summary.clone()).with_field("summary", summary))
    }
}

/// Wraps its input in a minimal HTML document
///
/// Declares the HTML input formatter, so its `text` input already arrives as
/// escaped `<p>` paragraphs.
pub struct HtmlOutput;

impl HtmlOutput {
    pub fn metadata() -> NodeMetadata {
        NodeMetadata::new("html_output", "HTML Output", "output")
            .output(OutputRole::FormattedDocument, "html")
            .input_format(InputFormat::Html)
            .schema(HtmlOutput.schema())
    }
}

#[async_trait]
impl NodeHandler for HtmlOutput {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new()
            .config(FieldSpec::optional("title", FieldKind::String))
            .input(FieldSpec::required("text", FieldKind::String))
            .output(FieldSpec::required("html", FieldKind::String))
    }

    async fn execute(&self, _ctx: &NodeContext, inputs: Map<String, Value>, config: Map<String, Value>) -> Result<NodeOutput> {
        let body = match inputs.get("text") {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        };
        let title = config_str(&config, "title").unwrap_or("Result");
        let html = format!("<html><head><title>{title}</title></head><body>\n{body}\n</body></html>");
        Ok(NodeOutput::new(Map::new()).with_field("html", html.clone()).with_field("output", html))
    }
}
