/// Deterministic stand-in for an LLM call
///
/// Echoes its prompt back with a prefix and reports token usage against a
/// configurable provider/model, so cost accounting, spans and timeouts can be
/// exercised without network access. `delay_ms` simulates latency, `fail_with`
/// makes the call fail, and each name in `tools` is reported as a nested tool
/// span.

use super::text::render_template;
use crate::nodes::{config_str, input_text, FieldKind, FieldSpec, NodeContext, NodeHandler, NodeMetadata, NodeOutput, NodeSchema, OutputRole};
use crate::runtime::cost::{estimate_tokens, OperationCategory, UsageRecord};
use crate::runtime::trace::{ChildSpan, SpanType};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::time::Duration;

const DEFAULT_PROVIDER: &str = "openai";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct MockLlm;

impl MockLlm {
    pub fn metadata() -> NodeMetadata {
        NodeMetadata::new("mock_llm", "Mock LLM", "ai")
            .describe("Echoing language model with realistic usage accounting")
            .output(OutputRole::PrimaryText, "text")
            .operation(OperationCategory::Llm)
            .schema(MockLlm.schema())
    }

    fn prompt(inputs: &Map<String, Value>, config: &Map<String, Value>) -> String {
        match config_str(config, "prompt") {
            Some(template) => render_template(template, inputs),
            None => input_text(inputs).unwrap_or_default(),
        }
    }

    fn target(config: &Map<String, Value>) -> (String, String) {
        (
            config_str(config, "provider").unwrap_or(DEFAULT_PROVIDER).to_string(),
            config_str(config, "model").unwrap_or(DEFAULT_MODEL).to_string(),
        )
    }
}

#[async_trait]
impl NodeHandler for MockLlm {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new()
            .config(FieldSpec::optional("prompt", FieldKind::String).describe("Template rendered against inputs"))
            .config(FieldSpec::optional("provider", FieldKind::String))
            .config(FieldSpec::optional("model", FieldKind::String))
            .config(FieldSpec::optional("prefix", FieldKind::String))
            .config(FieldSpec::optional("delay_ms", FieldKind::Integer))
            .config(FieldSpec::optional("fail_with", FieldKind::String))
            .config(FieldSpec::optional("tools", FieldKind::Array))
            .input(FieldSpec::optional("text", FieldKind::String))
            .output(FieldSpec::required("text", FieldKind::String))
    }

    fn estimate_cost(&self, ctx: &NodeContext, inputs: &Map<String, Value>, config: &Map<String, Value>) -> f64 {
        let prompt = Self::prompt(inputs, config);
        let (provider, model) = Self::target(config);
        ctx.costs
            .estimate_text(&provider, &model, OperationCategory::Llm, &prompt, estimate_tokens(&prompt))
    }

    async fn execute(&self, ctx: &NodeContext, inputs: Map<String, Value>, config: Map<String, Value>) -> Result<NodeOutput> {
        let started_at = Utc::now();
        let prompt = Self::prompt(&inputs, &config);
        let (provider, model) = Self::target(&config);

        if let Some(delay) = config.get("delay_ms").and_then(Value::as_u64) {
            ctx.progress.report(0.1, "waiting for completion");
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if let Some(message) = config_str(&config, "fail_with") {
            bail!("{provider}/{model} request failed: {message}");
        }

        let prefix = config_str(&config, "prefix").unwrap_or("");
        let response = format!("{prefix}{prompt}");
        let usage = UsageRecord::new(OperationCategory::Llm)
            .with_model(provider.as_str(), model.as_str())
            .with_tokens(estimate_tokens(&prompt), estimate_tokens(&response));

        let mut output = NodeOutput::text(response.clone())
            .with_field("prompt", prompt)
            .with_field("model", model.as_str())
            .with_usage(usage);

        let tools = config.get("tools").and_then(Value::as_array).cloned().unwrap_or_default();
        for tool in tools.iter().filter_map(Value::as_str) {
            output = output.with_span(ChildSpan {
                name: format!("tool:{tool}"),
                span_type: SpanType::Tool,
                started_at,
                completed_at: Utc::now(),
                cost: 0.0,
                token_usage: None,
                model: None,
                provider: None,
                error: None,
                data: Some(json!({"tool": tool})),
            });
        }

        ctx.progress.report(1.0, "completed");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_echo_with_usage() {
        let config = map(json!({"prefix": "> ", "prompt": "Explain {{topic}}", "tools": ["search"]}));
        let out = MockLlm
            .execute(&NodeContext::detached("llm"), map(json!({"topic": "borrowing"})), config)
            .await
            .unwrap();
        assert_eq!(out.data["text"], "> Explain borrowing");
        let usage = out.usage.unwrap();
        assert_eq!(usage.input_tokens, estimate_tokens("Explain borrowing"));
        assert_eq!(out.provider.as_deref(), Some("openai"));
        assert_eq!(out.spans.len(), 1);
        assert_eq!(out.spans[0].span_type, SpanType::Tool);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let config = map(json!({"fail_with": "rate limited"}));
        let err = MockLlm.execute(&NodeContext::detached("llm"), Map::new(), config).await.unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_estimate_uses_pricing() {
        let inputs = map(json!({"text": "a prompt of some length"}));
        let estimate = MockLlm.estimate_cost(&NodeContext::detached("llm"), &inputs, &Map::new());
        assert!(estimate > 0.0);
        let unknown = MockLlm.estimate_cost(&NodeContext::detached("llm"), &inputs, &map(json!({"model": "nope"})));
        assert_eq!(unknown, 0.0);
    }
}
