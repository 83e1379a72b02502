/// Cost tracking
///
/// Pure computation: prices token usage through a `PricingTable` and folds
/// per-node costs into execution-level breakdowns. Nothing here performs I/O.

use crate::runtime::trace::NodeResult;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

/// Coarse category of a cost-bearing operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    Embedding,
    Llm,
    VectorSearch,
    Rerank,
    Routing,
    Tool,
    #[default]
    Other,
}

impl OperationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationCategory::Embedding => "embedding",
            OperationCategory::Llm => "llm",
            OperationCategory::VectorSearch => "vector_search",
            OperationCategory::Rerank => "rerank",
            OperationCategory::Routing => "routing",
            OperationCategory::Tool => "tool",
            OperationCategory::Other => "other",
        }
    }
}

/// Token and call counts reported by a node for pricing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub category: OperationCategory,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    /// Billable calls, priced with `Rate::per_call`
    #[serde(default)]
    pub calls: u64,
}

impl UsageRecord {
    pub fn new(category: OperationCategory) -> Self {
        Self { category, calls: 1, ..Default::default() }
    }

    pub fn with_model(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }

    pub fn with_tokens(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }
}

/// Input/output/total token counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self { input_tokens, output_tokens, total_tokens: input_tokens + output_tokens }
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.input_tokens == 0 && self.output_tokens == 0
    }
}

impl From<&UsageRecord> for TokenUsage {
    fn from(usage: &UsageRecord) -> Self {
        TokenUsage::new(usage.input_tokens, usage.output_tokens)
    }
}

/// Monetary rate for one provider/model/category combination (USD)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
    pub per_call: f64,
}

impl Rate {
    pub const ZERO: Rate = Rate { input_per_1k: 0.0, output_per_1k: 0.0, per_call: 0.0 };

    pub fn tokens(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self { input_per_1k, output_per_1k, per_call: 0.0 }
    }
}

/// Source of prices. Must be deterministic and must never fail: unknown
/// combinations price at `Rate::ZERO`.
pub trait PricingTable: Send + Sync {
    fn price_for(&self, provider: &str, model: &str, category: OperationCategory) -> Rate;
}

/// In-memory price list keyed by (provider, model, category)
#[derive(Debug, Clone, Default)]
pub struct StaticPricing {
    rates: HashMap<(String, String, OperationCategory), Rate>,
}

impl StaticPricing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(
        mut self,
        provider: impl Into<String>,
        model: impl Into<String>,
        category: OperationCategory,
        rate: Rate,
    ) -> Self {
        self.rates.insert((provider.into(), model.into(), category), rate);
        self
    }

    /// A small table of commonly used hosted models
    pub fn with_defaults() -> Self {
        Self::new()
            .with_rate("openai", "gpt-4o-mini", OperationCategory::Llm, Rate::tokens(0.00015, 0.0006))
            .with_rate("openai", "gpt-4o", OperationCategory::Llm, Rate::tokens(0.0025, 0.01))
            .with_rate("openai", "text-embedding-3-small", OperationCategory::Embedding, Rate::tokens(0.00002, 0.0))
            .with_rate("anthropic", "claude-3-5-haiku", OperationCategory::Llm, Rate::tokens(0.0008, 0.004))
            .with_rate("cohere", "rerank-english-v3.0", OperationCategory::Rerank, Rate { per_call: 0.002, ..Rate::ZERO })
    }
}

impl PricingTable for StaticPricing {
    fn price_for(&self, provider: &str, model: &str, category: OperationCategory) -> Rate {
        self.rates
            .get(&(provider.to_string(), model.to_string(), category))
            .copied()
            .unwrap_or(Rate::ZERO)
    }
}

/// Prices usage records against a pricing table
#[derive(Clone)]
pub struct CostTracker {
    pricing: Arc<dyn PricingTable>,
}

impl std::fmt::Debug for CostTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostTracker").finish_non_exhaustive()
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new(Arc::new(StaticPricing::with_defaults()))
    }
}

impl CostTracker {
    pub fn new(pricing: Arc<dyn PricingTable>) -> Self {
        Self { pricing }
    }

    /// Monetary cost of one usage record. Records without a provider/model
    /// cannot be priced and cost nothing.
    pub fn cost_of(&self, usage: &UsageRecord) -> f64 {
        let (Some(provider), Some(model)) = (usage.provider.as_deref(), usage.model.as_deref()) else {
            return 0.0;
        };
        let rate = self.pricing.price_for(provider, model, usage.category);
        let cost = usage.input_tokens as f64 / 1000.0 * rate.input_per_1k
            + usage.output_tokens as f64 / 1000.0 * rate.output_per_1k
            + usage.calls as f64 * rate.per_call;
        if cost.is_finite() && cost > 0.0 {
            cost
        } else {
            0.0
        }
    }

    /// Price a prompt before it is sent, assuming `expected_output_tokens`
    pub fn estimate_text(
        &self,
        provider: &str,
        model: &str,
        category: OperationCategory,
        text: &str,
        expected_output_tokens: u64,
    ) -> f64 {
        let usage = UsageRecord::new(category)
            .with_model(provider, model)
            .with_tokens(estimate_tokens(text), expected_output_tokens);
        self.cost_of(&usage)
    }
}

/// Rough token estimate: ~4 characters per token
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as f64 / 4.0).ceil() as u64
}

/// Execution-level cost aggregation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub total: f64,
    pub by_category: BTreeMap<String, f64>,
    pub by_provider: BTreeMap<String, f64>,
    pub by_model: BTreeMap<String, f64>,
    pub by_node: BTreeMap<String, f64>,
}

impl CostBreakdown {
    /// Fold node results into totals. Every result counts, whatever its
    /// status, so spend on failed runs is never lost.
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a NodeResult>) -> Self {
        let mut breakdown = CostBreakdown::default();
        for result in results {
            breakdown.total += result.cost;
            *breakdown.by_node.entry(result.node_id.clone()).or_default() += result.cost;
            if result.cost == 0.0 {
                continue;
            }
            *breakdown
                .by_category
                .entry(result.category.as_str().to_string())
                .or_default() += result.cost;
            let provider = result.provider.clone().unwrap_or_else(|| "unknown".to_string());
            *breakdown.by_provider.entry(provider).or_default() += result.cost;
            let model = result.model.clone().unwrap_or_else(|| "unknown".to_string());
            *breakdown.by_model.entry(model).or_default() += result.cost;
        }
        breakdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> CostTracker {
        CostTracker::new(Arc::new(
            StaticPricing::new().with_rate("openai", "gpt-test", OperationCategory::Llm, Rate::tokens(1.0, 2.0)),
        ))
    }

    #[test]
    fn test_cost_of_known_model() {
        let usage = UsageRecord::new(OperationCategory::Llm)
            .with_model("openai", "gpt-test")
            .with_tokens(500, 250);
        assert!((tracker().cost_of(&usage) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_costs_nothing() {
        let usage = UsageRecord::new(OperationCategory::Llm)
            .with_model("openai", "does-not-exist")
            .with_tokens(10_000, 10_000);
        assert_eq!(tracker().cost_of(&usage), 0.0);

        let unattributed = UsageRecord::new(OperationCategory::Llm).with_tokens(10_000, 0);
        assert_eq!(tracker().cost_of(&unattributed), 0.0);
    }

    #[test]
    fn test_category_is_part_of_the_key() {
        let usage = UsageRecord::new(OperationCategory::Embedding)
            .with_model("openai", "gpt-test")
            .with_tokens(1000, 0);
        assert_eq!(tracker().cost_of(&usage), 0.0);
    }

    #[test]
    fn test_per_call_rate() {
        let pricing = StaticPricing::with_defaults();
        let rate = pricing.price_for("cohere", "rerank-english-v3.0", OperationCategory::Rerank);
        assert_eq!(rate.per_call, 0.002);
        let usage = UsageRecord::new(OperationCategory::Rerank).with_model("cohere", "rerank-english-v3.0");
        assert!((CostTracker::default().cost_of(&usage) - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_token_usage_add() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage::new(3, 4));
        total.add(&TokenUsage::new(1, 0));
        assert_eq!(total, TokenUsage { input_tokens: 4, output_tokens: 4, total_tokens: 8 });
    }
}
