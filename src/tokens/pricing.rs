//! Model pricing and cost estimation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// USD per 1K tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub model: String,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".into()
}

impl ModelPricing {
    pub fn new(model: &str, input: f64, output: f64) -> Self {
        Self {
            model: model.into(),
            input_cost_per_1k: input,
            output_cost_per_1k: output,
            currency: default_currency(),
        }
    }
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> CostEstimate {
        let ic = (input_tokens as f64 / 1000.0) * self.input_cost_per_1k;
        let oc = (output_tokens as f64 / 1000.0) * self.output_cost_per_1k;
        CostEstimate {
            model: self.model.clone(),
            input_tokens,
            output_tokens,
            input_cost: ic,
            output_cost: oc,
            total_cost: ic + oc,
            currency: self.currency.clone(),
        }
    }
    pub fn gpt_4o() -> Self {
        Self::new("gpt-4o", 0.005, 0.015)
    }
    pub fn gpt_4o_mini() -> Self {
        Self::new("gpt-4o-mini", 0.00015, 0.0006)
    }
    pub fn gpt_41() -> Self {
        Self::new("gpt-4.1", 0.002, 0.008)
    }
    pub fn gpt_35_turbo() -> Self {
        Self::new("gpt-3.5-turbo", 0.0005, 0.0015)
    }
    pub fn o1_mini() -> Self {
        Self::new("o1-mini", 0.003, 0.012)
    }
    pub fn for_model(model: &str) -> Option<Self> {
        let m = model.to_lowercase();
        if m.contains("gpt-4o-mini") {
            Some(Self::gpt_4o_mini())
        } else if m.contains("gpt-4o") {
            Some(Self::gpt_4o())
        } else if m.contains("gpt-4.1") {
            Some(Self::gpt_41())
        } else if m.contains("gpt-3.5-turbo") {
            Some(Self::gpt_35_turbo())
        } else if m.contains("o1-mini") {
            Some(Self::o1_mini())
        } else {
            None
        }
    }
}

/// Built-in prices overlaid with configured overrides (exact model name first).
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    overrides: BTreeMap<String, ModelPricing>,
}

impl PricingTable {
    pub fn new(overrides: BTreeMap<String, ModelPricing>) -> Self {
        Self { overrides }
    }

    pub fn lookup(&self, model: &str) -> Option<ModelPricing> {
        self.overrides
            .get(model)
            .cloned()
            .or_else(|| ModelPricing::for_model(model))
    }

    /// Zero for models with no known price.
    pub fn cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.lookup(model)
            .map(|p| p.calculate_cost(input_tokens, output_tokens).total_cost)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub currency: String,
}

impl CostEstimate {
    pub fn format(&self) -> String {
        format!("{} {:.6}", self.currency, self.total_cost)
    }
}
