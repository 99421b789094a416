//! Token estimation and cost calculation.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TokenCounter`] | Trait for token counting implementations |
//! | [`CharacterEstimator`] | Character-based approximation (4 chars ≈ 1 token) |
//! | [`counter_for_model`] | Estimator tuned to a model family (denser for Claude) |
//! | [`estimate_request_tokens`] | Admission estimate: prompt plus `max_tokens` |
//! | [`ModelPricing`] | Per-1K pricing for one model |
//! | [`PricingTable`] | Built-in prices with configured overrides |
//!
//! ```rust
//! use llm_guard_core::tokens::{CharacterEstimator, ModelPricing, TokenCounter};
//!
//! let counter = CharacterEstimator::new();
//! let tokens = counter.count("Hello, how are you?") as u64;
//! let estimate = ModelPricing::gpt_4o_mini().calculate_cost(tokens, 100);
//! println!("{}", estimate.format());
//! ```

mod counter;
mod pricing;

pub use counter::{counter_for_model, estimate_request_tokens, CharacterEstimator, TokenCounter};
pub use pricing::{CostEstimate, ModelPricing, PricingTable};
