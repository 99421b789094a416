//! Client facade: rate limiter, cache, provider adapter and usage tracking
//! composed into one request pipeline.
//!
//! Implementation details are split into submodules under `src/client/`.

pub mod adapter;
pub mod builder;
pub mod core;
pub mod signals;

pub use adapter::ProviderAdapter;
pub use builder::LlmClientBuilder;
pub use core::LlmClient;
pub use signals::SignalsSnapshot;

pub use crate::types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole};
