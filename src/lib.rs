//! # llm-guard-core
//!
//! Caching, rate limiting and usage accounting for multi-provider LLM clients.
//!
//! ## Overview
//!
//! The crate sits between application code and provider adapters (the code
//! that actually speaks HTTP to OpenAI or an OpenAI-compatible endpoint). Every
//! completion goes through the same pipeline:
//!
//! 1. the [`resilience::RateLimiter`] admits the call, or backs off until the
//!    per-minute and per-day budgets allow it;
//! 2. the [`cache::CacheManager`] is asked for a stored answer;
//! 3. on a miss the injected [`client::ProviderAdapter`] is called and the
//!    answer is cached;
//! 4. the [`usage::UsageTracker`] records tokens and cost, and the limiter
//!    replaces its estimate with the real token count.
//!
//! No network I/O happens inside this crate, and there is no global state:
//! caches, limiters and usage ledgers are explicit objects that can be shared
//! between clients through `Arc`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use llm_guard_core::client::{CompletionRequest, CompletionResponse, LlmClient, ProviderAdapter};
//! use llm_guard_core::config::CoreConfig;
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl ProviderAdapter for Echo {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!     async fn complete(&self, req: &CompletionRequest) -> llm_guard_core::Result<CompletionResponse> {
//!         Ok(CompletionResponse::new(req.messages[0].content.clone(), &req.model).with_usage(5, 5))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> llm_guard_core::Result<()> {
//!     let config = CoreConfig::from_file("llm-guard.yaml")?;
//!     let client = LlmClient::builder()
//!         .with_config(config)
//!         .with_adapter(Arc::new(Echo))
//!         .build()?;
//!
//!     let request = CompletionRequest::new("echo", "echo-1").with_prompt("hello");
//!     let first = client.complete(&request).await?;
//!     let second = client.complete(&request).await?;
//!     assert!(!first.cached && second.cached);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Cache keys, Null/Memory/SQLite backends, cache manager |
//! | [`resilience`] | Sliding-window rate limiter |
//! | [`usage`] | Usage ledgers, scopes and sinks |
//! | [`client`] | Request pipeline, provider adapter trait, builder |
//! | [`batch`] | Ordered sequential/concurrent batch execution |
//! | [`tokens`] | Token estimation and pricing |
//! | [`config`] | Serde configuration with eager validation |
//! | [`clock`] | Injectable time source |
//! | [`types`] | Request, response and message types |

pub mod batch;
pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod resilience;
pub mod tokens;
pub mod types;
pub mod usage;
pub mod utils;

pub use client::{LlmClient, LlmClientBuilder, ProviderAdapter};
pub use config::CoreConfig;
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
