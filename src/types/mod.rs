//! Request and response types shared by the cache, limiter and client.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ChatMessage`] | Chat message with role and text content |
//! | [`MessageRole`] | System, user or assistant |
//! | [`CompletionRequest`] | Provider, model, messages and sampling parameters |
//! | [`CompletionResponse`] | Completion text plus provider-reported usage |

pub mod message;
pub mod request;

pub use message::{ChatMessage, MessageRole};
pub use request::{CompletionRequest, CompletionResponse};
