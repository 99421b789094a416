//! Token counter implementations.

use crate::client::{ChatMessage, CompletionRequest};

/// Per-message framing overhead (role marker, separators).
const MESSAGE_OVERHEAD: usize = 3;

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    fn count_messages(&self, messages: &[ChatMessage]) -> usize {
        let mut total = 0;
        for message in messages {
            total += 1 + self.count(&message.content) + MESSAGE_OVERHEAD;
        }
        total
    }
}

/// Roughly four characters per token; good enough for admission estimates.
#[derive(Debug, Clone)]
pub struct CharacterEstimator {
    chars_per_token: f64,
}
impl CharacterEstimator {
    pub fn new() -> Self {
        Self::with_ratio(4.0)
    }
    pub fn with_ratio(r: f64) -> Self {
        Self {
            chars_per_token: if r > 0.0 { r } else { 4.0 },
        }
    }
}
impl Default for CharacterEstimator {
    fn default() -> Self {
        Self::new()
    }
}
impl TokenCounter for CharacterEstimator {
    fn count(&self, text: &str) -> usize {
        (text.len() as f64 / self.chars_per_token).ceil() as usize
    }
}

/// Chars-per-token ratio for Claude-family tokenizers.
const CLAUDE_CHARS_PER_TOKEN: f64 = 3.5;

/// Pick an estimator by model family.
pub fn counter_for_model(model: &str) -> CharacterEstimator {
    if model.to_lowercase().contains("claude") {
        CharacterEstimator::with_ratio(CLAUDE_CHARS_PER_TOKEN)
    } else {
        CharacterEstimator::new()
    }
}

/// Tokens a request may consume: prompt estimate plus the completion ceiling.
pub fn estimate_request_tokens(counter: &dyn TokenCounter, request: &CompletionRequest) -> u64 {
    let prompt = counter.count_messages(&request.messages) as u64;
    prompt + request.max_tokens.map(u64::from).unwrap_or(0)
}
