//! Approximate token counting from character volume.
//!
//! This is a deliberate over-approximation, not a tokenizer. The only
//! guarantees are monotonicity (more characters never yields fewer tokens)
//! and order-of-magnitude correctness. Tests and callers must not assume the
//! count matches what a provider bills.

use crate::Message;
use crate::context::config::DEFAULT_CHARS_PER_TOKEN;

/// Character-ratio token estimator.
///
/// Counts the characters of every message's content plus the raw argument
/// text of every tool call, then divides by `chars_per_token`, rounding down.
/// Characters are Unicode scalar values, not bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenEstimator {
    chars_per_token: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl TokenEstimator {
    /// Create an estimator with the given ratio.
    ///
    /// The ratio must already be normalized (finite and > 0); see
    /// [`MemoryConfig::new`](crate::MemoryConfig::new). A degenerate ratio
    /// falls back to the default rather than dividing by zero.
    pub fn new(chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token.is_finite() && chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self { chars_per_token }
    }

    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }

    /// Character count this estimator attributes to one message.
    pub fn message_chars(message: &Message) -> usize {
        let content = message.text().chars().count();
        let arguments: usize = message
            .tool_calls
            .iter()
            .flatten()
            .map(|call| call.function.arguments.chars().count())
            .sum();
        content + arguments
    }

    /// Estimate tokens for a sequence of messages.
    pub fn estimate(&self, messages: &[Message]) -> usize {
        let total_chars: usize = messages.iter().map(Self::message_chars).sum();
        self.tokens_for_chars(total_chars)
    }

    /// Estimate tokens for a bare string.
    pub fn estimate_text(&self, text: &str) -> usize {
        self.tokens_for_chars(text.chars().count())
    }

    /// Convert a token budget back into a character allowance.
    pub fn chars_for_tokens(&self, tokens: usize) -> usize {
        (tokens as f64 * self.chars_per_token) as usize
    }

    fn tokens_for_chars(&self, chars: usize) -> usize {
        (chars as f64 / self.chars_per_token) as usize
    }
}

/// Estimate tokens for a message sequence using the default ratio.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    TokenEstimator::default().estimate(messages)
}
