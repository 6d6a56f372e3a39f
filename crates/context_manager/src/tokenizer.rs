//! Token counting for lore depth math and lore budgets.
//!
//! A counter is acquired per context build and dropped when the build ends,
//! so BPE tables are never held between builds.

use chat_core::{Message, TokenizerKind};
use tiktoken_rs::CoreBPE;

use crate::error::TokenizerError;

/// Trait for token counting implementations.
pub trait TokenCounter: Send + Sync {
    /// Count tokens in a plain text string.
    fn count_text(&self, text: &str) -> usize;

    /// Count tokens across the text parts of `messages`.
    fn count_messages(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|message| self.count_text(&message.joined_text()))
            .sum()
    }

    fn name(&self) -> &'static str;
}

/// BPE counter backed by `tiktoken-rs`.
pub struct BpeTokenCounter {
    name: &'static str,
    bpe: CoreBPE,
}

impl BpeTokenCounter {
    pub fn o200k() -> Result<Self, TokenizerError> {
        Self::load("o200k_base", tiktoken_rs::o200k_base)
    }

    pub fn cl100k() -> Result<Self, TokenizerError> {
        Self::load("cl100k_base", tiktoken_rs::cl100k_base)
    }

    fn load<E: std::fmt::Display>(
        name: &'static str,
        init: impl FnOnce() -> Result<CoreBPE, E>,
    ) -> Result<Self, TokenizerError> {
        let bpe = init().map_err(|error| TokenizerError {
            name,
            reason: error.to_string(),
        })?;
        Ok(Self { name, bpe })
    }
}

impl TokenCounter for BpeTokenCounter {
    fn count_text(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Heuristic token counter using character-based estimation.
///
/// tokens ≈ characters / 4, plus a 10% margin, rounded up.
#[derive(Debug, Clone)]
pub struct HeuristicTokenCounter {
    /// Characters per token ratio (default: 4)
    chars_per_token: f64,
    /// Safety margin multiplier (default: 1.1 = 10% extra)
    safety_margin: f64,
}

impl HeuristicTokenCounter {
    pub fn new(chars_per_token: f64, safety_margin: f64) -> Self {
        Self {
            chars_per_token,
            safety_margin,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(4.0, 1.1)
    }
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count_text(&self, text: &str) -> usize {
        let chars = text.chars().count() as f64;
        (chars / self.chars_per_token * self.safety_margin).ceil() as usize
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

/// Instantiate the counter configured by `kind`.
pub fn acquire(kind: TokenizerKind) -> Result<Box<dyn TokenCounter>, TokenizerError> {
    let counter: Box<dyn TokenCounter> = match kind {
        TokenizerKind::O200kBase => Box::new(BpeTokenCounter::o200k()?),
        TokenizerKind::Cl100kBase => Box::new(BpeTokenCounter::cl100k()?),
        TokenizerKind::Heuristic => Box::new(HeuristicTokenCounter::with_defaults()),
    };
    tracing::trace!(tokenizer = counter.name(), "tokenizer acquired");
    Ok(counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::Role;

    #[test]
    fn heuristic_rounds_up() {
        let counter = HeuristicTokenCounter::with_defaults();
        assert_eq!(counter.count_text(""), 0);
        assert_eq!(counter.count_text("abcd"), 2);
        assert_eq!(counter.count_text(&"a".repeat(20)), 6);
    }

    #[test]
    fn counts_messages_by_text() {
        let counter = HeuristicTokenCounter::with_defaults();
        let messages = vec![
            Message::text("1", Role::User, "abcd"),
            Message::text("2", Role::Assistant, "abcd"),
        ];
        assert_eq!(counter.count_messages(&messages), 4);
    }

    #[test]
    fn bpe_counts_words() {
        let counter = acquire(TokenizerKind::Cl100kBase).unwrap();
        assert_eq!(counter.name(), "cl100k_base");
        assert_eq!(counter.count_text("hello world"), 2);
    }
}
