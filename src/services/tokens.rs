//! Token counting for context estimation and usage display.
//!
//! Exact mode uses the cl100k_base BPE via tiktoken; if the encoder cannot
//! be constructed the count degrades to the chars/4 heuristic. Counts are
//! advisory and never authoritative for billing.

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

/// Approximate characters per token, used by fallback estimation.
pub const CHARS_PER_TOKEN: usize = 4;

fn encoder() -> Option<&'static CoreBPE> {
    static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();
    ENCODER
        .get_or_init(|| match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                tracing::warn!("tiktoken unavailable, using character-based estimation: {}", e);
                None
            }
        })
        .as_ref()
}

/// Count tokens in a piece of text.
pub fn count_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    match encoder() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.len() / CHARS_PER_TOKEN,
    }
}

/// Character-based estimate, bypassing the exact encoder.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

/// Total tokens across the textual parts of a conversation.
///
/// Multimodal parts contribute only their text; images are not counted.
pub fn count_conversation_tokens(messages: &[crate::providers::ProviderMessage]) -> usize {
    messages
        .iter()
        .map(|msg| {
            msg.content
                .as_deref()
                .map(count_tokens)
                .unwrap_or_default()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_counts_zero() {
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn test_count_is_positive_for_text() {
        assert!(count_tokens("Hello, world!") > 0);
    }

    #[test]
    fn test_longer_text_counts_more() {
        let short = count_tokens("one sentence.");
        let long = count_tokens(&"one sentence. ".repeat(50));
        assert!(long > short);
    }

    #[test]
    fn test_estimate_is_len_over_four() {
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("abc"), 0);
    }
}
