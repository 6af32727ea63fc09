//! Tokenizer (C11): text → token count, used for LLM Call Store chunk-size
//! estimation (§4.4) and the Composite LLM's `maxInputTokens` admission
//! check (§4.5).
//!
//! A process-wide, lazily-initialized resource (§5: "first use initializes,
//! thereafter reads are lock-free"). Backed by `tiktoken-rs`'s `cl100k_base`
//! encoding when its rank file is reachable; falls back to a fast heuristic
//! count otherwise so the runtime never hard-fails on a missing vendor
//! asset merely to report a token estimate.

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn encoder() -> &'static Option<CoreBPE> {
    ENCODER.get_or_init(|| match tiktoken_rs::cl100k_base() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            log::warn!("tiktoken encoder unavailable, falling back to heuristic count: {e}");
            None
        }
    })
}

/// Fast, dependency-free estimate: blends a byte-length and word-count
/// signal, which tracks BPE token counts closely enough for budgeting
/// purposes without needing a vocabulary file.
fn heuristic_count(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let words = text.split_whitespace().count();
    let by_bytes = text.len().div_ceil(4);
    let by_words = (words as f64 * 1.3).ceil() as usize;
    by_bytes.max(by_words).max(1)
}

/// Counts tokens in `text`.
pub fn count_tokens(text: &str) -> usize {
    match encoder() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => heuristic_count(text),
    }
}

/// Estimates the serialized size in bytes of an arbitrary JSON-able value,
/// used by the LLM Call Store (§4.4 step 1) to decide whether chunking is
/// needed. Kept separate from `count_tokens` since chunking is a byte-size
/// concern, not a token-budget concern.
pub fn estimate_serialized_size<T: serde::Serialize>(value: &T) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_count_is_monotonic_in_length() {
        let short = heuristic_count("hello world");
        let long = heuristic_count(&"hello world ".repeat(50));
        assert!(long > short);
    }

    #[test]
    fn heuristic_count_of_empty_string_is_zero() {
        assert_eq!(heuristic_count(""), 0);
    }

    #[test]
    fn estimate_serialized_size_reflects_content() {
        let small = estimate_serialized_size(&serde_json::json!({"a": 1}));
        let large = estimate_serialized_size(&serde_json::json!({"a": "x".repeat(1000)}));
        assert!(large > small);
    }
}
