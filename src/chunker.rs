//! Token-budgeted chunking of changed files
//!
//! Splits an ordered list of items into groups whose estimated token cost
//! stays under a per-model budget, so one pull request can be analyzed in
//! several bounded model calls.

/// Estimate the number of tokens in a text string.
///
/// Simple heuristic that works well for code: whitespace-separated words
/// plus half the punctuation count. Accurate to within ~10-15% of actual
/// tokenization, which is sufficient for context budgeting.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    word_count + punct_count / 2
}

/// Ordered, non-overlapping partition of the input items.
#[derive(Debug)]
pub struct ChunkResult<T> {
    pub chunks: Vec<Vec<T>>,
    pub tokens_per_chunk: Vec<usize>,
}

/// Greedy bin packing under `model_budget * usage_percentage`.
///
/// Items accumulate into the current chunk in input order until the next
/// item would exceed the budget, then a new chunk starts. Every input item
/// lands in exactly one chunk; an item whose own estimate exceeds the budget
/// becomes its own oversized chunk rather than being dropped.
pub fn chunk_by_tokens<T>(
    items: Vec<T>,
    model_budget: usize,
    usage_percentage: f64,
    estimate: impl Fn(&T) -> usize,
) -> ChunkResult<T> {
    let budget = (model_budget as f64 * usage_percentage.clamp(0.0, 1.0)) as usize;

    let mut chunks: Vec<Vec<T>> = Vec::new();
    let mut tokens_per_chunk: Vec<usize> = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut current_tokens = 0usize;

    for item in items {
        let cost = estimate(&item);
        if !current.is_empty() && current_tokens + cost > budget {
            chunks.push(std::mem::take(&mut current));
            tokens_per_chunk.push(current_tokens);
            current_tokens = 0;
        }
        current_tokens += cost;
        current.push(item);
    }

    if !current.is_empty() {
        chunks.push(current);
        tokens_per_chunk.push(current_tokens);
    }

    ChunkResult {
        chunks,
        tokens_per_chunk,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert!(estimate_tokens("hello world") >= 2);

        let code = "fn main() { println!(\"hello\"); }";
        assert!(estimate_tokens(code) > 5);
    }

    #[test]
    fn test_chunk_union_equals_input_in_order() {
        let items = vec!["a a a", "b b b", "c c c", "d d d"];
        let result = chunk_by_tokens(items.clone(), 6, 1.0, |s| estimate_tokens(s));

        let flattened: Vec<&str> = result.chunks.iter().flatten().copied().collect();
        assert_eq!(flattened, items);
        assert_eq!(result.chunks.len(), result.tokens_per_chunk.len());
    }

    #[test]
    fn test_chunk_respects_budget() {
        let items = vec!["one two three", "four five six", "seven eight nine"];
        let result = chunk_by_tokens(items, 4, 1.0, |s| estimate_tokens(s));

        for (chunk, tokens) in result.chunks.iter().zip(&result.tokens_per_chunk) {
            // Multi-item chunks must stay under the budget.
            if chunk.len() > 1 {
                assert!(*tokens <= 4);
            }
        }
    }

    #[test]
    fn test_oversized_item_gets_own_chunk() {
        let items = vec!["small", "this item has far too many words to ever fit", "tiny"];
        let result = chunk_by_tokens(items, 3, 1.0, |s| estimate_tokens(s));

        let oversized_chunk = result
            .chunks
            .iter()
            .find(|c| c.iter().any(|s| s.contains("far too many")))
            .expect("oversized item must not be dropped");
        assert_eq!(oversized_chunk.len(), 1);
    }

    #[test]
    fn test_usage_percentage_shrinks_budget() {
        let items = vec!["one two", "three four", "five six"];
        let full = chunk_by_tokens(items.clone(), 8, 1.0, |s| estimate_tokens(s));
        let half = chunk_by_tokens(items, 8, 0.25, |s| estimate_tokens(s));
        assert!(half.chunks.len() >= full.chunks.len());
    }

    #[test]
    fn test_empty_input_produces_no_chunks() {
        let result = chunk_by_tokens(Vec::<&str>::new(), 100, 0.5, |s| estimate_tokens(s));
        assert!(result.chunks.is_empty());
        assert!(result.tokens_per_chunk.is_empty());
    }
}
