use crate::types::{Batch, RawItem};
use tracing::debug;

/// Rough chars-per-token ratio for English prose.
const CHARS_PER_TOKEN: usize = 4;
/// Per-item formatting overhead in the prompt (headers, id, score line).
const ITEM_OVERHEAD_TOKENS: usize = 16;

/// Heuristic token cost of one item once formatted into a prompt.
pub fn estimate_tokens(item: &RawItem) -> usize {
    let chars = item.title.as_deref().map_or(0, str::len)
        + item.body.len()
        + item.author.len()
        + item.url.as_deref().map_or(0, str::len)
        + item.flair.as_deref().map_or(0, str::len);
    chars.div_ceil(CHARS_PER_TOKEN) + ITEM_OVERHEAD_TOKENS
}

/// Partitions a corpus into ordered batches whose estimated cost stays within a budget.
#[derive(Debug, Clone, Copy)]
pub struct CorpusChunker {
    budget: usize,
}

impl CorpusChunker {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    /// Greedy, order-preserving split. An item that alone exceeds the budget
    /// becomes its own oversized batch rather than being dropped.
    pub fn chunk(&self, items: &[RawItem]) -> Vec<Batch> {
        let mut batches = Vec::new();
        let mut current: Vec<RawItem> = Vec::new();
        let mut current_tokens = 0;

        for item in items {
            let cost = estimate_tokens(item);
            if !current.is_empty() && current_tokens + cost > self.budget {
                batches.push(Batch {
                    sequence: batches.len(),
                    items: std::mem::take(&mut current),
                    estimated_tokens: current_tokens,
                });
                current_tokens = 0;
            }
            if cost > self.budget {
                debug!(item = %item.key(), cost, budget = self.budget, "Item exceeds batch budget on its own");
            }
            current.push(item.clone());
            current_tokens += cost;
        }

        if !current.is_empty() {
            batches.push(Batch {
                sequence: batches.len(),
                items: current,
                estimated_tokens: current_tokens,
            });
        }

        batches
    }
}

pub fn chunk(items: &[RawItem], budget: usize) -> Vec<Batch> {
    CorpusChunker::new(budget).chunk(items)
}
