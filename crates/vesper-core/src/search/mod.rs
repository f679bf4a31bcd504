//! Rank fusion
//!
//! Reciprocal Rank Fusion for combining ranked result lists from different
//! retrieval channels (trigger match, embedding similarity, keyword overlap).
//!
//! RRF is effective because:
//! - It normalizes across different scoring scales
//! - It rewards items appearing in multiple result lists
//! - The k constant (60) dampens the effect of high ranks

use std::collections::HashMap;

/// RRF fusion constant
pub const RRF_K: f64 = 60.0;

/// Reciprocal Rank Fusion over any number of ranked lists.
///
/// Each list contributes `1 / (k + rank + 1)` for the item at `rank`
/// (0-based); contributions are summed per item and the fused list is sorted
/// by score descending. Fusion is commutative over the input lists up to
/// tie-breaking.
pub fn reciprocal_rank_fusion(lists: &[Vec<(String, f64)>], k: f64) -> Vec<(String, f64)> {
    let mut scores: HashMap<String, f64> = HashMap::new();

    for list in lists {
        for (rank, (key, _)) in list.iter().enumerate() {
            *scores.entry(key.clone()).or_default() += 1.0 / (k + rank as f64 + 1.0);
        }
    }

    let mut results: Vec<(String, f64)> = scores.into_iter().collect();
    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    results
}

// ============================================================================
// TESTS
// ============================================================================
