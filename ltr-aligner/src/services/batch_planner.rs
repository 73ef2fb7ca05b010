//! Batch planning
//!
//! Turns a selection into the concrete, ordered batch ids of one run. Ids are
//! zero-based and always below `total_batches`. `None` means there is nothing
//! to do and the job must not change state.

use crate::models::BatchSelection;

/// Plan the batch ids of an align run
///
/// - `All`: every batch
/// - `Next(n)`: `n` ids following `last_committed` (from 0 if nothing committed)
/// - `Explicit`: caller ids, deduplicated in first-seen order
///
/// Out-of-range ids are dropped and the result is truncated to
/// `total_batches` entries.
pub fn plan_batches(
    total_batches: u32,
    selection: &BatchSelection,
    last_committed: Option<u32>,
) -> Option<Vec<u32>> {
    let ids: Vec<u32> = match selection {
        BatchSelection::All => (0..total_batches).collect(),
        BatchSelection::Next(amount) => {
            let start = last_committed.map(|last| last.saturating_add(1)).unwrap_or(0);
            let end = start.saturating_add(*amount).min(total_batches);
            (start..end).collect()
        }
        BatchSelection::Explicit(ids) => filter_batch_ids(total_batches, ids),
    };

    non_empty(ids)
}

/// Drop duplicates and ids `>= total_batches`, keeping first-seen order
pub fn filter_batch_ids(total_batches: u32, ids: &[u32]) -> Vec<u32> {
    let mut seen = std::collections::HashSet::new();
    ids.iter()
        .copied()
        .filter(|id| *id < total_batches && seen.insert(*id))
        .take(total_batches as usize)
        .collect()
}

fn non_empty(ids: Vec<u32>) -> Option<Vec<u32>> {
    if ids.is_empty() {
        None
    } else {
        Some(ids)
    }
}
