//! Read-only conflict inspection
//!
//! One detection sweep over the whole document with fixed thresholds. The
//! store is never modified and no history is written.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::alignment_store::StoredLine;
use super::collaborators::{ConflictChain, DetectParams, DetectedConflicts};

pub const INSPECT_MIN_CHAIN_LENGTH: u32 = 2;
pub const INSPECT_MAX_CONFLICTS_LEN: u32 = 20;

/// Which document edges detection may look at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleEdges {
    #[default]
    None,
    Start,
    Finish,
    Both,
}

impl HandleEdges {
    pub fn handle_start(self) -> bool {
        matches!(self, HandleEdges::Start | HandleEdges::Both)
    }

    pub fn handle_finish(self) -> bool {
        matches!(self, HandleEdges::Finish | HandleEdges::Both)
    }

    pub fn detect_params(self) -> DetectParams {
        DetectParams {
            batch_id: -1,
            min_chain_length: INSPECT_MIN_CHAIN_LENGTH,
            max_conflicts_len: INSPECT_MAX_CONFLICTS_LEN,
            handle_start: self.handle_start(),
            handle_finish: self.handle_finish(),
        }
    }
}

/// Number of conflicts of one form, e.g. `"2:1"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictShapeCount {
    pub shape: String,
    pub count: usize,
}

/// Conflict counts grouped by form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSummary {
    pub total: usize,
    /// Most frequent first
    pub items: Vec<ConflictShapeCount>,
}

/// Split lines covered by one conflict
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictView {
    /// Index into the detected conflicts, `None` when there are none
    pub index: Option<usize>,
    pub from: Vec<StoredLine>,
    pub to: Vec<StoredLine>,
}

/// In-range chains first, then the rest
pub fn all_chains(found: DetectedConflicts) -> Vec<ConflictChain> {
    let mut chains = found.conflicts;
    chains.extend(found.rest_conflicts);
    chains
}

/// Count chains by form; chains without readable line ids are `"unknown"`
pub fn summarize(chains: &[ConflictChain]) -> ConflictSummary {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for chain in chains {
        let shape = chain.shape().unwrap_or_else(|| "unknown".to_string());
        *counts.entry(shape).or_default() += 1;
    }

    let mut items: Vec<ConflictShapeCount> = counts
        .into_iter()
        .map(|(shape, count)| ConflictShapeCount { shape, count })
        .collect();
    // Stable: equal counts keep the shape order from the map
    items.sort_by(|a, b| b.count.cmp(&a.count));

    ConflictSummary {
        total: chains.len(),
        items,
    }
}

/// Any id maps onto an existing conflict by wrapping around
pub fn wrap_index(conflict_id: usize, len: usize) -> Option<usize> {
    (len > 0).then(|| conflict_id % len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain(from: &[i64], to: &[i64]) -> ConflictChain {
        ConflictChain(json!({ "from": from, "to": to }))
    }

    #[test]
    fn test_edges_map_to_detect_flags() {
        let params = HandleEdges::Both.detect_params();
        assert_eq!(params.batch_id, -1);
        assert_eq!(params.min_chain_length, 2);
        assert_eq!(params.max_conflicts_len, 20);
        assert!(params.handle_start && params.handle_finish);

        assert!(HandleEdges::Start.handle_start());
        assert!(!HandleEdges::Start.handle_finish());
        assert!(!HandleEdges::None.handle_start());
        assert!(HandleEdges::Finish.handle_finish());
    }

    #[test]
    fn test_summary_groups_by_shape_most_frequent_first() {
        let found = DetectedConflicts {
            conflicts: vec![chain(&[1, 2], &[1]), chain(&[5], &[4, 5])],
            rest_conflicts: vec![
                chain(&[8, 9], &[7]),
                chain(&[10, 11], &[9]),
                ConflictChain(json!("opaque")),
            ],
        };

        let summary = summarize(&all_chains(found));
        assert_eq!(summary.total, 5);
        let shapes: Vec<(&str, usize)> = summary
            .items
            .iter()
            .map(|i| (i.shape.as_str(), i.count))
            .collect();
        assert_eq!(shapes, vec![("2:1", 3), ("1:2", 1), ("unknown", 1)]);
    }

    #[test]
    fn test_wrap_index() {
        assert_eq!(wrap_index(0, 3), Some(0));
        assert_eq!(wrap_index(7, 3), Some(1));
        assert_eq!(wrap_index(4, 0), None);
    }
}
