//! Batch work items and per-batch result messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One slice of the source/target documents, ready for the alignment engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchWorkItem {
    pub batch_id: u32,
    pub lines_from: Vec<String>,
    pub lines_to: Vec<String>,
    /// Store ids of `lines_from`, same length
    pub line_ids_from: Vec<i64>,
    /// Store ids of `lines_to`, same length
    pub line_ids_to: Vec<i64>,
    pub proxy_from: Option<Vec<String>>,
    pub proxy_to: Option<Vec<String>>,
    pub shift: i64,
    pub window: u32,
}

/// Which batches a conflict-resolution item covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "batch_id")]
pub enum BatchScope {
    /// Whole document, processed as one item
    All,
    Batch(u32),
}

impl BatchScope {
    /// Wire/history encoding (`-1` for the whole document)
    pub fn as_i64(self) -> i64 {
        match self {
            BatchScope::All => -1,
            BatchScope::Batch(id) => id as i64,
        }
    }

    pub fn is_all(self) -> bool {
        matches!(self, BatchScope::All)
    }
}

/// One conflict-resolution unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveWorkItem {
    pub scope: BatchScope,
    /// Total batch count of the job
    pub batch_amount: u32,
    pub handle_start: bool,
    pub handle_finish: bool,
}

/// Alignment output for one batch, held until the run commits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedBatch {
    pub batch_id: u32,
    pub aligned_from: Vec<Value>,
    pub aligned_to: Vec<Value>,
    pub shift: i64,
    pub window: u32,
}

/// What a worker reports for one item
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Aligned(AlignedBatch),
    Resolved { scope: BatchScope },
    Failed { reason: String },
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, BatchOutcome::Failed { .. })
    }

    /// Batch id for progress reporting (`None` for failures and whole-document items)
    pub fn batch_id(&self) -> Option<u32> {
        match self {
            BatchOutcome::Aligned(batch) => Some(batch.batch_id),
            BatchOutcome::Resolved {
                scope: BatchScope::Batch(id),
            } => Some(*id),
            _ => None,
        }
    }
}

/// Message on the output queue: item position in the run plus its outcome
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResultMessage {
    pub index: usize,
    pub outcome: BatchOutcome,
}

impl BatchResultMessage {
    pub fn failed(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            outcome: BatchOutcome::Failed {
                reason: reason.into(),
            },
        }
    }
}
