//! Alignment job state machine
//!
//! INIT → IN_PROGRESS → {IN_PROGRESS_DONE, DONE, ERROR}
//!
//! IN_PROGRESS_DONE, DONE and ERROR all accept a new run, which moves the job
//! back to IN_PROGRESS. A run that finishes cleanly never force-sets its final
//! state: DONE vs IN_PROGRESS_DONE is recomputed from the batch counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Alignment job lifecycle state (persisted as an integer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlignmentState {
    /// Created, never run
    Init,
    /// A run is queued or executing
    InProgress,
    /// Last run finished cleanly (or was stopped) but batches remain
    InProgressDone,
    /// Every planned batch is committed
    Done,
    /// Last run had at least one failed batch
    Error,
}

/// Rejected state change
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cannot move alignment from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: AlignmentState,
    pub to: AlignmentState,
}

impl AlignmentState {
    pub fn as_i64(self) -> i64 {
        match self {
            AlignmentState::Init => 0,
            AlignmentState::InProgress => 1,
            AlignmentState::InProgressDone => 2,
            AlignmentState::Done => 3,
            AlignmentState::Error => 4,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(AlignmentState::Init),
            1 => Some(AlignmentState::InProgress),
            2 => Some(AlignmentState::InProgressDone),
            3 => Some(AlignmentState::Done),
            4 => Some(AlignmentState::Error),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AlignmentState::Init => "INIT",
            AlignmentState::InProgress => "IN_PROGRESS",
            AlignmentState::InProgressDone => "IN_PROGRESS_DONE",
            AlignmentState::Done => "DONE",
            AlignmentState::Error => "ERROR",
        }
    }

    /// Starting a new run
    ///
    /// Only one run per job may be active; a stuck IN_PROGRESS job has to be
    /// stopped first.
    pub fn start_run(self) -> Result<Self, InvalidTransition> {
        match self {
            AlignmentState::InProgress => Err(InvalidTransition {
                from: self,
                to: AlignmentState::InProgress,
            }),
            _ => Ok(AlignmentState::InProgress),
        }
    }

    /// A batch of the active run succeeded
    ///
    /// Never reverts a stop (IN_PROGRESS_DONE) or a failure already observed.
    pub fn after_batch_success(self) -> Self {
        match self {
            AlignmentState::Init | AlignmentState::InProgress => AlignmentState::InProgress,
            other => other,
        }
    }

    /// A batch of the active run failed
    pub fn after_batch_failure(self) -> Self {
        AlignmentState::Error
    }

    /// User-initiated stop
    pub fn stop(self) -> Self {
        AlignmentState::InProgressDone
    }

    /// Final state of a run drained without failures
    pub fn on_run_completed(curr_batches: u32, total_batches: u32) -> Self {
        if curr_batches == total_batches {
            AlignmentState::Done
        } else {
            AlignmentState::InProgressDone
        }
    }
}

/// State transition record (broadcast as an event)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub alignment_guid: String,
    pub old_state: AlignmentState,
    pub new_state: AlignmentState,
    pub transitioned_at: DateTime<Utc>,
}

impl StateTransition {
    pub fn new(alignment_guid: &str, old_state: AlignmentState, new_state: AlignmentState) -> Self {
        Self {
            alignment_guid: alignment_guid.to_string(),
            old_state,
            new_state,
            transitioned_at: Utc::now(),
        }
    }

    pub fn is_change(&self) -> bool {
        self.old_state != self.new_state
    }

    pub fn to_event(&self) -> ltr_common::events::AlignerEvent {
        ltr_common::events::AlignerEvent::JobStateChanged {
            alignment_guid: self.alignment_guid.clone(),
            old_state: self.old_state.name().to_string(),
            new_state: self.new_state.name().to_string(),
            timestamp: self.transitioned_at,
        }
    }
}

/// One alignment task between two documents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentJob {
    pub id: i64,
    pub guid: String,
    pub name: String,
    pub lang_from: String,
    pub lang_to: String,
    pub state: AlignmentState,
    pub curr_batches: u32,
    pub total_batches: u32,
    pub proxy_from_loaded: bool,
    pub proxy_to_loaded: bool,
    pub created_at: DateTime<Utc>,
}
