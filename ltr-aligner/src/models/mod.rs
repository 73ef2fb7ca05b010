//! Data models for ltr-aligner
//!
//! - Alignment job lifecycle state machine
//! - Batch work items and result messages
//! - Run requests
//! - Document sides

pub mod alignment_job;
pub mod batch;
pub mod document_side;
pub mod run_request;

pub use alignment_job::{AlignmentJob, AlignmentState, InvalidTransition, StateTransition};
pub use batch::{
    AlignedBatch, BatchOutcome, BatchResultMessage, BatchScope, BatchWorkItem, ResolveWorkItem,
};
pub use document_side::DocumentSide;
pub use run_request::{
    AlignParams, BatchSelection, ResolveParams, ResolveSelection, RunMode, RunRequest,
};
