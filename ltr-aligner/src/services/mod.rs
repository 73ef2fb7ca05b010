//! Service modules for batch alignment
//!
//! - Planning and slicing batches
//! - Work queue, worker pool and result aggregation
//! - Conflict resolution escalation and read-only conflict inspection
//! - Per-job alignment store and the external collaborator bridge

pub mod alignment_store;
pub mod batch_planner;
pub mod batch_processor;
pub mod batch_slicer;
pub mod collaborators;
pub mod conflict_report;
pub mod escalation;
pub mod lingtrain_bridge;
pub mod result_aggregator;
pub mod work_queue;
pub mod worker_pool;

pub use alignment_store::{AlignmentStore, DocumentLines, HistoryEntry, StoredLine};
pub use batch_planner::{filter_batch_ids, plan_batches};
pub use batch_processor::{BatchProcessor, NewAlignment, RunHandle, SubmitOutcome};
pub use collaborators::{
    AlignedGroups, AlignmentEngine, AlignmentTask, Collaborators, ConflictChain, ConflictResolver,
    CorrectParams, DetectParams, DetectedConflicts, RenderOptions, ResolveOptions, Visualizer,
};
pub use conflict_report::{ConflictShapeCount, ConflictSummary, ConflictView, HandleEdges};
pub use escalation::{EscalationController, EscalationPass};
pub use lingtrain_bridge::{BridgeError, LingtrainBridge};
pub use result_aggregator::{ResultAggregator, RunSummary};
pub use work_queue::{QueueItem, WorkQueuePair};
pub use worker_pool::{BatchHandler, WorkerPool};
