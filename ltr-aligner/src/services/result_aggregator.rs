//! Result aggregation
//!
//! The aggregator is the single writer of a run. It performs exactly
//! `expected` receives on the output queue, records progress for each success,
//! and only after the full drain commits the buffered results (align mode) or
//! refreshes the visualization (resolve mode).
//!
//! After the first failure the run is doomed: later successes are still
//! drained so every worker can finish, but nothing more is recorded, nothing
//! is committed, and progress records this run added are rolled back.

use chrono::Utc;
use ltr_common::events::{AlignerEvent, EventBus};
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::alignment_store::AlignmentStore;
use super::collaborators::{RenderOptions, Visualizer};
use crate::db::jobs;
use crate::models::{
    AlignedBatch, AlignmentJob, AlignmentState, BatchOutcome, BatchResultMessage, BatchScope,
    RunMode, StateTransition,
};

/// History operation name for committed align batches
pub const ALIGN_OPERATION: &str = "calculate_custom";

/// Outcome of one drained run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub expected: usize,
    pub received: usize,
    pub failures: usize,
    /// Align mode: batches committed, ascending
    pub committed: Vec<u32>,
    /// Resolve mode: batches whose visualization was refreshed
    pub resolved: Vec<u32>,
    /// Progress records removed because the run failed
    pub rolled_back: Vec<u32>,
    pub final_state: AlignmentState,
}

impl RunSummary {
    pub fn is_error(&self) -> bool {
        self.failures > 0
    }
}

/// Drains one run's output queue
pub struct ResultAggregator {
    db: SqlitePool,
    event_bus: EventBus,
    store: AlignmentStore,
    visualizer: Arc<dyn Visualizer>,
    image_path: PathBuf,
    render: RenderOptions,
    job: AlignmentJob,
    mode: RunMode,
    previously_committed: HashSet<u32>,
}

impl ResultAggregator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        store: AlignmentStore,
        visualizer: Arc<dyn Visualizer>,
        image_path: PathBuf,
        job: AlignmentJob,
        mode: RunMode,
        previously_committed: HashSet<u32>,
    ) -> Self {
        let render = RenderOptions::for_languages(&job.lang_from, &job.lang_to);
        Self {
            db,
            event_bus,
            store,
            visualizer,
            image_path,
            render,
            job,
            mode,
            previously_committed,
        }
    }

    /// Receive exactly `expected` messages, then finalize the run
    ///
    /// A queue that closes early counts every missing message as a failure.
    pub async fn drain(
        &self,
        output: &mut mpsc::UnboundedReceiver<BatchResultMessage>,
        expected: usize,
    ) -> anyhow::Result<RunSummary> {
        let guid = self.job.guid.as_str();

        let mut aligned: Vec<AlignedBatch> = Vec::new();
        let mut resolved: Vec<BatchScope> = Vec::new();
        let mut recorded: Vec<u32> = Vec::new();
        let mut failures = 0usize;
        let mut received = 0usize;

        while received < expected {
            let Some(message) = output.recv().await else {
                let missing = expected - received;
                warn!(alignment_id = %guid, missing, "Output queue closed before all results arrived");
                if failures == 0 {
                    self.mark_failed().await?;
                }
                failures += missing;
                break;
            };
            received += 1;

            let batch_id = message.outcome.batch_id();
            let success = message.outcome.is_success();

            match message.outcome {
                BatchOutcome::Failed { reason } => {
                    warn!(alignment_id = %guid, index = message.index, %reason, "Batch failed");
                    if failures == 0 {
                        self.mark_failed().await?;
                    }
                    failures += 1;
                }
                _ if failures > 0 => {
                    debug!(alignment_id = %guid, index = message.index, "Discarding result after failure");
                }
                BatchOutcome::Aligned(batch) => {
                    let (state, curr) =
                        jobs::record_batch_success(&self.db, self.job.id, batch.batch_id).await?;
                    if !self.previously_committed.contains(&batch.batch_id) {
                        recorded.push(batch.batch_id);
                    }
                    debug!(
                        alignment_id = %guid,
                        batch_id = batch.batch_id,
                        curr_batches = curr,
                        state = state.name(),
                        "Batch progress recorded"
                    );
                    self.emit_progress(curr);
                    aligned.push(batch);
                }
                BatchOutcome::Resolved { scope } => {
                    resolved.push(scope);
                }
            }

            self.event_bus.emit_lossy(AlignerEvent::BatchFinished {
                alignment_guid: guid.to_string(),
                batch_id,
                success,
                received,
                expected,
                timestamp: Utc::now(),
            });
        }

        let mut summary = RunSummary {
            expected,
            received,
            failures,
            committed: Vec::new(),
            resolved: Vec::new(),
            rolled_back: Vec::new(),
            final_state: AlignmentState::Error,
        };

        if failures > 0 {
            let curr = jobs::rollback_progress(&self.db, self.job.id, &recorded).await?;
            warn!(
                alignment_id = %guid,
                failures,
                rolled_back = recorded.len(),
                curr_batches = curr,
                "Run finished with errors, nothing committed"
            );
            self.emit_progress(curr);
            summary.rolled_back = recorded;
        } else {
            match self.mode {
                RunMode::Align => summary.committed = self.commit_aligned(aligned).await?,
                RunMode::Resolve => summary.resolved = self.refresh_resolved(&resolved).await?,
            }

            let (transition, curr, total) = jobs::finish_run(&self.db, self.job.id).await?;
            self.emit_transition(&transition);
            summary.final_state = transition.new_state;

            info!(
                alignment_id = %guid,
                mode = self.mode.as_str(),
                curr_batches = curr,
                total_batches = total,
                state = transition.new_state.name(),
                "Run finished"
            );
        }

        self.event_bus.emit_lossy(AlignerEvent::RunFinished {
            alignment_guid: guid.to_string(),
            committed: summary.committed.clone(),
            error: summary.is_error(),
            final_state: summary.final_state.name().to_string(),
            timestamp: Utc::now(),
        });

        Ok(summary)
    }

    /// Commit in ascending batch order, then history and image per batch
    async fn commit_aligned(&self, mut batches: Vec<AlignedBatch>) -> anyhow::Result<Vec<u32>> {
        batches.sort_by_key(|b| b.batch_id);
        self.store.commit_batch_results(&batches).await?;

        for batch in &batches {
            self.store
                .append_history(
                    ALIGN_OPERATION,
                    batch.batch_id as i64,
                    &json!({ "shift": batch.shift, "window": batch.window }),
                )
                .await?;
            self.visualizer
                .render(
                    self.store.path(),
                    &self.image_path,
                    &[batch.batch_id],
                    &self.render,
                )
                .await?;
        }

        Ok(batches.iter().map(|b| b.batch_id).collect())
    }

    /// One render covering every resolved batch
    async fn refresh_resolved(&self, scopes: &[BatchScope]) -> anyhow::Result<Vec<u32>> {
        let mut ids: Vec<u32> = if scopes.iter().any(|s| s.is_all()) {
            (0..self.job.total_batches).collect()
        } else {
            scopes
                .iter()
                .filter_map(|s| match s {
                    BatchScope::Batch(id) => Some(*id),
                    BatchScope::All => None,
                })
                .collect()
        };
        ids.sort_unstable();
        ids.dedup();

        if !ids.is_empty() {
            self.visualizer
                .render(self.store.path(), &self.image_path, &ids, &self.render)
                .await?;
        }

        Ok(ids)
    }

    async fn mark_failed(&self) -> anyhow::Result<()> {
        let transition = jobs::mark_failed(&self.db, self.job.id).await?;
        self.emit_transition(&transition);
        Ok(())
    }

    fn emit_transition(&self, transition: &StateTransition) {
        if transition.is_change() {
            self.event_bus.emit_lossy(transition.to_event());
        }
    }

    fn emit_progress(&self, curr_batches: u32) {
        self.event_bus.emit_lossy(AlignerEvent::ProgressUpdated {
            alignment_guid: self.job.guid.clone(),
            curr_batches,
            total_batches: self.job.total_batches,
            timestamp: Utc::now(),
        });
    }
}
