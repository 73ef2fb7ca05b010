//! Batch processor
//!
//! Entry point for alignment runs. `submit_run` plans the batches, moves the
//! job to IN_PROGRESS and returns as soon as the work is queued; workers and
//! the aggregator then run on a detached task. Callers observe progress by
//! polling the job row (or the event stream).

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use ltr_common::events::{AlignerEvent, EventBus};
use ltr_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use super::alignment_store::AlignmentStore;
use super::batch_planner::{filter_batch_ids, plan_batches};
use super::batch_slicer::slice_batches;
use super::collaborators::{
    AlignmentEngine, AlignmentTask, Collaborators, ConflictChain, RenderOptions, ResolveOptions,
};
use super::conflict_report::{self, ConflictSummary, ConflictView, HandleEdges};
use super::escalation::EscalationController;
use super::result_aggregator::{ResultAggregator, RunSummary};
use super::work_queue::{worker_count, WorkQueuePair};
use super::worker_pool::{BatchHandler, WorkerPool};
use crate::config::{AlignerSettings, StoragePaths};
use crate::db::{jobs, progress};
use crate::models::{
    AlignParams, AlignedBatch, AlignmentJob, BatchOutcome, BatchScope, BatchSelection,
    BatchWorkItem, DocumentSide, ResolveParams, ResolveSelection, ResolveWorkItem, RunMode, RunRequest,
    StateTransition,
};

/// Input for a new alignment job
#[derive(Debug, Clone, Default)]
pub struct NewAlignment {
    pub name: String,
    pub lang_from: String,
    pub lang_to: String,
    pub lines_from: Vec<String>,
    pub lines_to: Vec<String>,
    pub proxy_from: Option<Vec<String>>,
    pub proxy_to: Option<Vec<String>>,
}

/// Result of a run submission
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Work queued; the run continues in the background
    Accepted(RunHandle),
    /// The plan was empty; the job was not touched
    NothingToDo,
}

/// Handle to a detached run
///
/// Dropping it leaves the run going.
#[derive(Debug)]
pub struct RunHandle {
    pub mode: RunMode,
    pub batch_ids: Vec<u32>,
    pub workers: usize,
    task: JoinHandle<anyhow::Result<RunSummary>>,
}

impl RunHandle {
    /// Wait for the run to drain
    pub async fn wait(self) -> anyhow::Result<RunSummary> {
        self.task.await.context("Run task ended abnormally")?
    }
}

/// Orchestrates alignment runs for all jobs
#[derive(Clone)]
pub struct BatchProcessor {
    db: SqlitePool,
    settings: Arc<AlignerSettings>,
    paths: StoragePaths,
    collaborators: Collaborators,
    event_bus: EventBus,
    last_error: Arc<RwLock<Option<String>>>,
}

impl BatchProcessor {
    pub fn new(
        db: SqlitePool,
        settings: AlignerSettings,
        paths: StoragePaths,
        collaborators: Collaborators,
        event_bus: EventBus,
    ) -> Self {
        Self {
            db,
            settings: Arc::new(settings),
            paths,
            collaborators,
            event_bus,
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn settings(&self) -> &AlignerSettings {
        &self.settings
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Last aborted run, for diagnostics
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    fn store_path(&self, job: &AlignmentJob) -> std::path::PathBuf {
        self.paths
            .alignment_db_path(&job.lang_from, &job.lang_to, &job.guid)
    }

    /// Register a new job and fill its alignment store
    pub async fn create_job(&self, new: NewAlignment) -> Result<AlignmentJob> {
        validate_new_alignment(&new)?;

        let guid = Uuid::new_v4().simple().to_string();
        let store_path = self
            .paths
            .alignment_db_path(&new.lang_from, &new.lang_to, &guid);

        let store = AlignmentStore::open(&store_path).await?;
        store
            .fill(
                &new.lines_from,
                &new.lines_to,
                new.proxy_from.as_deref(),
                new.proxy_to.as_deref(),
            )
            .await?;
        store.close().await;

        let total_batches = self.settings.total_batches_for(new.lines_from.len());
        let job = jobs::insert_job(
            &self.db,
            &jobs::NewJob {
                guid,
                name: new.name,
                lang_from: new.lang_from,
                lang_to: new.lang_to,
                total_batches,
                proxy_from_loaded: new.proxy_from.is_some(),
                proxy_to_loaded: new.proxy_to.is_some(),
            },
        )
        .await?;

        info!(
            alignment_id = %job.guid,
            lines_from = new.lines_from.len(),
            lines_to = new.lines_to.len(),
            total_batches,
            "Alignment created"
        );

        Ok(job)
    }

    pub async fn get_job(&self, guid: &str) -> Result<AlignmentJob> {
        jobs::require_job(&self.db, guid).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<AlignmentJob>> {
        jobs::list_jobs(&self.db).await
    }

    /// Soft delete; the store file stays on disk
    pub async fn delete_job(&self, guid: &str) -> Result<()> {
        if !jobs::mark_deleted(&self.db, guid).await? {
            return Err(Error::NotFound(format!("Alignment {} not found", guid)));
        }
        info!(alignment_id = %guid, "Alignment deleted");
        Ok(())
    }

    /// Load (or replace) the proxy translation of one side
    pub async fn load_proxy(
        &self,
        guid: &str,
        side: DocumentSide,
        lines: Vec<String>,
    ) -> Result<AlignmentJob> {
        let job = jobs::require_job(&self.db, guid).await?;

        let store = AlignmentStore::open_existing(&self.store_path(&job)).await?;
        let loaded = store.load_proxy(side, &lines).await;
        store.close().await;
        loaded?;

        let job = jobs::set_proxy_loaded(&self.db, job.id, side).await?;
        info!(
            alignment_id = %guid,
            side = side.as_str(),
            lines = lines.len(),
            "Proxy loaded"
        );
        Ok(job)
    }

    /// Count current conflicts over the whole document by form
    pub async fn conflict_summary(&self, guid: &str, edges: HandleEdges) -> Result<ConflictSummary> {
        let (_, chains) = self.detect_for_inspection(guid, edges).await?;
        Ok(conflict_report::summarize(&chains))
    }

    /// Lines covered by one conflict; ids wrap around the detected list
    pub async fn show_conflict(
        &self,
        guid: &str,
        conflict_id: usize,
        edges: HandleEdges,
    ) -> Result<ConflictView> {
        let (store_path, chains) = self.detect_for_inspection(guid, edges).await?;
        let Some(index) = conflict_report::wrap_index(conflict_id, chains.len()) else {
            return Ok(ConflictView::default());
        };

        let (from_ids, to_ids) = chains[index].line_ids().ok_or_else(|| {
            Error::Internal(format!("Conflict {} has no readable line ids", index))
        })?;

        let store = AlignmentStore::open_existing(&store_path).await?;
        let from = store.lines_by_ids(DocumentSide::From, &from_ids).await;
        let to = store.lines_by_ids(DocumentSide::To, &to_ids).await;
        store.close().await;

        Ok(ConflictView {
            index: Some(index),
            from: from?,
            to: to?,
        })
    }

    async fn detect_for_inspection(
        &self,
        guid: &str,
        edges: HandleEdges,
    ) -> Result<(std::path::PathBuf, Vec<ConflictChain>)> {
        let job = jobs::require_job(&self.db, guid).await?;
        let store_path = self.store_path(&job);
        if !store_path.exists() {
            return Err(Error::NotFound(format!(
                "Alignment store for {} does not exist",
                guid
            )));
        }

        let found = self
            .collaborators
            .resolver
            .detect_conflicts(&store_path, &edges.detect_params())
            .await
            .map_err(|e| Error::Internal(format!("Conflict detection failed: {:#}", e)))?;

        Ok((store_path, conflict_report::all_chains(found)))
    }

    /// Plan, queue and detach one run
    pub async fn submit_run(&self, guid: &str, request: RunRequest) -> Result<SubmitOutcome> {
        let job = jobs::require_job(&self.db, guid).await?;

        match request {
            RunRequest::Align { selection, params } => {
                self.submit_align(job, selection, params).await
            }
            RunRequest::Resolve { selection, params } => {
                self.submit_resolve(job, selection, params).await
            }
        }
    }

    async fn submit_align(
        &self,
        job: AlignmentJob,
        selection: BatchSelection,
        params: AlignParams,
    ) -> Result<SubmitOutcome> {
        let last_committed = progress::last_committed_batch(&self.db, job.id).await?;
        let Some(batch_ids) = plan_batches(job.total_batches, &selection, last_committed) else {
            info!(alignment_id = %job.guid, ?selection, "Nothing to align");
            return Ok(SubmitOutcome::NothingToDo);
        };

        let store = AlignmentStore::open_existing(&self.store_path(&job)).await?;
        let doc = store.read_lines().await?;
        let items = slice_batches(&doc, self.settings.batch_size, &batch_ids, &params);

        // Read before the run starts; only batches outside this set are
        // rolled back if the run fails
        let previously_committed: HashSet<u32> = progress::committed_batch_ids(&self.db, job.id)
            .await?
            .into_iter()
            .collect();

        let reset = selection == BatchSelection::All;
        let transition = jobs::begin_run(&self.db, job.id, reset).await?;
        self.emit_transition(&transition);

        let handler: Arc<dyn BatchHandler<BatchWorkItem>> = Arc::new(AlignBatchHandler {
            engine: self.collaborators.engine.clone(),
            model_name: self.settings.model_name.clone(),
            embed_batch_size: self.settings.embed_batch_size,
            normalize_embeddings: self.settings.normalize_embeddings,
            use_proxy_from: params.use_proxy_from,
            use_proxy_to: params.use_proxy_to,
        });

        let aggregator = self.aggregator(&job, store, RunMode::Align, previously_committed);
        Ok(SubmitOutcome::Accepted(self.launch(
            &job,
            RunMode::Align,
            batch_ids,
            items,
            handler,
            aggregator,
        )))
    }

    async fn submit_resolve(
        &self,
        job: AlignmentJob,
        selection: ResolveSelection,
        params: ResolveParams,
    ) -> Result<SubmitOutcome> {
        let scopes: Vec<BatchScope> = match &selection {
            ResolveSelection::WholeDocument if job.total_batches > 0 => vec![BatchScope::All],
            ResolveSelection::WholeDocument => Vec::new(),
            ResolveSelection::Batches(ids) => filter_batch_ids(job.total_batches, ids)
                .into_iter()
                .map(BatchScope::Batch)
                .collect(),
        };
        if scopes.is_empty() {
            info!(alignment_id = %job.guid, ?selection, "Nothing to resolve");
            return Ok(SubmitOutcome::NothingToDo);
        }

        let store = AlignmentStore::open_existing(&self.store_path(&job)).await?;

        let transition = jobs::begin_run(&self.db, job.id, false).await?;
        self.emit_transition(&transition);

        let batch_ids: Vec<u32> = match scopes.as_slice() {
            [BatchScope::All] => (0..job.total_batches).collect(),
            _ => scopes
                .iter()
                .filter_map(|s| match s {
                    BatchScope::Batch(id) => Some(*id),
                    BatchScope::All => None,
                })
                .collect(),
        };

        let items: Vec<ResolveWorkItem> = scopes
            .into_iter()
            .map(|scope| ResolveWorkItem {
                scope,
                batch_amount: job.total_batches,
                handle_start: params.handle_start,
                handle_finish: params.handle_finish,
            })
            .collect();

        let controller = EscalationController::new(
            self.collaborators.resolver.clone(),
            store.clone(),
            ResolveOptions {
                model_name: self.settings.model_name.clone(),
                use_proxy_from: params.use_proxy_from,
                use_proxy_to: params.use_proxy_to,
            },
        );
        let handler: Arc<dyn BatchHandler<ResolveWorkItem>> =
            Arc::new(ResolveBatchHandler { controller });

        let aggregator = self.aggregator(&job, store, RunMode::Resolve, HashSet::new());
        Ok(SubmitOutcome::Accepted(self.launch(
            &job,
            RunMode::Resolve,
            batch_ids,
            items,
            handler,
            aggregator,
        )))
    }

    /// Force the job to IN_PROGRESS_DONE; running batches still finish
    pub async fn stop(&self, guid: &str) -> Result<StateTransition> {
        let job = jobs::require_job(&self.db, guid).await?;
        let transition = jobs::stop_run(&self.db, job.id).await?;
        self.emit_transition(&transition);

        info!(
            alignment_id = %guid,
            old_state = transition.old_state.name(),
            "Alignment stopped"
        );
        Ok(transition)
    }

    /// Re-render the visualization for selected batches
    ///
    /// Returns the rendered ids, or `None` when the selection is empty.
    pub async fn refresh_visualization(
        &self,
        guid: &str,
        selection: ResolveSelection,
    ) -> Result<Option<Vec<u32>>> {
        let job = jobs::require_job(&self.db, guid).await?;

        let ids = match selection {
            ResolveSelection::WholeDocument => (0..job.total_batches).collect(),
            ResolveSelection::Batches(ids) => filter_batch_ids(job.total_batches, &ids),
        };
        if ids.is_empty() {
            return Ok(None);
        }

        let store_path = self.store_path(&job);
        if !store_path.exists() {
            return Err(Error::NotFound(format!(
                "Alignment store for {} does not exist",
                guid
            )));
        }

        self.collaborators
            .visualizer
            .render(
                &store_path,
                &self.paths.visualization_path(&job.guid),
                &ids,
                &RenderOptions::for_languages(&job.lang_from, &job.lang_to),
            )
            .await
            .map_err(|e| Error::Internal(format!("Visualization failed: {:#}", e)))?;

        Ok(Some(ids))
    }

    fn aggregator(
        &self,
        job: &AlignmentJob,
        store: AlignmentStore,
        mode: RunMode,
        previously_committed: HashSet<u32>,
    ) -> ResultAggregator {
        ResultAggregator::new(
            self.db.clone(),
            self.event_bus.clone(),
            store,
            self.collaborators.visualizer.clone(),
            self.paths.visualization_path(&job.guid),
            job.clone(),
            mode,
            previously_committed,
        )
    }

    fn launch<T>(
        &self,
        job: &AlignmentJob,
        mode: RunMode,
        batch_ids: Vec<u32>,
        items: Vec<T>,
        handler: Arc<dyn BatchHandler<T>>,
        aggregator: ResultAggregator,
    ) -> RunHandle
    where
        T: Send + 'static,
    {
        let workers = worker_count(self.settings.processors, items.len());

        self.event_bus.emit_lossy(AlignerEvent::RunStarted {
            alignment_guid: job.guid.clone(),
            mode: mode.as_str().to_string(),
            batch_ids: batch_ids.clone(),
            workers,
            timestamp: Utc::now(),
        });
        info!(
            alignment_id = %job.guid,
            mode = mode.as_str(),
            batches = items.len(),
            workers,
            "Run accepted"
        );

        let guid = job.guid.clone();
        let last_error = self.last_error.clone();
        let task = tokio::spawn(async move {
            let result = execute_run(items, workers, handler, aggregator).await;
            if let Err(e) = &result {
                // Job stays IN_PROGRESS until stopped
                let message = format!("{:#}", e);
                error!(alignment_id = %guid, error = %message, "Run aborted");
                *last_error.write().await = Some(format!("{}: {}", guid, message));
            }
            result
        });

        RunHandle {
            mode,
            batch_ids,
            workers,
            task,
        }
    }

    fn emit_transition(&self, transition: &StateTransition) {
        if transition.is_change() {
            self.event_bus.emit_lossy(transition.to_event());
        }
    }
}

/// Queue the items, start the workers and drain the results
pub async fn execute_run<T>(
    items: Vec<T>,
    workers: usize,
    handler: Arc<dyn BatchHandler<T>>,
    aggregator: ResultAggregator,
) -> anyhow::Result<RunSummary>
where
    T: Send + 'static,
{
    let queue = WorkQueuePair::new();
    let expected = queue.submit(items, workers)?;
    let (input, output_tx, mut output_rx) = queue.split();

    let pool = WorkerPool::spawn(workers, input, output_tx, handler);

    let summary = tokio::spawn(async move { aggregator.drain(&mut output_rx, expected).await })
        .await
        .context("Aggregator task ended abnormally")??;

    pool.join().await;
    Ok(summary)
}

fn validate_new_alignment(new: &NewAlignment) -> Result<()> {
    if new.lang_from.trim().is_empty() || new.lang_to.trim().is_empty() {
        return Err(Error::InvalidInput("Both languages are required".to_string()));
    }
    if new.lines_from.is_empty() || new.lines_to.is_empty() {
        return Err(Error::InvalidInput("Both documents must have lines".to_string()));
    }
    if let Some(proxy) = &new.proxy_from {
        if proxy.len() != new.lines_from.len() {
            return Err(Error::InvalidInput(format!(
                "proxy_from has {} lines, expected {}",
                proxy.len(),
                new.lines_from.len()
            )));
        }
    }
    if let Some(proxy) = &new.proxy_to {
        if proxy.len() != new.lines_to.len() {
            return Err(Error::InvalidInput(format!(
                "proxy_to has {} lines, expected {}",
                proxy.len(),
                new.lines_to.len()
            )));
        }
    }
    Ok(())
}

/// Aligns one batch through the engine
pub struct AlignBatchHandler {
    engine: Arc<dyn AlignmentEngine>,
    model_name: String,
    embed_batch_size: usize,
    normalize_embeddings: bool,
    use_proxy_from: bool,
    use_proxy_to: bool,
}

#[async_trait]
impl BatchHandler<BatchWorkItem> for AlignBatchHandler {
    async fn handle(&self, item: BatchWorkItem) -> anyhow::Result<BatchOutcome> {
        let batch_id = item.batch_id;
        let shift = item.shift;
        let window = item.window;

        let task = AlignmentTask {
            batch_id,
            lines_from: item.lines_from,
            lines_to: item.lines_to,
            line_ids_from: item.line_ids_from,
            line_ids_to: item.line_ids_to,
            proxy_from: item.proxy_from.filter(|_| self.use_proxy_from),
            proxy_to: item.proxy_to.filter(|_| self.use_proxy_to),
            model_name: self.model_name.clone(),
            window,
            embed_batch_size: self.embed_batch_size,
            normalize_embeddings: self.normalize_embeddings,
        };

        let groups = self
            .engine
            .compute_alignment(task)
            .await
            .with_context(|| format!("Alignment of batch {} failed", batch_id))?;

        Ok(BatchOutcome::Aligned(AlignedBatch {
            batch_id,
            aligned_from: groups.aligned_from,
            aligned_to: groups.aligned_to,
            shift,
            window,
        }))
    }
}

/// Runs the escalation sequence for one item
pub struct ResolveBatchHandler {
    controller: EscalationController,
}

#[async_trait]
impl BatchHandler<ResolveWorkItem> for ResolveBatchHandler {
    async fn handle(&self, item: ResolveWorkItem) -> anyhow::Result<BatchOutcome> {
        self.controller.run(&item).await?;
        Ok(BatchOutcome::Resolved { scope: item.scope })
    }
}
