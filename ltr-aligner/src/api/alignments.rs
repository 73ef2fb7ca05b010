//! Alignment API handlers
//!
//! Create, list and delete jobs, load proxies, start align/resolve runs, stop
//! them, inspect conflicts and refresh images. Runs are detached: the handlers answer 202 once work is queued and the
//! caller polls `GET /alignments/:guid` (or `/events`) for progress.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    models::{
        AlignParams, AlignmentJob, AlignmentState, BatchSelection, DocumentSide, ResolveParams,
        ResolveSelection, RunRequest,
    },
    services::{ConflictSummary, ConflictView, HandleEdges, NewAlignment, SubmitOutcome},
    AppState,
};

fn default_window() -> u32 {
    AlignParams::default().window
}

fn default_amount() -> u32 {
    1
}

/// POST /alignments request
#[derive(Debug, Deserialize)]
pub struct CreateAlignmentRequest {
    #[serde(default)]
    pub name: String,
    pub lang_from: String,
    pub lang_to: String,
    pub lines_from: Vec<String>,
    pub lines_to: Vec<String>,
    #[serde(default)]
    pub proxy_from: Option<Vec<String>>,
    #[serde(default)]
    pub proxy_to: Option<Vec<String>>,
}

/// POST /alignments/:guid/align request
#[derive(Debug, Deserialize)]
pub struct AlignRequest {
    #[serde(default)]
    pub align_all: bool,
    #[serde(default)]
    pub batch_ids: Vec<u32>,
    #[serde(default)]
    pub batch_shift: i64,
    #[serde(default = "default_window")]
    pub window: u32,
    #[serde(default)]
    pub use_proxy_from: bool,
    #[serde(default)]
    pub use_proxy_to: bool,
}

/// POST /alignments/:guid/align/next request
#[derive(Debug, Deserialize)]
pub struct AlignNextRequest {
    #[serde(default = "default_amount")]
    pub amount: u32,
    #[serde(default)]
    pub batch_shift: i64,
    #[serde(default = "default_window")]
    pub window: u32,
    #[serde(default)]
    pub use_proxy_from: bool,
    #[serde(default)]
    pub use_proxy_to: bool,
}

/// POST /alignments/:guid/resolve request
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub resolve_all: bool,
    #[serde(default)]
    pub batch_ids: Vec<u32>,
    #[serde(default)]
    pub handle_start: bool,
    #[serde(default)]
    pub handle_finish: bool,
    #[serde(default)]
    pub use_proxy_from: bool,
    #[serde(default)]
    pub use_proxy_to: bool,
}

/// POST /alignments/:guid/visualize request
#[derive(Debug, Deserialize)]
pub struct VisualizeRequest {
    #[serde(default)]
    pub update_all: bool,
    #[serde(default)]
    pub batch_ids: Vec<u32>,
}

/// POST /alignments/:guid/proxy/:direction request
#[derive(Debug, Deserialize)]
pub struct ProxyRequest {
    pub lines: Vec<String>,
}

/// Query for the conflict inspection endpoints
#[derive(Debug, Default, Deserialize)]
pub struct ConflictQuery {
    #[serde(default)]
    pub handle_edges: HandleEdges,
}

/// Response for run submissions
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub alignment_guid: String,
    /// "started" or "nothing_to_do"
    pub status: String,
    pub mode: String,
    pub batch_ids: Vec<u32>,
    pub workers: usize,
}

/// POST /alignments/:guid/align/stop response
#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub alignment_guid: String,
    pub old_state: AlignmentState,
    pub state: AlignmentState,
}

/// POST /alignments/:guid/visualize response
#[derive(Debug, Serialize)]
pub struct VisualizeResponse {
    pub alignment_guid: String,
    pub rendered: Vec<u32>,
}

/// POST /alignments
///
/// Registers the job and fills its alignment store. Returns 201 with the job.
pub async fn create_alignment(
    State(state): State<AppState>,
    Json(request): Json<CreateAlignmentRequest>,
) -> ApiResult<(StatusCode, Json<AlignmentJob>)> {
    let job = state
        .processor
        .create_job(NewAlignment {
            name: request.name,
            lang_from: request.lang_from,
            lang_to: request.lang_to,
            lines_from: request.lines_from,
            lines_to: request.lines_to,
            proxy_from: request.proxy_from,
            proxy_to: request.proxy_to,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /alignments/:guid
pub async fn get_alignment(
    State(state): State<AppState>,
    Path(guid): Path<String>,
) -> ApiResult<Json<AlignmentJob>> {
    let job = state.processor.get_job(&guid).await?;
    Ok(Json(job))
}

/// GET /alignments
///
/// Live jobs, newest first.
pub async fn list_alignments(State(state): State<AppState>) -> ApiResult<Json<Vec<AlignmentJob>>> {
    Ok(Json(state.processor.list_jobs().await?))
}

/// DELETE /alignments/:guid
pub async fn delete_alignment(
    State(state): State<AppState>,
    Path(guid): Path<String>,
) -> ApiResult<StatusCode> {
    state.processor.delete_job(&guid).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /alignments/:guid/proxy/:direction
///
/// `direction` is `from` or `to`. Returns the updated job.
pub async fn upload_proxy(
    State(state): State<AppState>,
    Path((guid, direction)): Path<(String, String)>,
    Json(request): Json<ProxyRequest>,
) -> ApiResult<Json<AlignmentJob>> {
    let side = DocumentSide::parse(&direction).ok_or_else(|| {
        ApiError::BadRequest(format!("direction must be 'from' or 'to', got '{}'", direction))
    })?;

    let job = state.processor.load_proxy(&guid, side, request.lines).await?;
    Ok(Json(job))
}

/// GET /alignments/:guid/conflicts
pub async fn get_conflicts(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    Query(query): Query<ConflictQuery>,
) -> ApiResult<Json<ConflictSummary>> {
    let summary = state
        .processor
        .conflict_summary(&guid, query.handle_edges)
        .await?;
    Ok(Json(summary))
}

/// GET /alignments/:guid/conflicts/:conflict_id
pub async fn show_conflict(
    State(state): State<AppState>,
    Path((guid, conflict_id)): Path<(String, usize)>,
    Query(query): Query<ConflictQuery>,
) -> ApiResult<Json<ConflictView>> {
    let view = state
        .processor
        .show_conflict(&guid, conflict_id, query.handle_edges)
        .await?;
    Ok(Json(view))
}

/// POST /alignments/:guid/align
///
/// `align_all` wins over `batch_ids` and restarts the batch counter.
pub async fn start_align(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    Json(request): Json<AlignRequest>,
) -> ApiResult<(StatusCode, Json<RunResponse>)> {
    let selection = if request.align_all {
        BatchSelection::All
    } else if request.batch_ids.is_empty() {
        return Err(ApiError::BadRequest(
            "Either align_all or batch_ids is required".to_string(),
        ));
    } else {
        BatchSelection::Explicit(request.batch_ids)
    };

    let params = AlignParams {
        shift: request.batch_shift,
        window: request.window,
        use_proxy_from: request.use_proxy_from,
        use_proxy_to: request.use_proxy_to,
    };

    submit(&state, guid, RunRequest::Align { selection, params }).await
}

/// POST /alignments/:guid/align/next
///
/// Continues after the highest committed batch.
pub async fn start_align_next(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    Json(request): Json<AlignNextRequest>,
) -> ApiResult<(StatusCode, Json<RunResponse>)> {
    let params = AlignParams {
        shift: request.batch_shift,
        window: request.window,
        use_proxy_from: request.use_proxy_from,
        use_proxy_to: request.use_proxy_to,
    };

    submit(
        &state,
        guid,
        RunRequest::Align {
            selection: BatchSelection::Next(request.amount),
            params,
        },
    )
    .await
}

/// POST /alignments/:guid/align/stop
pub async fn stop_alignment(
    State(state): State<AppState>,
    Path(guid): Path<String>,
) -> ApiResult<Json<StopResponse>> {
    let transition = state.processor.stop(&guid).await?;

    Ok(Json(StopResponse {
        alignment_guid: transition.alignment_guid,
        old_state: transition.old_state,
        state: transition.new_state,
    }))
}

/// POST /alignments/:guid/resolve
pub async fn start_resolve(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<(StatusCode, Json<RunResponse>)> {
    let selection = if request.resolve_all {
        ResolveSelection::WholeDocument
    } else if request.batch_ids.is_empty() {
        return Err(ApiError::BadRequest(
            "Either resolve_all or batch_ids is required".to_string(),
        ));
    } else {
        ResolveSelection::Batches(request.batch_ids)
    };

    let params = ResolveParams {
        handle_start: request.handle_start,
        handle_finish: request.handle_finish,
        use_proxy_from: request.use_proxy_from,
        use_proxy_to: request.use_proxy_to,
    };

    submit(&state, guid, RunRequest::Resolve { selection, params }).await
}

/// POST /alignments/:guid/visualize
pub async fn refresh_visualization(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    Json(request): Json<VisualizeRequest>,
) -> ApiResult<Json<VisualizeResponse>> {
    let selection = if request.update_all {
        ResolveSelection::WholeDocument
    } else {
        ResolveSelection::Batches(request.batch_ids)
    };

    let rendered = state
        .processor
        .refresh_visualization(&guid, selection)
        .await?
        .unwrap_or_default();

    Ok(Json(VisualizeResponse {
        alignment_guid: guid,
        rendered,
    }))
}

async fn submit(
    state: &AppState,
    guid: String,
    request: RunRequest,
) -> ApiResult<(StatusCode, Json<RunResponse>)> {
    let mode = request.mode();

    match state.processor.submit_run(&guid, request).await? {
        SubmitOutcome::Accepted(handle) => {
            tracing::info!(
                alignment_id = %guid,
                mode = mode.as_str(),
                batches = handle.batch_ids.len(),
                "Run submitted"
            );
            Ok((
                StatusCode::ACCEPTED,
                Json(RunResponse {
                    alignment_guid: guid,
                    status: "started".to_string(),
                    mode: mode.as_str().to_string(),
                    batch_ids: handle.batch_ids.clone(),
                    workers: handle.workers,
                }),
            ))
        }
        SubmitOutcome::NothingToDo => Ok((
            StatusCode::OK,
            Json(RunResponse {
                alignment_guid: guid,
                status: "nothing_to_do".to_string(),
                mode: mode.as_str().to_string(),
                batch_ids: Vec::new(),
                workers: 0,
            }),
        )),
    }
}

/// Build alignment routes
pub fn alignment_routes() -> Router<AppState> {
    Router::new()
        .route("/alignments", get(list_alignments).post(create_alignment))
        .route(
            "/alignments/:guid",
            get(get_alignment).delete(delete_alignment),
        )
        .route("/alignments/:guid/proxy/:direction", post(upload_proxy))
        .route("/alignments/:guid/conflicts", get(get_conflicts))
        .route("/alignments/:guid/conflicts/:conflict_id", get(show_conflict))
        .route("/alignments/:guid/align", post(start_align))
        .route("/alignments/:guid/align/next", post(start_align_next))
        .route("/alignments/:guid/align/stop", post(stop_alignment))
        .route("/alignments/:guid/resolve", post(start_resolve))
        .route("/alignments/:guid/visualize", post(refresh_visualization))
}
