//! Alignment job persistence
//!
//! All state changes go through here. Each change is a single statement or a
//! short transaction that starts with a write, so SQLite takes the write lock
//! up front and concurrent writers serialize instead of deadlocking.

use chrono::{DateTime, Utc};
use ltr_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};

use super::progress;
use crate::models::{AlignmentJob, AlignmentState, DocumentSide, StateTransition};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Fields needed to register a new job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub guid: String,
    pub name: String,
    pub lang_from: String,
    pub lang_to: String,
    pub total_batches: u32,
    pub proxy_from_loaded: bool,
    pub proxy_to_loaded: bool,
}

const JOB_COLUMNS: &str = "id, guid, name, lang_from, lang_to, state, curr_batches, \
     total_batches, proxy_from_loaded, proxy_to_loaded, created_at";

fn job_from_row(row: &SqliteRow) -> Result<AlignmentJob> {
    let state_raw: i64 = row.get("state");
    let state = AlignmentState::from_i64(state_raw)
        .ok_or_else(|| Error::Internal(format!("Unknown alignment state {}", state_raw)))?;

    let created_at: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(AlignmentJob {
        id: row.get("id"),
        guid: row.get("guid"),
        name: row.get("name"),
        lang_from: row.get("lang_from"),
        lang_to: row.get("lang_to"),
        state,
        curr_batches: row.get::<i64, _>("curr_batches") as u32,
        total_batches: row.get::<i64, _>("total_batches") as u32,
        proxy_from_loaded: row.get("proxy_from_loaded"),
        proxy_to_loaded: row.get("proxy_to_loaded"),
        created_at,
    })
}

/// Register a new job in state INIT
pub async fn insert_job(pool: &SqlitePool, job: &NewJob) -> Result<AlignmentJob> {
    let created_at = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO alignments (
            guid, name, lang_from, lang_to, state, curr_batches, total_batches,
            proxy_from_loaded, proxy_to_loaded, created_at
        ) VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?, ?)
        "#,
    )
    .bind(&job.guid)
    .bind(&job.name)
    .bind(&job.lang_from)
    .bind(&job.lang_to)
    .bind(AlignmentState::Init.as_i64())
    .bind(job.total_batches as i64)
    .bind(job.proxy_from_loaded)
    .bind(job.proxy_to_loaded)
    .bind(&created_at)
    .execute(pool)
    .await?;

    require_job(pool, &job.guid).await
}

/// Load a job by guid (deleted jobs are invisible)
pub async fn load_job(pool: &SqlitePool, guid: &str) -> Result<Option<AlignmentJob>> {
    let query = format!(
        "SELECT {} FROM alignments WHERE guid = ? AND is_deleted = 0",
        JOB_COLUMNS
    );
    let row = sqlx::query(&query).bind(guid).fetch_optional(pool).await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Load a job by guid or fail with `NotFound`
pub async fn require_job(pool: &SqlitePool, guid: &str) -> Result<AlignmentJob> {
    load_job(pool, guid)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Alignment {} not found", guid)))
}

/// Live jobs, newest first
pub async fn list_jobs(pool: &SqlitePool) -> Result<Vec<AlignmentJob>> {
    let query = format!(
        "SELECT {} FROM alignments WHERE is_deleted = 0 ORDER BY created_at DESC, id DESC",
        JOB_COLUMNS
    );
    let rows = sqlx::query(&query).fetch_all(pool).await?;

    rows.iter().map(job_from_row).collect()
}

/// Hide a job from every lookup by guid; returns false if it was not live
pub async fn mark_deleted(pool: &SqlitePool, guid: &str) -> Result<bool> {
    let result = sqlx::query("UPDATE alignments SET is_deleted = 1 WHERE guid = ? AND is_deleted = 0")
        .bind(guid)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Flag that a proxy translation is loaded for one side
pub async fn set_proxy_loaded(pool: &SqlitePool, id: i64, side: DocumentSide) -> Result<AlignmentJob> {
    let column = match side {
        DocumentSide::From => "proxy_from_loaded",
        DocumentSide::To => "proxy_to_loaded",
    };
    sqlx::query(&format!("UPDATE alignments SET {} = 1 WHERE id = ?", column))
        .bind(id)
        .execute(pool)
        .await?;

    load_job_by_id(pool, id).await
}

pub async fn load_job_by_id(pool: &SqlitePool, id: i64) -> Result<AlignmentJob> {
    let query = format!("SELECT {} FROM alignments WHERE id = ?", JOB_COLUMNS);
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Alignment #{} not found", id)))?;

    job_from_row(&row)
}

async fn read_state(conn: &mut SqliteConnection, id: i64) -> Result<(String, AlignmentState)> {
    let row = sqlx::query("SELECT guid, state FROM alignments WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Alignment #{} not found", id)))?;

    let raw: i64 = row.get("state");
    let state = AlignmentState::from_i64(raw)
        .ok_or_else(|| Error::Internal(format!("Unknown alignment state {}", raw)))?;
    Ok((row.get("guid"), state))
}

async fn recount(conn: &mut SqliteConnection, id: i64) -> Result<u32> {
    sqlx::query(
        "UPDATE alignments SET curr_batches = \
         (SELECT COUNT(*) FROM alignment_progress WHERE alignment_id = ?) WHERE id = ?",
    )
    .bind(id)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    progress::count_progress(&mut *conn, id).await
}

/// No-op write that makes SQLite take the write lock for this transaction
async fn lock_row(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    sqlx::query("UPDATE alignments SET state = state WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn write_state(conn: &mut SqliteConnection, id: i64, state: AlignmentState) -> Result<()> {
    sqlx::query("UPDATE alignments SET state = ? WHERE id = ?")
        .bind(state.as_i64())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Mark a run as started
///
/// The write lock is taken before the state is read, so two concurrent
/// submissions cannot both start a run. With `reset_counter` the displayed
/// `curr_batches` drops to zero for a full run; progress records are kept,
/// so the first recount of the run restores batches committed earlier.
pub async fn begin_run(pool: &SqlitePool, id: i64, reset_counter: bool) -> Result<StateTransition> {
    let mut tx = pool.begin().await?;
    lock_row(&mut tx, id).await?;

    let (guid, old) = read_state(&mut tx, id).await?;
    let new = old.start_run().map_err(|_| {
        Error::Conflict(format!("Alignment {} already has a run in progress", guid))
    })?;

    if reset_counter {
        sqlx::query("UPDATE alignments SET curr_batches = 0 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tracing::debug!(alignment = %guid, "Batch counter reset for full run");
    }

    write_state(&mut tx, id, new).await?;
    tx.commit().await?;

    Ok(StateTransition::new(&guid, old, new))
}

/// Force IN_PROGRESS_DONE, regardless of what is running
pub async fn stop_run(pool: &SqlitePool, id: i64) -> Result<StateTransition> {
    let mut tx = pool.begin().await?;
    lock_row(&mut tx, id).await?;

    let (guid, old) = read_state(&mut tx, id).await?;
    let new = old.stop();
    write_state(&mut tx, id, new).await?;
    tx.commit().await?;

    Ok(StateTransition::new(&guid, old, new))
}

/// Persist a successful batch: progress record, recount, state
///
/// Returns the job state and `curr_batches` after the write.
pub async fn record_batch_success(
    pool: &SqlitePool,
    id: i64,
    batch_id: u32,
) -> Result<(AlignmentState, u32)> {
    retry_on_lock("record_batch_success", DEFAULT_MAX_LOCK_WAIT_MS, move || async move {
        let mut tx = pool.begin().await?;

        progress::insert_progress(&mut *tx, id, batch_id).await?;
        let curr = recount(&mut tx, id).await?;

        let (_, old) = read_state(&mut tx, id).await?;
        let new = old.after_batch_success();
        if new != old {
            write_state(&mut tx, id, new).await?;
        }

        tx.commit().await?;
        Ok((new, curr))
    })
    .await
}

/// Set ERROR after a failed batch
pub async fn mark_failed(pool: &SqlitePool, id: i64) -> Result<StateTransition> {
    retry_on_lock("mark_failed", DEFAULT_MAX_LOCK_WAIT_MS, move || async move {
        let mut tx = pool.begin().await?;
        lock_row(&mut tx, id).await?;

        let (guid, old) = read_state(&mut tx, id).await?;
        let new = old.after_batch_failure();
        write_state(&mut tx, id, new).await?;
        tx.commit().await?;

        Ok(StateTransition::new(&guid, old, new))
    })
    .await
}

/// Remove progress records written by a failed run and recount
pub async fn rollback_progress(pool: &SqlitePool, id: i64, batch_ids: &[u32]) -> Result<u32> {
    retry_on_lock("rollback_progress", DEFAULT_MAX_LOCK_WAIT_MS, move || async move {
        let mut tx = pool.begin().await?;
        for batch_id in batch_ids {
            progress::delete_progress(&mut *tx, id, *batch_id).await?;
        }
        let curr = recount(&mut tx, id).await?;
        tx.commit().await?;
        Ok(curr)
    })
    .await
}

/// Decide the final state of a run that drained without failures
///
/// DONE when every batch is committed, otherwise IN_PROGRESS_DONE.
pub async fn finish_run(pool: &SqlitePool, id: i64) -> Result<(StateTransition, u32, u32)> {
    retry_on_lock("finish_run", DEFAULT_MAX_LOCK_WAIT_MS, move || async move {
        let mut tx = pool.begin().await?;
        lock_row(&mut tx, id).await?;

        let curr = recount(&mut tx, id).await?;
        let total: i64 = sqlx::query_scalar("SELECT total_batches FROM alignments WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let total = total as u32;

        let (guid, old) = read_state(&mut tx, id).await?;
        let new = AlignmentState::on_run_completed(curr, total);
        write_state(&mut tx, id, new).await?;
        tx.commit().await?;

        Ok((StateTransition::new(&guid, old, new), curr, total))
    })
    .await
}
