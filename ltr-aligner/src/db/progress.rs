//! Batch progress records
//!
//! One row per (alignment, batch) that has been successfully aligned. The
//! unique constraint on the pair makes insertion idempotent, so
//! `curr_batches` is always recomputed by counting rows.

use ltr_common::Result;
use sqlx::{Executor, Sqlite};

/// Insert a progress record; returns false if it already existed
pub async fn insert_progress<'e, E>(executor: E, alignment_id: i64, batch_id: u32) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT OR IGNORE INTO alignment_progress (alignment_id, batch_id) VALUES (?, ?)",
    )
    .bind(alignment_id)
    .bind(batch_id as i64)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn count_progress<'e, E>(executor: E, alignment_id: i64) -> Result<u32>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM alignment_progress WHERE alignment_id = ?")
            .bind(alignment_id)
            .fetch_one(executor)
            .await?;

    Ok(count as u32)
}

/// Committed batch ids in ascending order
pub async fn committed_batch_ids<'e, E>(executor: E, alignment_id: i64) -> Result<Vec<u32>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT batch_id FROM alignment_progress WHERE alignment_id = ? ORDER BY batch_id",
    )
    .bind(alignment_id)
    .fetch_all(executor)
    .await?;

    Ok(ids.into_iter().map(|id| id as u32).collect())
}

/// Highest committed batch id, if any
pub async fn last_committed_batch<'e, E>(executor: E, alignment_id: i64) -> Result<Option<u32>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(batch_id) FROM alignment_progress WHERE alignment_id = ?")
            .bind(alignment_id)
            .fetch_one(executor)
            .await?;

    Ok(max.map(|id| id as u32))
}

pub async fn delete_progress<'e, E>(executor: E, alignment_id: i64, batch_id: u32) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM alignment_progress WHERE alignment_id = ? AND batch_id = ?")
        .bind(alignment_id)
        .bind(batch_id as i64)
        .execute(executor)
        .await?;

    Ok(())
}
