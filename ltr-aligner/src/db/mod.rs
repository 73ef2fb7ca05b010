//! Database access for ltr-aligner
//!
//! The service database (`lingtrain.db` in the root folder) holds alignment
//! jobs and their batch progress records. Per-job alignment data lives in a
//! separate store, see [`crate::services::alignment_store`].

pub mod jobs;
pub mod progress;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Creates the file and schema on first run.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::debug!("Connecting to database: {}", db_path.display());
    let pool = ltr_common::db::init_database(db_path).await?;
    Ok(pool)
}
