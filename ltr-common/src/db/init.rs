//! Database initialization
//!
//! Creates the service database on first run and brings the schema up to date
//! on every start. All statements are idempotent.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Per-connection pragmas: the aggregator and the request handlers write concurrently
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create all service tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    create_alignments_table(pool).await?;
    create_alignment_progress_table(pool).await?;

    info!("Database tables initialized (alignments, alignment_progress)");
    Ok(())
}

/// Create the alignments table
///
/// One row per alignment job. `state` holds the integer encoding of the job
/// lifecycle state; `curr_batches` is kept equal to the number of progress
/// records for the job.
pub async fn create_alignments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alignments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            lang_from TEXT NOT NULL,
            lang_to TEXT NOT NULL,
            state INTEGER NOT NULL DEFAULT 0,
            curr_batches INTEGER NOT NULL DEFAULT 0,
            total_batches INTEGER NOT NULL DEFAULT 0,
            proxy_from_loaded INTEGER NOT NULL DEFAULT 0,
            proxy_to_loaded INTEGER NOT NULL DEFAULT 0,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            CHECK (curr_batches >= 0 AND curr_batches <= total_batches)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the alignment_progress table
///
/// The unique constraint makes progress insertion idempotent.
pub async fn create_alignment_progress_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alignment_progress (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            alignment_id INTEGER NOT NULL REFERENCES alignments(id),
            batch_id INTEGER NOT NULL,
            CONSTRAINT uq_alignment_batch UNIQUE (alignment_id, batch_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_alignment_progress_alignment ON alignment_progress(alignment_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
