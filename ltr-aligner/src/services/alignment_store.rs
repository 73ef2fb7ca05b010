//! Per-job alignment store
//!
//! Each alignment job owns one SQLite file holding the split documents, the
//! optional proxy translations, the committed batch results and the operation
//! history. The external bridge reads and mutates the same file, so the
//! schema stays plain: JSON columns for anything the orchestrator treats as
//! opaque.

use chrono::Utc;
use ltr_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{AlignedBatch, DocumentSide};

/// One line of a split document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLine {
    pub id: i64,
    pub text: String,
}

/// Full document contents as needed for batch slicing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentLines {
    pub from: Vec<StoredLine>,
    pub to: Vec<StoredLine>,
    /// Empty when no proxy translation was loaded
    pub proxy_from: Vec<String>,
    pub proxy_to: Vec<String>,
}

/// A committed batch as recorded in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedBatch {
    pub batch_id: u32,
    pub commit_seq: i64,
    pub shift: i64,
    pub window: u32,
}

/// One row of the operation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub operation: String,
    pub batch_ids: Vec<i64>,
    pub parameters: Value,
    pub insert_ts: String,
}

/// Handle to one job's store file
#[derive(Debug, Clone)]
pub struct AlignmentStore {
    path: PathBuf,
    pool: SqlitePool,
}

impl AlignmentStore {
    /// Open (or create) the store at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self {
            path: path.to_path_buf(),
            pool,
        };
        store.create_tables().await?;
        Ok(store)
    }

    /// Open an existing store; missing files are `NotFound`
    pub async fn open_existing(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "Alignment store {} does not exist",
                path.display()
            )));
        }
        Self::open(path).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn create_tables(&self) -> Result<()> {
        for table in ["splitted_from", "splitted_to", "proxy_from", "proxy_to"] {
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY, text TEXT NOT NULL)",
                table
            );
            sqlx::query(&ddl).execute(&self.pool).await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batches (
                batch_id INTEGER PRIMARY KEY,
                commit_seq INTEGER NOT NULL,
                insert_ts TEXT NOT NULL,
                aligned_from TEXT NOT NULL,
                aligned_to TEXT NOT NULL,
                shift INTEGER NOT NULL,
                window_size INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                operation TEXT NOT NULL,
                batch_ids TEXT NOT NULL,
                parameters TEXT NOT NULL,
                insert_ts TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load split documents (and optional proxies) into an empty store
    pub async fn fill(
        &self,
        lines_from: &[String],
        lines_to: &[String],
        proxy_from: Option<&[String]>,
        proxy_to: Option<&[String]>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let tables: [(&str, Option<&[String]>); 4] = [
            ("splitted_from", Some(lines_from)),
            ("splitted_to", Some(lines_to)),
            ("proxy_from", proxy_from),
            ("proxy_to", proxy_to),
        ];

        for (table, lines) in tables {
            let Some(lines) = lines else { continue };
            let insert = format!("INSERT INTO {} (id, text) VALUES (?, ?)", table);
            for (i, text) in lines.iter().enumerate() {
                sqlx::query(&insert)
                    .bind(i as i64 + 1)
                    .bind(text)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn read_table(&self, table: &str) -> Result<Vec<StoredLine>> {
        let query = format!("SELECT id, text FROM {} ORDER BY id", table);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| StoredLine {
                id: row.get("id"),
                text: row.get("text"),
            })
            .collect())
    }

    pub async fn read_lines(&self) -> Result<DocumentLines> {
        Ok(DocumentLines {
            from: self.read_table("splitted_from").await?,
            to: self.read_table("splitted_to").await?,
            proxy_from: into_texts(self.read_table("proxy_from").await?),
            proxy_to: into_texts(self.read_table("proxy_to").await?),
        })
    }

    /// Split lines with the given ids, in id order (unknown ids are skipped)
    pub async fn lines_by_ids(&self, side: DocumentSide, ids: &[i64]) -> Result<Vec<StoredLine>> {
        let mut lines: Vec<StoredLine> = self
            .read_table(splitted_table(side))
            .await?
            .into_iter()
            .filter(|line| ids.contains(&line.id))
            .collect();
        lines.sort_by_key(|line| line.id);
        Ok(lines)
    }

    /// Replace the proxy translation of one side
    ///
    /// The proxy must have exactly one line per split line of that side.
    pub async fn load_proxy(&self, side: DocumentSide, proxy: &[String]) -> Result<()> {
        let count_query = format!("SELECT COUNT(*) FROM {}", splitted_table(side));
        let expected: i64 = sqlx::query_scalar(&count_query).fetch_one(&self.pool).await?;
        if proxy.len() as i64 != expected {
            return Err(Error::InvalidInput(format!(
                "proxy_{} has {} lines, expected {}",
                side.as_str(),
                proxy.len(),
                expected
            )));
        }

        let table = proxy_table(side);
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DELETE FROM {}", table))
            .execute(&mut *tx)
            .await?;

        let insert = format!("INSERT INTO {} (id, text) VALUES (?, ?)", table);
        for (i, text) in proxy.iter().enumerate() {
            sqlx::query(&insert)
                .bind(i as i64 + 1)
                .bind(text)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Write batch results in one transaction, ascending by batch id
    ///
    /// Re-aligning a batch replaces its previous row. `commit_seq` records the
    /// write order across commits.
    pub async fn commit_batch_results(&self, batches: &[AlignedBatch]) -> Result<()> {
        let mut ordered: Vec<&AlignedBatch> = batches.iter().collect();
        ordered.sort_by_key(|b| b.batch_id);

        let mut tx = self.pool.begin().await?;

        let last_seq: Option<i64> = sqlx::query_scalar("SELECT MAX(commit_seq) FROM batches")
            .fetch_one(&mut *tx)
            .await?;
        let mut seq = last_seq.unwrap_or(0);
        let insert_ts = Utc::now().to_rfc3339();

        for batch in ordered {
            seq += 1;
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO batches
                    (batch_id, commit_seq, insert_ts, aligned_from, aligned_to, shift, window_size)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(batch.batch_id as i64)
            .bind(seq)
            .bind(&insert_ts)
            .bind(to_json(&batch.aligned_from)?)
            .bind(to_json(&batch.aligned_to)?)
            .bind(batch.shift)
            .bind(batch.window as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Committed batches in write order
    pub async fn committed_batches(&self) -> Result<Vec<CommittedBatch>> {
        let rows = sqlx::query(
            "SELECT batch_id, commit_seq, shift, window_size FROM batches ORDER BY commit_seq",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| CommittedBatch {
                batch_id: row.get::<i64, _>("batch_id") as u32,
                commit_seq: row.get("commit_seq"),
                shift: row.get("shift"),
                window: row.get::<i64, _>("window_size") as u32,
            })
            .collect())
    }

    /// Append one operation to the history (`batch_id` -1 means whole document)
    pub async fn append_history(&self, operation: &str, batch_id: i64, parameters: &Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO history (operation, batch_ids, parameters, insert_ts) VALUES (?, ?, ?, ?)",
        )
        .bind(operation)
        .bind(to_json(&[batch_id])?)
        .bind(to_json(parameters)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            "SELECT id, operation, batch_ids, parameters, insert_ts FROM history ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let batch_ids: String = row.get("batch_ids");
                let parameters: String = row.get("parameters");
                Ok(HistoryEntry {
                    id: row.get("id"),
                    operation: row.get("operation"),
                    batch_ids: from_json(&batch_ids)?,
                    parameters: from_json(&parameters)?,
                    insert_ts: row.get("insert_ts"),
                })
            })
            .collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn splitted_table(side: DocumentSide) -> &'static str {
    match side {
        DocumentSide::From => "splitted_from",
        DocumentSide::To => "splitted_to",
    }
}

fn proxy_table(side: DocumentSide) -> &'static str {
    match side {
        DocumentSide::From => "proxy_from",
        DocumentSide::To => "proxy_to",
    }
}

fn into_texts(lines: Vec<StoredLine>) -> Vec<String> {
    lines.into_iter().map(|line| line.text).collect()
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Internal(format!("Failed to serialize: {}", e)))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| Error::Internal(format!("Failed to deserialize: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn lines(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{} {}", prefix, i)).collect()
    }

    fn aligned(batch_id: u32) -> AlignedBatch {
        AlignedBatch {
            batch_id,
            aligned_from: vec![json!(batch_id)],
            aligned_to: vec![json!(batch_id)],
            shift: 0,
            window: 50,
        }
    }

    #[tokio::test]
    async fn test_fill_and_read_lines() {
        let dir = TempDir::new().unwrap();
        let store = AlignmentStore::open(&dir.path().join("en/ru/job.db")).await.unwrap();

        store
            .fill(&lines("from", 3), &lines("to", 4), None, Some(&lines("proxy", 4)))
            .await
            .unwrap();
        let doc = store.read_lines().await.unwrap();

        assert_eq!(doc.from.len(), 3);
        assert_eq!(doc.from[0], StoredLine { id: 1, text: "from 0".to_string() });
        assert_eq!(doc.to.len(), 4);
        assert!(doc.proxy_from.is_empty());
        assert_eq!(doc.proxy_to.len(), 4);
    }

    #[tokio::test]
    async fn test_commit_orders_by_batch_id() {
        let dir = TempDir::new().unwrap();
        let store = AlignmentStore::open(&dir.path().join("job.db")).await.unwrap();

        store
            .commit_batch_results(&[aligned(5), aligned(1), aligned(3)])
            .await
            .unwrap();

        let order: Vec<u32> = store
            .committed_batches()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.batch_id)
            .collect();
        assert_eq!(order, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_recommit_replaces_batch() {
        let dir = TempDir::new().unwrap();
        let store = AlignmentStore::open(&dir.path().join("job.db")).await.unwrap();

        store.commit_batch_results(&[aligned(0), aligned(1)]).await.unwrap();
        store.commit_batch_results(&[aligned(0)]).await.unwrap();

        let committed = store.committed_batches().await.unwrap();
        assert_eq!(committed.len(), 2);
        assert_eq!(committed.last().unwrap().batch_id, 0);
        assert_eq!(committed.last().unwrap().commit_seq, 3);
    }

    #[tokio::test]
    async fn test_history_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = AlignmentStore::open(&dir.path().join("job.db")).await.unwrap();

        store
            .append_history("resolve", -1, &json!({"min_chain_length": 2, "batch_amount": 3}))
            .await
            .unwrap();

        let history = store.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].operation, "resolve");
        assert_eq!(history[0].batch_ids, vec![-1]);
        assert_eq!(history[0].parameters["batch_amount"], 3);
    }

    #[tokio::test]
    async fn test_load_proxy_replaces_one_side() {
        let dir = TempDir::new().unwrap();
        let store = AlignmentStore::open(&dir.path().join("job.db")).await.unwrap();
        store
            .fill(&lines("from", 2), &lines("to", 3), Some(&lines("old", 2)), None)
            .await
            .unwrap();

        store
            .load_proxy(DocumentSide::From, &lines("new", 2))
            .await
            .unwrap();
        store
            .load_proxy(DocumentSide::To, &lines("proxy", 3))
            .await
            .unwrap();

        let doc = store.read_lines().await.unwrap();
        assert_eq!(doc.proxy_from, vec!["new 0", "new 1"]);
        assert_eq!(doc.proxy_to.len(), 3);

        let short = store.load_proxy(DocumentSide::To, &lines("proxy", 2)).await;
        assert!(matches!(short, Err(Error::InvalidInput(_))));
        assert_eq!(store.read_lines().await.unwrap().proxy_to.len(), 3);
    }

    #[tokio::test]
    async fn test_lines_by_ids() {
        let dir = TempDir::new().unwrap();
        let store = AlignmentStore::open(&dir.path().join("job.db")).await.unwrap();
        store
            .fill(&lines("from", 4), &lines("to", 4), None, None)
            .await
            .unwrap();

        let picked = store
            .lines_by_ids(DocumentSide::To, &[4, 2, 99])
            .await
            .unwrap();
        let ids: Vec<i64> = picked.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![2, 4]);
        assert_eq!(picked[0].text, "to 1");
    }

    #[tokio::test]
    async fn test_open_existing_requires_file() {
        let dir = TempDir::new().unwrap();
        let result = AlignmentStore::open_existing(&dir.path().join("missing.db")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
