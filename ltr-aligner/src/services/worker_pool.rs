//! Worker pool
//!
//! A fixed set of tokio tasks pulling from the shared input queue. Each item is
//! handled on its own task, so a handler error or panic becomes a `Failed`
//! message and the worker moves on to the next item.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::work_queue::{QueueItem, SharedReceiver};
use crate::models::{BatchOutcome, BatchResultMessage};

/// Processes one work item
#[async_trait]
pub trait BatchHandler<T>: Send + Sync + 'static {
    async fn handle(&self, item: T) -> anyhow::Result<BatchOutcome>;
}

/// Running workers of one run
pub struct WorkerPool {
    handles: Vec<JoinHandle<usize>>,
}

impl WorkerPool {
    /// Spawn `count` workers
    ///
    /// Each worker holds its own clone of `output`; the original is dropped so
    /// the output queue closes once every worker has exited.
    pub fn spawn<T>(
        count: usize,
        input: SharedReceiver<QueueItem<T>>,
        output: mpsc::UnboundedSender<BatchResultMessage>,
        handler: Arc<dyn BatchHandler<T>>,
    ) -> Self
    where
        T: Send + 'static,
    {
        let handles = (0..count)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    input.clone(),
                    output.clone(),
                    handler.clone(),
                ))
            })
            .collect();

        drop(output);
        Self { handles }
    }

    /// Wait for every worker to exit; returns items processed per worker
    pub async fn join(self) -> Vec<usize> {
        let mut processed = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(count) => processed.push(count),
                Err(e) => {
                    error!(error = %e, "Worker task ended abnormally");
                    processed.push(0);
                }
            }
        }
        processed
    }
}

async fn worker_loop<T>(
    worker: usize,
    input: SharedReceiver<QueueItem<T>>,
    output: mpsc::UnboundedSender<BatchResultMessage>,
    handler: Arc<dyn BatchHandler<T>>,
) -> usize
where
    T: Send + 'static,
{
    let mut processed = 0;

    loop {
        // Lock only for the pop, not for the processing
        let next = { input.lock().await.recv().await };

        let (index, item) = match next {
            Some(QueueItem::Work { index, item }) => (index, item),
            Some(QueueItem::Stop) | None => break,
        };

        let task_handler = handler.clone();
        let outcome = match tokio::spawn(async move { task_handler.handle(item).await }).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(worker, index, error = %format!("{:#}", e), "Batch handler failed");
                BatchOutcome::Failed {
                    reason: format!("{:#}", e),
                }
            }
            Err(e) => {
                error!(worker, index, error = %e, "Batch handler panicked");
                BatchOutcome::Failed {
                    reason: format!("handler panicked: {}", e),
                }
            }
        };

        processed += 1;
        if output.send(BatchResultMessage { index, outcome }).is_err() {
            warn!(worker, index, "Output queue closed, dropping result");
            break;
        }
    }

    debug!(worker, processed, "Worker exiting");
    processed
}
