//! Work queue pair
//!
//! An input queue of work items shared by all workers and an output queue of
//! result messages read by the aggregator. Every item carries its position in
//! the run; each worker gets exactly one `Stop` sentinel after the work.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::models::BatchResultMessage;

/// Input queue payload
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem<T> {
    Work { index: usize, item: T },
    Stop,
}

/// Receiver shared by all workers; one worker pops at a time
pub type SharedReceiver<T> = Arc<Mutex<mpsc::UnboundedReceiver<T>>>;

/// Number of workers for a run: `min(parallelism, items)`, at least 1 when
/// there is work
pub fn worker_count(parallelism: usize, items: usize) -> usize {
    if items == 0 {
        0
    } else {
        parallelism.clamp(1, items)
    }
}

/// Input and output queues of one run
pub struct WorkQueuePair<T> {
    input_tx: mpsc::UnboundedSender<QueueItem<T>>,
    input_rx: SharedReceiver<QueueItem<T>>,
    output_tx: mpsc::UnboundedSender<BatchResultMessage>,
    output_rx: mpsc::UnboundedReceiver<BatchResultMessage>,
}

impl<T> Default for WorkQueuePair<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueuePair<T> {
    pub fn new() -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        Self {
            input_tx,
            input_rx: Arc::new(Mutex::new(input_rx)),
            output_tx,
            output_rx,
        }
    }

    /// Enqueue all items with their index, then one `Stop` per worker
    ///
    /// Returns the number of result messages the aggregator must receive.
    pub fn submit(&self, items: Vec<T>, workers: usize) -> anyhow::Result<usize> {
        let expected = items.len();

        for (index, item) in items.into_iter().enumerate() {
            self.input_tx
                .send(QueueItem::Work { index, item })
                .map_err(|_| anyhow::anyhow!("Input queue closed while submitting work"))?;
        }
        for _ in 0..workers {
            self.input_tx
                .send(QueueItem::Stop)
                .map_err(|_| anyhow::anyhow!("Input queue closed while submitting sentinels"))?;
        }

        Ok(expected)
    }

    /// Hand the queues to the workers and the aggregator
    ///
    /// The input sender is dropped here; workers only exit on `Stop` or when
    /// the queue is exhausted.
    pub fn split(
        self,
    ) -> (
        SharedReceiver<QueueItem<T>>,
        mpsc::UnboundedSender<BatchResultMessage>,
        mpsc::UnboundedReceiver<BatchResultMessage>,
    ) {
        (self.input_rx, self.output_tx, self.output_rx)
    }
}
