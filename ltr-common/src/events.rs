//! Event types for the Lingtrain event system
//!
//! Events are published on a broadcast [`EventBus`] and fanned out to SSE
//! clients. They mirror what is persisted on the job row; polling the row stays
//! the authoritative way to observe progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lingtrain event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AlignerEvent {
    /// Alignment job moved between lifecycle states
    JobStateChanged {
        alignment_guid: String,
        old_state: String,
        new_state: String,
        timestamp: DateTime<Utc>,
    },

    /// A run was accepted and its work items queued
    RunStarted {
        alignment_guid: String,
        mode: String,
        batch_ids: Vec<u32>,
        workers: usize,
        timestamp: DateTime<Utc>,
    },

    /// One batch result was received by the aggregator
    BatchFinished {
        alignment_guid: String,
        batch_id: Option<u32>,
        success: bool,
        received: usize,
        expected: usize,
        timestamp: DateTime<Utc>,
    },

    /// Batch progress counters changed
    ProgressUpdated {
        alignment_guid: String,
        curr_batches: u32,
        total_batches: u32,
        timestamp: DateTime<Utc>,
    },

    /// A run was fully drained and its final state decided
    RunFinished {
        alignment_guid: String,
        committed: Vec<u32>,
        error: bool,
        final_state: String,
        timestamp: DateTime<Utc>,
    },
}

impl AlignerEvent {
    /// SSE event name
    pub fn event_type(&self) -> &str {
        match self {
            AlignerEvent::JobStateChanged { .. } => "JobStateChanged",
            AlignerEvent::RunStarted { .. } => "RunStarted",
            AlignerEvent::BatchFinished { .. } => "BatchFinished",
            AlignerEvent::ProgressUpdated { .. } => "ProgressUpdated",
            AlignerEvent::RunFinished { .. } => "RunFinished",
        }
    }
}

/// Broadcast bus for [`AlignerEvent`]s
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AlignerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<AlignerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: AlignerEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<AlignerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: AlignerEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress_event(curr: u32) -> AlignerEvent {
        AlignerEvent::ProgressUpdated {
            alignment_guid: "abc".to_string(),
            curr_batches: curr,
            total_batches: 3,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(10);
        assert!(bus.emit(progress_event(1)).is_err());
        // Lossy variant swallows the error
        bus.emit_lossy(progress_event(1));
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(progress_event(1)).unwrap();
        bus.emit(progress_event(2)).unwrap();

        for expected in [1, 2] {
            match rx.recv().await.unwrap() {
                AlignerEvent::ProgressUpdated { curr_batches, .. } => {
                    assert_eq!(curr_batches, expected)
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(progress_event(2)).unwrap();
        assert_eq!(json["type"], "ProgressUpdated");
        assert_eq!(json["curr_batches"], 2);
        assert_eq!(progress_event(0).event_type(), "ProgressUpdated");
    }
}
