//! Result aggregator: receive counting, ordered commit, failure handling

mod helpers;

use helpers::{test_env, FakeEngine, TestEnv};
use ltr_aligner::db::{jobs, progress};
use ltr_aligner::models::{
    AlignedBatch, AlignmentJob, AlignmentState, BatchOutcome, BatchResultMessage, BatchScope,
    RunMode,
};
use ltr_aligner::services::{AlignmentStore, ResultAggregator};
use serde_json::json;
use std::collections::HashSet;
use tokio::sync::mpsc;

fn aligned(index: usize, batch_id: u32) -> BatchResultMessage {
    BatchResultMessage {
        index,
        outcome: BatchOutcome::Aligned(AlignedBatch {
            batch_id,
            aligned_from: vec![json!([batch_id])],
            aligned_to: vec![json!([batch_id])],
            shift: 0,
            window: 50,
        }),
    }
}

/// Job with 6 batches, already moved to IN_PROGRESS
async fn running_job(env: &TestEnv) -> (AlignmentJob, AlignmentStore) {
    let job = env.create_job(12, 12).await;
    assert_eq!(job.total_batches, 6);
    jobs::begin_run(&env.db, job.id, false).await.unwrap();
    let store = AlignmentStore::open_existing(&env.store_path(&job)).await.unwrap();
    (job, store)
}

fn aggregator(
    env: &TestEnv,
    job: &AlignmentJob,
    store: AlignmentStore,
    mode: RunMode,
    previously_committed: HashSet<u32>,
) -> ResultAggregator {
    ResultAggregator::new(
        env.db.clone(),
        env.event_bus.clone(),
        store,
        env.visualizer.clone(),
        env.processor.paths().visualization_path(&job.guid),
        job.clone(),
        mode,
        previously_committed,
    )
}

#[tokio::test]
async fn test_commits_sorted_by_batch_id() {
    let env = test_env(FakeEngine::new()).await;
    let (job, store) = running_job(&env).await;
    let agg = aggregator(&env, &job, store.clone(), RunMode::Align, HashSet::new());

    let (tx, mut rx) = mpsc::unbounded_channel();
    for (index, batch_id) in [5, 1, 3].into_iter().enumerate() {
        tx.send(aligned(index, batch_id)).unwrap();
    }

    let summary = agg.drain(&mut rx, 3).await.unwrap();
    assert_eq!(summary.committed, vec![1, 3, 5]);

    let order: Vec<u32> = store
        .committed_batches()
        .await
        .unwrap()
        .iter()
        .map(|b| b.batch_id)
        .collect();
    assert_eq!(order, vec![1, 3, 5]);

    let history_ids: Vec<Vec<i64>> = store
        .history()
        .await
        .unwrap()
        .into_iter()
        .map(|h| h.batch_ids)
        .collect();
    assert_eq!(history_ids, vec![vec![1], vec![3], vec![5]]);

    // 3 of 6 committed
    assert_eq!(summary.final_state, AlignmentState::InProgressDone);
    let job = env.reload(&job).await;
    assert_eq!(job.curr_batches, 3);
}

#[tokio::test]
async fn test_receives_exactly_expected_messages() {
    let env = test_env(FakeEngine::new()).await;
    let (job, store) = running_job(&env).await;
    let agg = aggregator(&env, &job, store, RunMode::Align, HashSet::new());

    let (tx, mut rx) = mpsc::unbounded_channel();
    tx.send(aligned(0, 0)).unwrap();
    tx.send(BatchResultMessage::failed(1, "boom")).unwrap();
    tx.send(aligned(2, 2)).unwrap();
    // Not part of this run
    tx.send(aligned(3, 4)).unwrap();

    let summary = agg.drain(&mut rx, 3).await.unwrap();
    assert_eq!(summary.received, 3);
    assert_eq!(summary.failures, 1);

    let left = rx.try_recv().unwrap();
    assert_eq!(left.outcome.batch_id(), Some(4));
}

#[tokio::test]
async fn test_failure_rolls_back_new_progress_only() {
    let env = test_env(FakeEngine::new()).await;
    let (job, store) = running_job(&env).await;
    progress::insert_progress(&env.db, job.id, 0).await.unwrap();

    let previously: HashSet<u32> = [0].into_iter().collect();
    let agg = aggregator(&env, &job, store.clone(), RunMode::Align, previously);

    let (tx, mut rx) = mpsc::unbounded_channel();
    tx.send(aligned(0, 0)).unwrap();
    tx.send(aligned(1, 1)).unwrap();
    tx.send(BatchResultMessage::failed(2, "engine down")).unwrap();
    // Discarded after the failure
    tx.send(aligned(3, 3)).unwrap();

    let summary = agg.drain(&mut rx, 4).await.unwrap();
    assert!(summary.is_error());
    assert_eq!(summary.final_state, AlignmentState::Error);
    assert_eq!(summary.rolled_back, vec![1]);
    assert!(summary.committed.is_empty());

    assert_eq!(
        progress::committed_batch_ids(&env.db, job.id).await.unwrap(),
        vec![0]
    );
    let job = env.reload(&job).await;
    assert_eq!(job.state, AlignmentState::Error);
    assert_eq!(job.curr_batches, 1);
    assert!(store.committed_batches().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_closed_queue_counts_missing_as_failures() {
    let env = test_env(FakeEngine::new()).await;
    let (job, store) = running_job(&env).await;
    let agg = aggregator(&env, &job, store, RunMode::Align, HashSet::new());

    let (tx, mut rx) = mpsc::unbounded_channel();
    tx.send(aligned(0, 2)).unwrap();
    drop(tx);

    let summary = agg.drain(&mut rx, 3).await.unwrap();
    assert_eq!(summary.received, 1);
    assert_eq!(summary.failures, 2);
    assert_eq!(summary.rolled_back, vec![2]);
    assert_eq!(env.reload(&job).await.state, AlignmentState::Error);
}

#[tokio::test]
async fn test_resolve_mode_renders_once() {
    let env = test_env(FakeEngine::new()).await;
    let (job, store) = running_job(&env).await;
    let agg = aggregator(&env, &job, store.clone(), RunMode::Resolve, HashSet::new());

    let (tx, mut rx) = mpsc::unbounded_channel();
    for (index, id) in [4u32, 1].into_iter().enumerate() {
        tx.send(BatchResultMessage {
            index,
            outcome: BatchOutcome::Resolved {
                scope: BatchScope::Batch(id),
            },
        })
        .unwrap();
    }

    let summary = agg.drain(&mut rx, 2).await.unwrap();
    assert_eq!(summary.resolved, vec![1, 4]);
    assert!(summary.committed.is_empty());
    assert_eq!(env.visualizer.renders(), vec![vec![1, 4]]);
    assert!(store.committed_batches().await.unwrap().is_empty());
}
