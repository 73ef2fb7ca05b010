//! Listing, deleting, proxy loading and conflict inspection

mod helpers;

use helpers::{test_env, test_env_with, test_settings, FakeEngine, FakeResolver};
use ltr_aligner::models::{AlignParams, BatchSelection, DocumentSide, RunRequest};
use ltr_aligner::services::{
    AlignmentStore, ConflictChain, DetectedConflicts, HandleEdges, SubmitOutcome,
};
use ltr_common::Error;
use serde_json::json;

fn detected() -> DetectedConflicts {
    DetectedConflicts {
        conflicts: vec![
            ConflictChain(json!({"from": [2, 3], "to": [2]})),
            ConflictChain(json!({"from": [5], "to": [4, 5]})),
        ],
        rest_conflicts: vec![ConflictChain(json!([[6, 7], [6]]))],
    }
}

#[tokio::test]
async fn test_list_newest_first_and_delete_hides_job() {
    let env = test_env(FakeEngine::new()).await;
    let first = env.create_job(2, 2).await;
    let second = env.create_job(4, 4).await;

    let guids: Vec<String> = env
        .processor
        .list_jobs()
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.guid)
        .collect();
    assert_eq!(guids, vec![second.guid.clone(), first.guid.clone()]);

    env.processor.delete_job(&first.guid).await.unwrap();

    let remaining = env.processor.list_jobs().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].guid, second.guid);
    assert!(matches!(
        env.processor.get_job(&first.guid).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        env.processor.delete_job(&first.guid).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_load_proxy_sets_flag_and_feeds_next_run() {
    let env = test_env(FakeEngine::new()).await;
    let job = env.create_job(4, 4).await;
    assert!(!job.proxy_to_loaded);

    let updated = env
        .processor
        .load_proxy(&job.guid, DocumentSide::To, helpers::lines("proxy", 4))
        .await
        .unwrap();
    assert!(updated.proxy_to_loaded);
    assert!(!updated.proxy_from_loaded);

    let request = RunRequest::Align {
        selection: BatchSelection::Explicit(vec![0]),
        params: AlignParams {
            use_proxy_to: true,
            ..AlignParams::default()
        },
    };
    let SubmitOutcome::Accepted(handle) = env.processor.submit_run(&job.guid, request).await.unwrap()
    else {
        panic!("expected the run to be accepted");
    };
    handle.wait().await.unwrap();

    let task = &env.engine.calls()[0];
    let proxy = task.proxy_to.as_deref().unwrap();
    assert_eq!(proxy.first().map(String::as_str), Some("proxy 1"));
}

#[tokio::test]
async fn test_load_proxy_rejects_wrong_line_count() {
    let env = test_env(FakeEngine::new()).await;
    let job = env.create_job(4, 4).await;

    let result = env
        .processor
        .load_proxy(&job.guid, DocumentSide::From, helpers::lines("proxy", 3))
        .await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert!(!env.reload(&job).await.proxy_from_loaded);

    let store = AlignmentStore::open_existing(&env.store_path(&job)).await.unwrap();
    assert!(store.read_lines().await.unwrap().proxy_from.is_empty());
}

#[tokio::test]
async fn test_conflict_summary_counts_by_shape() {
    let resolver = FakeResolver::new(4).with_conflicts(detected());
    let env = test_env_with(test_settings(), FakeEngine::new(), resolver).await;
    let job = env.create_job(8, 8).await;

    let summary = env
        .processor
        .conflict_summary(&job.guid, HandleEdges::Start)
        .await
        .unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.items[0].shape, "2:1");
    assert_eq!(summary.items[0].count, 2);
    assert_eq!(summary.items[1].shape, "1:2");

    let detects = env.resolver.detect_calls();
    assert_eq!(detects.len(), 1);
    assert_eq!(detects[0].batch_id, -1);
    assert_eq!(detects[0].min_chain_length, 2);
    assert_eq!(detects[0].max_conflicts_len, 20);
    assert!(detects[0].handle_start);
    assert!(!detects[0].handle_finish);

    // Inspection is read-only
    let store = AlignmentStore::open_existing(&env.store_path(&job)).await.unwrap();
    assert!(store.history().await.unwrap().is_empty());
    assert!(env.resolver.resolved().is_empty());
}

#[tokio::test]
async fn test_show_conflict_returns_lines_and_wraps_id() {
    let resolver = FakeResolver::new(4).with_conflicts(detected());
    let env = test_env_with(test_settings(), FakeEngine::new(), resolver).await;
    let job = env.create_job(8, 8).await;

    let view = env
        .processor
        .show_conflict(&job.guid, 0, HandleEdges::None)
        .await
        .unwrap();
    assert_eq!(view.index, Some(0));
    let from: Vec<&str> = view.from.iter().map(|l| l.text.as_str()).collect();
    let to: Vec<&str> = view.to.iter().map(|l| l.text.as_str()).collect();
    assert_eq!(from, vec!["from 2", "from 3"]);
    assert_eq!(to, vec!["to 2"]);

    // 5 wraps to the rest conflict at index 2
    let view = env
        .processor
        .show_conflict(&job.guid, 5, HandleEdges::Both)
        .await
        .unwrap();
    assert_eq!(view.index, Some(2));
    assert_eq!(view.from.len(), 2);
    assert_eq!(view.to[0].id, 6);
}

#[tokio::test]
async fn test_show_conflict_without_conflicts_is_empty() {
    let resolver = FakeResolver::new(4).with_conflicts(DetectedConflicts::default());
    let env = test_env_with(test_settings(), FakeEngine::new(), resolver).await;
    let job = env.create_job(4, 4).await;

    let view = env
        .processor
        .show_conflict(&job.guid, 3, HandleEdges::None)
        .await
        .unwrap();
    assert_eq!(view.index, None);
    assert!(view.from.is_empty() && view.to.is_empty());

    let summary = env
        .processor
        .conflict_summary(&job.guid, HandleEdges::None)
        .await
        .unwrap();
    assert_eq!(summary.total, 0);
    assert!(summary.items.is_empty());
}
