//! Backfill scenarios.
//!
//! These tests verify that:
//! - History is paged newest to oldest and the cursor ends at the oldest id
//! - Re-running a finished backfill stores nothing twice
//! - A run interrupted after N pages resumes to the same state as a clean run
//! - Messages that arrived while offline are fetched on the next run
//! - A page that does not move backward fails the source instead of looping

use super::harness::{contents_of, MockRemote, TestHarness};
use crate::{BackfillStop, Backfiller, MessageBudget, NoProgress, SyncError};
use replica_database::{MessageId, SourceId};
use std::sync::Arc;

fn chat_a() -> SourceId {
    "chatA".into()
}

#[tokio::test]
async fn backfill_pages_250_messages_in_three_calls() {
    let h = TestHarness::new().await;
    h.remote.add_history("chatA", 1..=250);

    let outcome = h
        .backfiller(100, MessageBudget::unlimited())
        .run(&chat_a())
        .await
        .unwrap();

    assert_eq!(outcome.pages, 3);
    assert_eq!(outcome.records, 250);
    assert_eq!(outcome.stop, BackfillStop::Exhausted);
    assert_eq!(h.remote.history_calls(), 3);

    let cursor = h.store.get_cursor(&chat_a()).await.unwrap();
    assert_eq!(cursor.oldest_fetched, Some(MessageId(1)));
    assert_eq!(cursor.newest_known, Some(MessageId(250)));
    assert_eq!(cursor.history_top, Some(MessageId(250)));
    assert!(cursor.backfill_complete);
    assert_eq!(h.store.count_messages(Some(&chat_a())).await.unwrap(), 250);
}

#[tokio::test]
async fn rerun_after_completion_stores_nothing_new() {
    let h = TestHarness::new().await;
    h.remote.add_history("chatA", 1..=250);
    let backfiller = h.backfiller(100, MessageBudget::unlimited());

    backfiller.run(&chat_a()).await.unwrap();
    let before = h.contents("chatA").await;

    let again = backfiller.run(&chat_a()).await.unwrap();
    assert_eq!(again.stop, BackfillStop::AlreadyComplete);
    // Only the catch-up page touching the stored top is fetched.
    assert_eq!(again.pages, 1);

    assert_eq!(h.contents("chatA").await, before);
    assert_eq!(h.store.count_messages(None).await.unwrap(), 250);
}

#[tokio::test]
async fn exact_multiple_of_page_size_stops_on_has_more() {
    let h = TestHarness::new().await;
    h.remote.add_history("chatA", 1..=200);

    let outcome = h
        .backfiller(100, MessageBudget::unlimited())
        .run(&chat_a())
        .await
        .unwrap();

    assert_eq!(outcome.pages, 2);
    assert_eq!(h.remote.history_calls(), 2);
    assert!(h.store.get_cursor(&chat_a()).await.unwrap().backfill_complete);
}

#[tokio::test]
async fn empty_source_completes_without_messages() {
    let h = TestHarness::new().await;

    let outcome = h
        .backfiller(100, MessageBudget::unlimited())
        .run(&"quiet".into())
        .await
        .unwrap();

    assert_eq!(outcome.pages, 0);
    assert_eq!(outcome.stop, BackfillStop::Exhausted);
    let cursor = h.store.get_cursor(&"quiet".into()).await.unwrap();
    assert!(cursor.backfill_complete);
    assert_eq!(cursor.oldest_fetched, None);
}

#[tokio::test]
async fn page_size_is_clamped_to_remote_maximum() {
    let h = TestHarness::with_remote(MockRemote::with_max_page_size(50)).await;
    h.remote.add_history("chatA", 1..=120);

    let backfiller = h.backfiller(500, MessageBudget::unlimited());
    assert_eq!(backfiller.page_size(), 50);

    let outcome = backfiller.run(&chat_a()).await.unwrap();
    assert_eq!(outcome.pages, 3);
    assert_eq!(outcome.records, 120);
}

#[tokio::test]
async fn budget_applies_current_page_then_stops() {
    let h = TestHarness::new().await;
    h.remote.add_history("chatA", 1..=250);

    let outcome = h
        .backfiller(100, MessageBudget::new(Some(150)))
        .run(&chat_a())
        .await
        .unwrap();

    assert_eq!(outcome.stop, BackfillStop::LimitReached);
    assert_eq!(outcome.records, 200);
    let cursor = h.store.get_cursor(&chat_a()).await.unwrap();
    assert_eq!(cursor.oldest_fetched, Some(MessageId(51)));
    assert!(!cursor.backfill_complete);
}

#[tokio::test]
async fn catch_up_fetches_messages_newer_than_stored_top() {
    let h = TestHarness::new().await;
    h.remote.add_history("chatA", 1..=250);
    let backfiller = h.backfiller(100, MessageBudget::unlimited());
    backfiller.run(&chat_a()).await.unwrap();

    h.remote.add_history("chatA", 251..=400);
    let outcome = backfiller.run(&chat_a()).await.unwrap();

    assert_eq!(outcome.stop, BackfillStop::AlreadyComplete);
    assert_eq!(outcome.pages, 2);
    assert_eq!(h.store.count_messages(Some(&chat_a())).await.unwrap(), 400);

    let cursor = h.store.get_cursor(&chat_a()).await.unwrap();
    assert_eq!(cursor.oldest_fetched, Some(MessageId(1)));
    assert_eq!(cursor.newest_known, Some(MessageId(400)));
    assert_eq!(cursor.history_top, Some(MessageId(400)));
}

#[tokio::test]
async fn interrupted_catch_up_keeps_old_top() {
    let h = TestHarness::new().await;
    h.remote.add_history("chatA", 1..=250);
    let backfiller = h.backfiller(100, MessageBudget::unlimited());
    backfiller.run(&chat_a()).await.unwrap();

    h.remote.add_history("chatA", 251..=400);
    // One catch-up page (400..301) lands, then the remote goes away.
    h.remote.fail_after_pages(3 + 1);
    let err = backfiller.run(&chat_a()).await.unwrap_err();
    assert!(matches!(err, SyncError::RemoteUnavailable { .. }));

    // 300..251 is still missing, so the covered top must not have moved.
    let cursor = h.store.get_cursor(&chat_a()).await.unwrap();
    assert_eq!(cursor.history_top, Some(MessageId(250)));
    assert_eq!(cursor.newest_known, Some(MessageId(400)));

    h.remote.heal();
    backfiller.run(&chat_a()).await.unwrap();
    assert_eq!(h.store.count_messages(Some(&chat_a())).await.unwrap(), 400);
    assert_eq!(
        h.store.get_cursor(&chat_a()).await.unwrap().history_top,
        Some(MessageId(400))
    );
}

#[tokio::test]
async fn resume_after_crash_matches_uninterrupted_run() {
    let golden = TestHarness::new().await;
    golden.remote.add_history("chatA", 1..=250);
    golden
        .backfiller(100, MessageBudget::unlimited())
        .run(&chat_a())
        .await
        .unwrap();

    let h = TestHarness::new().await;
    h.remote.add_history("chatA", 1..=250);
    h.remote.fail_after_pages(1);

    let err = h
        .backfiller(100, MessageBudget::unlimited())
        .run(&chat_a())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::RemoteUnavailable { .. }));
    assert_eq!(h.store.count_messages(None).await.unwrap(), 100);

    let cursor = h.store.get_cursor(&chat_a()).await.unwrap();
    assert_eq!(cursor.oldest_fetched, Some(MessageId(151)));
    assert!(!cursor.backfill_complete);

    // Restart against the same database file.
    h.remote.heal();
    let reopened = h.reopen_store().await;
    let resumed = Backfiller::new(
        reopened.clone(),
        h.gate.clone(),
        100,
        MessageBudget::unlimited(),
        Arc::new(NoProgress),
    );
    resumed.run(&chat_a()).await.unwrap();

    assert_eq!(
        contents_of(&reopened, "chatA").await,
        golden.contents("chatA").await
    );

    let expected = golden.store.get_cursor(&chat_a()).await.unwrap();
    let actual = reopened.get_cursor(&chat_a()).await.unwrap();
    assert_eq!(actual.oldest_fetched, expected.oldest_fetched);
    assert_eq!(actual.newest_known, expected.newest_known);
    assert_eq!(actual.history_top, expected.history_top);
    assert_eq!(actual.backfill_complete, expected.backfill_complete);
}

#[tokio::test]
async fn repeated_page_is_reported_as_anomaly() {
    let h = TestHarness::new().await;
    h.remote.add_history("chatA", 1..=250);
    h.remote.make_stuck("chatA");

    let err = h
        .backfiller(100, MessageBudget::unlimited())
        .run(&chat_a())
        .await
        .unwrap_err();

    match err {
        SyncError::RemoteAnomaly { source_id, .. } => assert_eq!(source_id, chat_a()),
        other => panic!("expected anomaly, got {other:?}"),
    }
    assert_eq!(h.remote.history_calls(), 2);
    assert_eq!(h.store.count_messages(None).await.unwrap(), 100);
}
