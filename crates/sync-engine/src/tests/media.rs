//! Media fetcher scenarios.
//!
//! These tests verify that:
//! - A blob referenced by many messages is downloaded once
//! - A vanished object is failed permanently and never requested again
//! - A short download is discarded and retried on a later pass
//! - A transfer cut off by a crash restarts from zero over the stale `.part`
//! - Retries stop after the attempt limit

use super::harness::{message, photo, with_media, TestHarness};
use replica_database::{MediaReference, MediaStatus};
use std::path::{Path, PathBuf};

const BODY: &[u8] = b"hello world!";

async fn store_reference(h: &TestHarness, source: &str, id: i64, reference: &MediaReference) {
    h.store
        .upsert_messages(vec![with_media(message(source, id), reference.clone())])
        .await
        .unwrap();
}

fn part_file(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.part", path.display()))
}

#[tokio::test]
async fn shared_blob_is_downloaded_once() {
    let h = TestHarness::new().await;
    let reference = photo("p1", BODY.len() as u64);
    h.remote.add_media(&reference, BODY.to_vec());
    store_reference(&h, "chatA", 1, &reference).await;
    store_reference(&h, "chatB", 7, &reference).await;

    let fetcher = h.media_fetcher(5);
    let summary = fetcher.run_until_drained().await.unwrap();
    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.bytes, BODY.len() as u64);

    let again = fetcher.run_until_drained().await.unwrap();
    assert_eq!(again.downloaded, 0);
    assert_eq!(h.remote.downloads(&reference), 1);

    let path = h.media_file(&reference);
    assert_eq!(std::fs::read(&path).unwrap(), BODY);
    assert!(!part_file(&path).exists());

    let blob = h.store.get_media_blob(&reference.key()).await.unwrap().unwrap();
    assert_eq!(blob.status, MediaStatus::Complete);
    assert_eq!(blob.bytes_written, BODY.len() as u64);
    assert_eq!(blob.relative_path, crate::media_relative_path(&reference));
    assert!(h.store.list_pending_media(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn versions_of_one_object_are_separate_blobs() {
    let h = TestHarness::new().await;
    let first = MediaReference {
        version: Some("v1".into()),
        ..photo("p1", 3)
    };
    let second = MediaReference {
        version: Some("v2".into()),
        ..photo("p1", 4)
    };
    h.remote.add_media(&first, b"one".to_vec());
    h.remote.add_media(&second, b"four".to_vec());
    store_reference(&h, "chatA", 1, &first).await;
    store_reference(&h, "chatA", 2, &second).await;

    let summary = h.media_fetcher(5).run_until_drained().await.unwrap();
    assert_eq!(summary.downloaded, 2);
    assert_eq!(std::fs::read(h.media_file(&first)).unwrap(), b"one");
    assert_eq!(std::fs::read(h.media_file(&second)).unwrap(), b"four");
}

#[tokio::test]
async fn missing_object_fails_permanently() {
    let h = TestHarness::new().await;
    let reference = photo("gone", 10);
    store_reference(&h, "chatA", 1, &reference).await;

    let fetcher = h.media_fetcher(5);
    let summary = fetcher.run_until_drained().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.downloaded, 0);

    let blob = h.store.get_media_blob(&reference.key()).await.unwrap().unwrap();
    assert_eq!(blob.status, MediaStatus::Failed);

    fetcher.run_until_drained().await.unwrap();
    assert_eq!(h.remote.downloads(&reference), 1);
    assert!(!h.media_file(&reference).exists());
}

#[tokio::test]
async fn short_download_is_discarded_and_retried() {
    let h = TestHarness::new().await;
    let reference = photo("p1", BODY.len() as u64);
    h.remote.add_media(&reference, BODY.to_vec());
    h.remote.truncate_media(&reference, 1);
    store_reference(&h, "chatA", 1, &reference).await;

    let fetcher = h.media_fetcher(5);
    let first = fetcher.run_until_drained().await.unwrap();
    assert_eq!(first.downloaded, 0);
    assert_eq!(first.deferred, 1);

    let path = h.media_file(&reference);
    assert!(!path.exists());
    assert!(!part_file(&path).exists());

    let blob = h.store.get_media_blob(&reference.key()).await.unwrap().unwrap();
    assert_eq!(blob.status, MediaStatus::Partial);
    assert_eq!(blob.attempts, 1);
    assert!(blob.failure_reason.unwrap().contains("size mismatch"));

    let second = fetcher.run_until_drained().await.unwrap();
    assert_eq!(second.downloaded, 1);
    assert_eq!(std::fs::read(&path).unwrap(), BODY);
    assert_eq!(h.remote.downloads(&reference), 2);
}

#[tokio::test]
async fn interrupted_transfer_restarts_from_zero() {
    let h = TestHarness::new().await;
    let reference = photo("p1", BODY.len() as u64);
    h.remote.add_media(&reference, BODY.to_vec());
    store_reference(&h, "chatA", 1, &reference).await;

    // State left by a process killed mid-transfer.
    let blob = h
        .store
        .begin_media_download(&reference, &crate::media_relative_path(&reference))
        .await
        .unwrap();
    assert_eq!(blob.status, MediaStatus::Partial);
    let path = h.media_file(&reference);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(part_file(&path), b"stale bytes from the killed run, longer than the body").unwrap();

    let summary = h.media_fetcher(5).run_until_drained().await.unwrap();
    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.bytes, BODY.len() as u64);

    assert_eq!(std::fs::read(&path).unwrap(), BODY);
    assert!(!part_file(&path).exists());
    let blob = h.store.get_media_blob(&reference.key()).await.unwrap().unwrap();
    assert_eq!(blob.status, MediaStatus::Complete);
    assert_eq!(blob.bytes_written, BODY.len() as u64);
    assert_eq!(h.remote.downloads(&reference), 1);
}

#[tokio::test]
async fn unknown_declared_size_uses_transport_size() {
    let h = TestHarness::new().await;
    let reference = photo("p1", 0);
    h.remote.add_media(&reference, BODY.to_vec());
    h.remote.truncate_media(&reference, 1);
    store_reference(&h, "chatA", 1, &reference).await;

    let fetcher = h.media_fetcher(5);
    assert_eq!(fetcher.run_until_drained().await.unwrap().deferred, 1);

    let summary = fetcher.run_until_drained().await.unwrap();
    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.bytes, BODY.len() as u64);
}

#[tokio::test]
async fn gives_up_after_attempt_limit() {
    let h = TestHarness::new().await;
    let reference = photo("p1", BODY.len() as u64);
    h.remote.add_media(&reference, BODY.to_vec());
    h.remote.truncate_media(&reference, 10);
    store_reference(&h, "chatA", 1, &reference).await;

    let fetcher = h.media_fetcher(2);
    assert_eq!(fetcher.run_until_drained().await.unwrap().deferred, 1);
    assert_eq!(fetcher.run_until_drained().await.unwrap().deferred, 1);

    let last = fetcher.run_until_drained().await.unwrap();
    assert_eq!(last.failed, 1);
    assert_eq!(last.deferred, 0);
    assert_eq!(h.remote.downloads(&reference), 2);

    let blob = h.store.get_media_blob(&reference.key()).await.unwrap().unwrap();
    assert_eq!(blob.status, MediaStatus::Failed);
    assert!(blob.failure_reason.unwrap().contains("gave up"));
}
