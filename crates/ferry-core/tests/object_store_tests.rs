mod common;

use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use ferry_core::enumeration::{ObjectItem, ObjectStoreEnumerator};
use ferry_core::{ConfigError, EnumerateOptions, ErrorCategory, Location, TransferEntry};
use tokio_util::sync::CancellationToken;

use common::{at, collect, paths, MockObjectStore};

fn enumerator(store: &Arc<MockObjectStore>) -> ObjectStoreEnumerator {
    ObjectStoreEnumerator::new(store.clone(), "photos")
        .with_page_size(2)
        .with_retry(3, Duration::from_millis(1))
}

#[tokio::test]
async fn snapshots_order_oldest_first_then_live() -> Result<()> {
    let store = Arc::new(MockObjectStore::new(vec![
        ObjectItem::new("photos/cat.jpg", 10),
        ObjectItem::new("photos/cat.jpg", 9).with_snapshot(at(300)),
        ObjectItem::new("photos/cat.jpg", 8).with_snapshot(at(100)),
        ObjectItem::new("photos/cat.jpg", 7).with_snapshot(at(200)),
    ]));
    let entries = collect(enumerator(&store).enumerate(
        &EnumerateOptions::recursive().with_snapshots(true),
        None,
        CancellationToken::new(),
    )?)
    .await;

    let snapshots: Vec<_> = entries
        .iter()
        .filter_map(|e| match e {
            TransferEntry::Item(item) => Some(item.source.snapshot()),
            TransferEntry::Error(_) => None,
        })
        .collect();
    assert_eq!(snapshots, vec![Some(at(100)), Some(at(200)), Some(at(300)), None]);

    let live = collect(enumerator(&store).enumerate(
        &EnumerateOptions::recursive(),
        None,
        CancellationToken::new(),
    )?)
    .await;
    assert_eq!(paths(&live), vec!["cat.jpg"]);
    Ok(())
}

#[tokio::test]
async fn directory_markers_never_surface() -> Result<()> {
    let store = Arc::new(MockObjectStore::new(vec![
        ObjectItem::directory_marker("photos/2024"),
        ObjectItem::new("photos/2024/jan.jpg", 1),
        ObjectItem::directory_marker("photos/empty"),
        ObjectItem::new("photos/top.jpg", 2),
    ]));

    let recursive = collect(enumerator(&store).enumerate(
        &EnumerateOptions::recursive().with_directories(true),
        None,
        CancellationToken::new(),
    )?)
    .await;
    assert_eq!(paths(&recursive), vec!["2024/jan.jpg", "top.jpg"]);

    let flat = collect(enumerator(&store).enumerate(
        &EnumerateOptions::default(),
        None,
        CancellationToken::new(),
    )?)
    .await;
    assert_eq!(paths(&flat), vec!["top.jpg"]);

    // An exact-name query that hits a folder placeholder finds nothing.
    let marker = collect(enumerator(&store).enumerate(
        &EnumerateOptions::default().with_pattern("empty"),
        None,
        CancellationToken::new(),
    )?)
    .await;
    assert!(marker.is_empty());

    let exact = collect(enumerator(&store).enumerate(
        &EnumerateOptions::default().with_pattern("top.jpg"),
        None,
        CancellationToken::new(),
    )?)
    .await;
    assert_eq!(paths(&exact), vec!["top.jpg"]);
    Ok(())
}

#[tokio::test]
async fn recursive_pattern_is_a_name_prefix() -> Result<()> {
    let store = Arc::new(MockObjectStore::new(vec![
        ObjectItem::new("photos/img_1.jpg", 1),
        ObjectItem::new("photos/img_2.jpg", 1),
        ObjectItem::new("photos/raw/img_3.dng", 1),
        ObjectItem::new("photos/video.mp4", 1),
    ]));
    let entries = collect(enumerator(&store).enumerate(
        &EnumerateOptions::recursive().with_pattern("img_"),
        None,
        CancellationToken::new(),
    )?)
    .await;
    assert_eq!(paths(&entries), vec!["img_1.jpg", "img_2.jpg"]);
    Ok(())
}

#[tokio::test]
async fn transient_failures_are_retried_within_budget() -> Result<()> {
    let store = Arc::new(MockObjectStore::new(vec![
        ObjectItem::new("photos/a", 1),
        ObjectItem::new("photos/b", 1),
        ObjectItem::new("photos/c", 1),
    ]));
    store.fail_next(2);
    let entries = collect(enumerator(&store).enumerate(
        &EnumerateOptions::recursive(),
        None,
        CancellationToken::new(),
    )?)
    .await;
    assert_eq!(paths(&entries), vec!["a", "b", "c"]);
    // Two failures, then two pages.
    assert_eq!(store.calls(), 4);
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_end_sequence_with_one_error() -> Result<()> {
    let store = Arc::new(MockObjectStore::new(vec![
        ObjectItem::new("photos/a", 1),
        ObjectItem::new("photos/b", 1),
        ObjectItem::new("photos/c", 1),
    ]));
    store.fail_from_call(1);
    let entries = collect(enumerator(&store).enumerate(
        &EnumerateOptions::recursive(),
        None,
        CancellationToken::new(),
    )?)
    .await;

    assert_eq!(entries.len(), 3);
    assert_eq!(paths(&entries[..2]), vec!["a", "b"]);
    match &entries[2] {
        TransferEntry::Error(err) => {
            assert_eq!(err.attempts, 3);
            assert_eq!(err.category, ErrorCategory::NoRetry);
        }
        other => panic!("expected error entry, got {other:?}"),
    }
    assert_eq!(store.calls(), 4);
    Ok(())
}

#[tokio::test]
async fn cancellation_during_retry_wait_ends_quietly() -> Result<()> {
    let store = Arc::new(MockObjectStore::new(vec![ObjectItem::new("photos/a", 1)]));
    store.fail_from_call(0);
    let cancel = CancellationToken::new();
    let stream = ObjectStoreEnumerator::new(store.clone(), "photos")
        .with_retry(3, Duration::from_secs(3600))
        .enumerate(&EnumerateOptions::recursive(), None, cancel.clone())?;

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let entries = tokio::time::timeout(Duration::from_secs(5), collect(stream)).await?;
    assert!(entries.is_empty());
    assert_eq!(store.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn invalid_patterns_fail_before_any_call() -> Result<()> {
    let store = Arc::new(MockObjectStore::new(vec![ObjectItem::new("photos/a", 1)]));
    let location = Location::ObjectStore(enumerator(&store));

    let result = location.enumerate(
        &EnumerateOptions::recursive().with_pattern("../secrets"),
        None,
        CancellationToken::new(),
    );
    assert!(matches!(result, Err(ConfigError::InvalidSearchPattern { .. })));

    let too_long = "p".repeat(ferry_core::enumeration::object_store::MAX_NAME_LEN);
    let entries = collect(location.enumerate(
        &EnumerateOptions::recursive().with_pattern(too_long),
        None,
        CancellationToken::new(),
    )?)
    .await;
    assert!(entries.is_empty());
    assert_eq!(store.calls(), 0);
    Ok(())
}
