mod support;

use std::sync::Arc;

use frame_dashboard::{CatalogStore, Error};
use support::{file, photo, Harness};

#[tokio::test]
async fn full_resync_replaces_bucket_contents() {
    let h = Harness::new();
    let source = h.bucket_source("family");
    h.seed(source.id, "old", 50);
    assert_eq!(h.store.count_for_source(source.id).unwrap(), 50);

    let listing = (0..10)
        .map(|i| file(&format!("f{i}"), &format!("2023/{i}.jpg")))
        .collect();
    h.objects.set_pages(vec![listing]);

    let report = h.worker().sync_source(source.id).await.unwrap();

    assert_eq!(report.removed, 50);
    assert_eq!(report.indexed, 10);
    assert_eq!(h.store.count_for_source(source.id).unwrap(), 10);
    assert!(h.store.get_item("old-0").unwrap().is_none());
    assert!(h.store.get_item("f9").unwrap().is_some());
    assert!(h.store.get_source(source.id).unwrap().unwrap().last_synced_at.is_some());
}

#[tokio::test]
async fn bucket_listing_keeps_only_images() {
    let h = Harness::new();
    let source = h.bucket_source("mixed");
    let mut declared = file("d", "scan-0001");
    declared.content_type = Some("image/tiff".into());
    h.objects.set_pages(vec![vec![
        file("a", "a.PNG"),
        file("b", "b.mov"),
        file("c", "readme.txt"),
        declared,
    ]]);

    let report = h.worker().sync_source(source.id).await.unwrap();

    assert_eq!(report.indexed, 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(h.store.get_item("d").unwrap().unwrap().mime_type, "image/tiff");
}

#[tokio::test]
async fn incremental_sync_merges_pages_without_deleting() {
    let h = Harness::new();
    let source = h.photo_source("me@example.com");
    h.seed(source.id, "existing", 50);

    let page = |range: std::ops::Range<usize>| {
        range
            .map(|i| photo(&format!("new-{i}"), &format!("https://lh3.example/{i}")))
            .collect::<Vec<_>>()
    };
    h.photos.set_pages(vec![page(0..6), page(6..10)]);

    let report = h.worker().sync_source(source.id).await.unwrap();

    assert_eq!(report.pages, 2);
    assert_eq!(report.indexed, 10);
    assert_eq!(report.removed, 0);
    assert_eq!(h.store.count_for_source(source.id).unwrap(), 60);
    assert_eq!(h.store.count().unwrap(), 60);
}

#[tokio::test]
async fn resync_of_same_library_does_not_duplicate() {
    let h = Harness::new();
    let source = h.photo_source("me@example.com");
    h.photos.set_pages(vec![vec![
        photo("x", "https://lh3.example/x"),
        photo("y", "https://lh3.example/y"),
    ]]);

    let worker = h.worker();
    worker.sync_source(source.id).await.unwrap();
    worker.sync_source(source.id).await.unwrap();

    assert_eq!(h.store.count_for_source(source.id).unwrap(), 2);
}

#[tokio::test]
async fn failure_mid_pagination_keeps_committed_batches() {
    let h = Harness::new();
    let source = h.photo_source("me@example.com");
    let pages = (0..3)
        .map(|p| {
            (0..4)
                .map(|i| photo(&format!("p{p}-{i}"), "https://lh3.example/b"))
                .collect()
        })
        .collect();
    h.photos.set_pages(pages);
    *h.photos.fail_on_page.lock().unwrap() = Some(2);

    let err = h
        .worker()
        .with_batch_size(4)
        .sync_source(source.id)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SyncTransport { source_id, .. } if source_id == source.id));
    assert_eq!(h.store.count_for_source(source.id).unwrap(), 8);
    assert!(h.store.get_source(source.id).unwrap().unwrap().last_synced_at.is_none());
}

#[tokio::test]
async fn missing_credential_aborts_the_run() {
    let h = Harness::new();
    let source = h.bucket_source("locked");
    h.credentials
        .insert(source.id, frame_dashboard::credentials::Credential::Bearer {
            access_token: "wrong kind".into(),
        });
    h.seed(source.id, "kept", 3);

    let err = h.worker().sync_source(source.id).await.unwrap_err();

    assert!(matches!(err, Error::Credential { .. }));
    assert_eq!(h.store.count_for_source(source.id).unwrap(), 3);
}

#[tokio::test]
async fn detached_sync_swallows_errors() {
    let h = Harness::new();
    let source = h.bucket_source("flaky");
    h.objects.set_pages(vec![vec![file("a", "a.jpg")], vec![file("b", "b.jpg")]]);
    *h.objects.fail_on_page.lock().unwrap() = Some(1);

    let worker = Arc::new(h.worker().with_batch_size(1));
    worker.spawn(source.id).await.unwrap();

    assert_eq!(h.store.count_for_source(source.id).unwrap(), 1);
    assert!(h.store.get_source(source.id).unwrap().unwrap().last_synced_at.is_none());
}

#[tokio::test]
async fn sync_all_active_skips_removed_sources() {
    let h = Harness::new();
    let live = h.bucket_source("live");
    let gone = h.bucket_source("gone");
    h.objects.set_pages(vec![vec![file("a", "a.jpg")]]);
    h.store.deactivate_source(gone.id).unwrap();

    let reports = h.worker().sync_all_active().await.unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].source_id, live.id);
    assert!(h.worker().sync_source(gone.id).await.is_err());
}
