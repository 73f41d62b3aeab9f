use chrono::Utc;
use linea_core::{
    ContentItem, ContentKind, SqliteCatalogStore, StreamError, StreamResolver, SyncMetadata,
};
use tempfile::TempDir;

fn setup_store() -> (TempDir, SqliteCatalogStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteCatalogStore::builder()
        .path(dir.path().join("catalog.sqlite"))
        .build()
        .unwrap();
    store.initialize().unwrap();
    (dir, store)
}

fn items(kind: ContentKind, count: usize) -> Vec<ContentItem> {
    (1..=count)
        .map(|idx| ContentItem {
            id: idx.to_string(),
            position: idx as i64,
            name: format!("{} {idx}", kind.as_str()),
            logo: "http://logos/default.png".to_string(),
            url: format!("http://h:80/{}/u/p/{idx}", kind.path_kind()),
            provider_id: format!("{}{idx}", kind.as_str()),
            group_title: Some("ES|TEST".to_string()),
            country: Some("ES".to_string()),
            tvg_id: None,
            season: None,
            episode: None,
        })
        .collect()
}

#[test]
fn insert_count_and_lookup() {
    let (_dir, store) = setup_store();
    store
        .insert_batch(ContentKind::Channel, &items(ContentKind::Channel, 3))
        .unwrap();
    store
        .insert_batch(ContentKind::Movie, &items(ContentKind::Movie, 2))
        .unwrap();

    assert_eq!(store.count(ContentKind::Channel).unwrap(), 3);
    assert_eq!(store.count(ContentKind::Movie).unwrap(), 2);
    assert_eq!(store.count(ContentKind::Series).unwrap(), 0);

    let url = store
        .lookup_url(ContentKind::Channel, "channel2")
        .unwrap()
        .unwrap();
    assert_eq!(url, "http://h:80/live/u/p/2");
    assert!(store
        .lookup_url(ContentKind::Movie, "channel2")
        .unwrap()
        .is_none());

    let item = store
        .item_by_provider_id(ContentKind::Movie, "movie1")
        .unwrap()
        .unwrap();
    assert_eq!(item.name, "movie 1");
    assert_eq!(item.position, 1);
}

#[test]
fn truncate_and_batched_delete() {
    let (_dir, store) = setup_store();
    store
        .insert_batch(ContentKind::Series, &items(ContentKind::Series, 10))
        .unwrap();

    let deleted = store.delete_batch(ContentKind::Series, 4).unwrap();
    assert_eq!(deleted, 4);
    assert_eq!(store.count(ContentKind::Series).unwrap(), 6);

    store.truncate(ContentKind::Series).unwrap();
    assert_eq!(store.count(ContentKind::Series).unwrap(), 0);
    assert_eq!(store.delete_batch(ContentKind::Series, 4).unwrap(), 0);
}

#[test]
fn metadata_roundtrip_and_upsert() {
    let (_dir, store) = setup_store();
    assert!(store.metadata().unwrap().is_none());

    store
        .upsert_metadata(&SyncMetadata {
            last_sync: Some(Utc::now()),
            total_channels: 3,
            total_movies: 2,
            total_series: 1,
            channels_with_logo: 2,
            movies_with_logo: 2,
            series_with_logo: 0,
            template_path: Some("/data/m3u/playlist_template.m3u".to_string()),
            template_bytes: Some(4096),
        })
        .unwrap();
    let first = store.metadata().unwrap().unwrap();
    assert_eq!(first.total(), 6);
    assert_eq!(first.count_for(ContentKind::Channel), 3);

    // second upsert replaces the single row
    store
        .upsert_metadata(&SyncMetadata {
            last_sync: Some(Utc::now()),
            total_channels: 5,
            ..first.clone()
        })
        .unwrap();
    let second = store.metadata().unwrap().unwrap();
    assert_eq!(second.total_channels, 5);
    assert_eq!(second.total_movies, 2);
}

#[test]
fn resolver_memoizes_and_reports_missing_ids() {
    let (_dir, store) = setup_store();
    store
        .insert_batch(ContentKind::Channel, &items(ContentKind::Channel, 2))
        .unwrap();
    store
        .insert_batch(ContentKind::Movie, &items(ContentKind::Movie, 1))
        .unwrap();

    let resolver = StreamResolver::new(store.clone());
    assert_eq!(resolver.cached_entries(), 0);
    let url = resolver.resolve(ContentKind::Channel, "channel1").unwrap();
    assert_eq!(url, "http://h:80/live/u/p/1");
    assert_eq!(resolver.cached_entries(), 1);

    // cache hit survives a catalog purge
    store.truncate(ContentKind::Channel).unwrap();
    assert_eq!(
        resolver.resolve(ContentKind::Channel, "channel1").unwrap(),
        "http://h:80/live/u/p/1"
    );

    match resolver.resolve(ContentKind::Series, "missing") {
        Err(StreamError::NotFound { kind, provider_id }) => {
            assert_eq!(kind, ContentKind::Series);
            assert_eq!(provider_id, "missing");
        }
        other => panic!("expected not-found, got {other:?}"),
    }
}

#[test]
fn resolver_preload_fills_every_row() {
    let (_dir, store) = setup_store();
    store
        .insert_batch(ContentKind::Channel, &items(ContentKind::Channel, 2))
        .unwrap();
    store
        .insert_batch(ContentKind::Series, &items(ContentKind::Series, 3))
        .unwrap();

    let resolver = StreamResolver::new(store);
    assert_eq!(resolver.preload().unwrap(), 5);
    assert_eq!(resolver.cached_entries(), 5);
    resolver.clear();
    assert_eq!(resolver.cached_entries(), 0);
}
