//! End-to-end behaviour of the cache, fetch coordinator, preloader and window
//! policy wired together over an in-memory source.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use artframe_core::{AssetKey, ByteSize, CacheConfig, LoaderState, PoolLimits};
use common::{Pipeline, StubSource, key, keys, test_config};

fn sorted(mut keys: Vec<AssetKey>) -> Vec<AssetKey> {
    keys.sort();
    keys
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_from_many_tasks_fetch_once() {
    let items = keys(1);
    let pipeline = Pipeline::new(
        StubSource::serving(&items, Duration::from_millis(30)),
        &test_config(),
    );

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let coordinator = pipeline.coordinator.clone();
        tasks.push(tokio::spawn(async move { coordinator.resolve(&key(0)).await }));
    }
    for task in tasks {
        task.await.expect("join").expect("load");
    }

    assert_eq!(pipeline.source.fetch_count(), 1);
    assert_eq!(pipeline.coordinator.fetch_attempts(), 1);
    assert!(pipeline.coordinator.peek(&key(0)).is_some());
}

#[tokio::test]
async fn priority_item_rides_in_the_first_batch() {
    let items = keys(5);
    let pipeline = Pipeline::new(
        StubSource::serving(&items, Duration::from_millis(5)),
        &test_config(),
    );

    let mut progress = Vec::new();
    let mut completions = 0;
    let report = pipeline
        .preloader
        .preload(&items, [3], |p| progress.push(p), || completions += 1)
        .await;

    let log = pipeline.source.fetch_log();
    assert_eq!(log.len(), 5);
    assert!(log[..2].contains(&key(3)));
    assert!(log[..2].contains(&key(0)));
    assert!(log[2..4].contains(&key(1)));
    assert!(log[2..4].contains(&key(2)));
    assert_eq!(log[4], key(4));

    assert_eq!(completions, 1);
    assert_eq!(progress.len(), 5);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last().copied(), Some(1.0));
    assert_eq!(report.loaded, 5);
}

#[tokio::test]
async fn empty_preload_only_completes() {
    let pipeline = Pipeline::new(StubSource::default(), &test_config());
    let mut progress_calls = 0;
    let mut completions = 0;
    pipeline
        .preloader
        .preload(&[], std::iter::empty(), |_| progress_calls += 1, || completions += 1)
        .await;
    assert_eq!((progress_calls, completions), (0, 1));
    assert_eq!(pipeline.source.fetch_count(), 0);
}

#[tokio::test]
async fn debounced_sync_keeps_radius_two_and_requests_the_edges() {
    let items: Arc<[_]> = keys(10).into();
    // Slow source so edge fetches are still in flight when we look.
    let pipeline = Pipeline::new(
        StubSource::serving(&items, Duration::from_millis(500)),
        &test_config(),
    );
    pipeline.warm(&items);
    let mut syncs = pipeline.window.subscribe_syncs();

    let window = pipeline.window.on_focus_changed(5, Arc::clone(&items));
    assert_eq!(window.keep_range(), 3..8);
    assert_eq!(window.load_range(), 2..9);
    // Nothing is evicted before the debounce fires.
    assert_eq!(pipeline.cache.len(), 10);

    let sync = syncs
        .wait_for(|sync| sync.is_some())
        .await
        .expect("sync")
        .clone()
        .expect("report");
    assert_eq!(sync.focus, 5);
    assert_eq!(sync.removed, 5);
    assert_eq!(sync.requested, 2);

    assert_eq!(pipeline.resident_sorted(), sorted(items[3..8].to_vec()));
    assert!(pipeline.coordinator.is_loading(&key(2)));
    assert!(pipeline.coordinator.is_loading(&key(8)));
    for evicted in [0, 1, 9] {
        assert!(!pipeline.coordinator.is_loading(&key(evicted)));
        assert!(pipeline.coordinator.peek(&key(evicted)).is_none());
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sorted(pipeline.source.fetch_log()), sorted(vec![key(2), key(8)]));
}

#[tokio::test]
async fn rapid_focus_changes_apply_only_the_last() {
    let items: Arc<[_]> = keys(10).into();
    let pipeline = Pipeline::new(
        StubSource::serving(&items, Duration::from_millis(500)),
        &test_config(),
    );
    pipeline.warm(&items);
    let mut syncs = pipeline.window.subscribe_syncs();

    for focus in 1..=8 {
        pipeline.window.on_focus_changed(focus, Arc::clone(&items));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let sync = syncs
        .wait_for(|sync| sync.is_some())
        .await
        .expect("sync")
        .clone()
        .expect("report");
    assert_eq!(sync.focus, 8);
    // Keep range 6..=9: everything below was still resident, so no earlier
    // sync ran.
    assert_eq!(sync.removed, 6);
    assert_eq!(pipeline.resident_sorted(), sorted(items[6..10].to_vec()));
}

#[tokio::test]
async fn step_navigation_prunes_to_radius_one_immediately() {
    let items = keys(6);
    let pipeline = Pipeline::new(
        StubSource::serving(&items, Duration::from_millis(5)),
        &test_config(),
    );
    pipeline.warm(&items[..5]);

    let window = pipeline.window.on_step(4, &items);
    assert_eq!(window.step_range(), 3..6);
    assert_eq!(pipeline.resident_sorted(), sorted(items[3..5].to_vec()));
    // The selection was already resident, so no fetch starts; index 5 is
    // kept but never requested.
    assert!(!pipeline.coordinator.is_loading(&key(4)));
    assert!(!pipeline.coordinator.is_loading(&key(5)));

    let window = pipeline.window.on_step(5, &items);
    assert_eq!(window.focus(), 5);
    assert!(pipeline.coordinator.is_loading(&key(5)));
    pipeline.coordinator.wait_for(&key(5)).await.expect("loaded");
    assert_eq!(pipeline.resident_sorted(), sorted(items[4..6].to_vec()));
}

#[tokio::test]
async fn closing_keeps_only_the_selection_and_cancels_pending_sync() {
    let items: Arc<[_]> = keys(8).into();
    let pipeline = Pipeline::new(
        StubSource::serving(&items, Duration::from_millis(5)),
        &test_config(),
    );
    pipeline.warm(&items);
    let syncs = pipeline.window.subscribe_syncs();

    pipeline.window.on_focus_changed(0, Arc::clone(&items));
    let removed = pipeline.window.on_close(Some(&key(6)));
    assert_eq!(removed, 7);
    assert_eq!(pipeline.cache.keys(), vec![key(6)]);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(syncs.borrow().is_none());
    assert_eq!(pipeline.cache.keys(), vec![key(6)]);
    assert_eq!(pipeline.source.fetch_count(), 0);
}

#[tokio::test]
async fn window_evictions_forget_failed_keys() {
    let items = keys(8);
    // key(0) is never served, so every request for it fails.
    let pipeline = Pipeline::new(
        StubSource::serving(&items[1..], Duration::ZERO),
        &test_config(),
    );
    let is_failed = |pipeline: &Pipeline| {
        matches!(
            pipeline.coordinator.load_state(&key(0)),
            LoaderState::Failed(_)
        )
    };

    pipeline.coordinator.resolve(&key(0)).await.expect_err("404");
    assert!(is_failed(&pipeline));
    pipeline.window.on_step(5, &items);
    assert!(matches!(
        pipeline.coordinator.load_state(&key(0)),
        LoaderState::Idle
    ));

    pipeline.coordinator.resolve(&key(0)).await.expect_err("404");
    assert!(is_failed(&pipeline));
    pipeline.window.on_close(Some(&key(5)));
    assert!(!is_failed(&pipeline));

    pipeline.coordinator.resolve(&key(0)).await.expect_err("404");
    assert!(is_failed(&pipeline));
    pipeline.window.on_memory_pressure(None);
    assert!(!is_failed(&pipeline));
    assert!(pipeline.coordinator.wait_for(&key(0)).await.is_err_and(|err| {
        err == artframe_core::AssetError::NotFound(key(0))
    }));
}

#[tokio::test]
async fn memory_pressure_mid_preload_still_completes() {
    let items = keys(6);
    let pipeline = Pipeline::new(
        StubSource::serving(&items, Duration::from_millis(40)),
        &test_config(),
    );

    let completions = Arc::new(AtomicUsize::new(0));
    let preload = {
        let preloader = pipeline.preloader.clone();
        let items = items.clone();
        let completions = Arc::clone(&completions);
        tokio::spawn(async move {
            preloader
                .preload(&items, [0, 1], |_| {}, move || {
                    completions.fetch_add(1, Ordering::SeqCst);
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(60)).await;
    pipeline.window.on_memory_pressure(Some(&key(0)));
    assert!(
        pipeline.cache.len() <= 1,
        "only the reloaded selection may be resident right after a flush"
    );

    let report = tokio::time::timeout(Duration::from_secs(5), preload)
        .await
        .expect("preload finished")
        .expect("join");
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert_eq!(report.resolved(), 6);
    pipeline
        .coordinator
        .wait_for(&key(0))
        .await
        .expect("selection reloaded");
}

#[tokio::test]
async fn tight_pools_never_exceed_their_ceilings() {
    let items = keys(12);
    let config = CacheConfig {
        static_pool: PoolLimits::new(3, ByteSize::from_mib(1)),
        batch_pause_ms: 0,
        ..test_config()
    };
    let pipeline = Pipeline::new(StubSource::serving(&items, Duration::ZERO), &config);

    let mut max_seen = 0;
    pipeline
        .preloader
        .preload(
            &items,
            std::iter::empty(),
            |_| max_seen = max_seen.max(pipeline.cache.len()),
            || {},
        )
        .await;

    assert!(max_seen <= 3);
    let stats = pipeline.cache.stats();
    assert_eq!(stats.static_entries, 3);
    assert_eq!(stats.evictions, 9);
}
