//! Request de-duplication and memoization through the public cache API.

use std::{sync::Arc, time::Duration};

use engine_assets::prelude::*;
use engine_tests::{init_tracing, wait_until, MockBackend};

#[derive(Debug, PartialEq)]
struct Prefab {
    name: &'static str,
}

#[derive(Debug, PartialEq)]
struct Health(u32);

#[derive(Debug, PartialEq)]
struct Sprite(&'static str);

/// N concurrent first-time loads of one key issue exactly one fetch, and
/// every caller gets the same record.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_loads_share_one_fetch() -> anyhow::Result<()> {
    init_tracing();

    let backend = Arc::new(
        MockBackend::new()
            .with_asset("hero.prefab", Prefab { name: "hero" })
            .gated(),
    );
    let cache = ResourceCache::new(backend.clone());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        tasks.push(tokio::spawn(async move {
            cache.load::<Prefab>("hero.prefab").await
        }));
    }

    wait_until(|| cache.waiters("hero.prefab") == 8).await;
    wait_until(|| backend.total_fetches() == 1).await;
    assert!(cache.is_pending("hero.prefab"));
    assert!(!cache.is_cached("hero.prefab"));

    backend.open_gate();

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await??);
    }

    assert_eq!(backend.fetch_count("hero.prefab"), 1);
    assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    assert_eq!(results[0].name, "hero");
    assert!(!cache.is_pending("hero.prefab"));
    Ok(())
}

#[tokio::test]
async fn two_concurrent_requests_for_hero() -> anyhow::Result<()> {
    let backend = Arc::new(
        MockBackend::new()
            .with_asset("hero.prefab", Prefab { name: "hero" })
            .gated(),
    );
    let cache = ResourceCache::new(backend.clone());

    let (a, b, ()) = tokio::join!(
        cache.load::<Prefab>("hero.prefab"),
        cache.load::<Prefab>("hero.prefab"),
        async {
            wait_until(|| cache.waiters("hero.prefab") == 2).await;
            backend.open_gate();
        }
    );

    let (a, b) = (a?, b?);
    assert!(Arc::ptr_eq(&a, &b));
    let log = backend.fetch_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0, "hero.prefab");
    assert_eq!(log[0].1, AssetType::of::<Prefab>());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_waiters_share_the_failure() -> anyhow::Result<()> {
    let backend = Arc::new(
        MockBackend::new()
            .with_asset("level.bin", 42u32)
            .failing("level.bin", 1)
            .gated(),
    );
    let cache = ResourceCache::new(backend.clone());

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.load::<u32>("level.bin").await })
        })
        .collect();

    wait_until(|| cache.waiters("level.bin") == 3).await;
    backend.open_gate();

    for task in tasks {
        let err = task.await?.unwrap_err();
        assert!(matches!(err, LoadError::Backend { .. }), "got {err}");
        assert!(err.is_retryable());
    }
    assert_eq!(backend.fetch_count("level.bin"), 1);
    assert!(!cache.is_cached("level.bin"));

    // Failed is not terminal: the next load fetches again and succeeds.
    assert_eq!(*cache.load::<u32>("level.bin").await?, 42);
    assert_eq!(backend.fetch_count("level.bin"), 2);
    Ok(())
}

#[tokio::test]
async fn memoized_after_success() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new().with_asset("a", 1u32));
    let cache = ResourceCache::new(backend.clone());

    let first = cache.load::<u32>("a").await?;
    let cached = cache.try_get_cached::<u32>("a").expect("cached");
    let again = cache.load::<u32>("a").await?;

    assert!(Arc::ptr_eq(&first, &cached));
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(backend.total_fetches(), 1);
    assert_eq!(cache.keys(), vec![ResourceKey::new("a")]);
    Ok(())
}

#[tokio::test]
async fn not_found_is_not_cached() {
    let backend = Arc::new(MockBackend::new());
    let cache = ResourceCache::new(backend.clone());

    for expected_fetches in 1..=2 {
        let err = cache.load::<u32>("ghost").await.unwrap_err();
        assert!(matches!(err, LoadError::NotFound { ref key } if key.as_str() == "ghost"));
        assert!(!err.is_retryable());
        assert!(!cache.is_cached("ghost"));
        assert_eq!(backend.fetch_count("ghost"), expected_fetches);
    }
}

#[tokio::test]
async fn sub_asset_key_is_normalized_for_backend_only() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new().with_asset("icon.sprite[icon]", Sprite("icon")));
    let cache = ResourceCache::new(backend.clone());

    let sprite = cache.load::<Sprite>("icon.sprite").await?;
    assert_eq!(*sprite, Sprite("icon"));

    assert_eq!(backend.fetch_log()[0].0, "icon.sprite[icon]");
    assert!(cache.is_cached("icon.sprite"));
    assert!(!cache.is_cached("icon.sprite[icon]"));

    cache.load::<Sprite>("icon.sprite").await?;
    assert_eq!(backend.total_fetches(), 1);
    Ok(())
}

#[tokio::test]
async fn custom_sub_asset_marker() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new().with_asset("wall.tex[wall]", Sprite("wall")));
    let cfg = CacheConfig::from_json_str(r#"{ "sub_asset_marker": ".tex" }"#)?;
    let cache = ResourceCache::with_config(backend.clone(), cfg);

    cache.load::<Sprite>("wall.tex").await?;
    assert_eq!(backend.fetch_log()[0].0, "wall.tex[wall]");
    Ok(())
}

#[tokio::test]
async fn type_mismatch_is_distinct_from_not_found() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new().with_asset("hero.prefab", Prefab { name: "hero" }));
    let cache = ResourceCache::new(backend.clone());
    cache.load::<Prefab>("hero.prefab").await?;

    match cache.get::<Sprite>("hero.prefab") {
        Err(LoadError::TypeMismatch { key, expected, found }) => {
            assert_eq!(key.as_str(), "hero.prefab");
            assert!(expected.contains("Sprite"));
            assert!(found.contains("Prefab"));
        }
        other => panic!("expected TypeMismatch, got {other:?}"),
    }
    assert!(matches!(
        cache.get::<Sprite>("villain.prefab"),
        Err(LoadError::NotFound { .. })
    ));

    // Permissive accessor reports both as absent.
    assert!(cache.try_get_cached::<Sprite>("hero.prefab").is_none());
    assert!(cache.try_get_cached::<Sprite>("villain.prefab").is_none());

    // Loading with the wrong type does not re-fetch.
    let err = cache.load::<Sprite>("hero.prefab").await.unwrap_err();
    assert!(matches!(err, LoadError::TypeMismatch { .. }));
    assert_eq!(backend.total_fetches(), 1);
    Ok(())
}

#[tokio::test]
async fn parts_answer_component_lookups() -> anyhow::Result<()> {
    let asset = FetchedAsset::new(Prefab { name: "orc" }).with_part(Health(30));
    let backend = Arc::new(MockBackend::new().with_fetched("orc.prefab", asset));
    let cache = ResourceCache::new(backend);

    cache.load::<Prefab>("orc.prefab").await?;
    assert_eq!(*cache.get::<Health>("orc.prefab")?, Health(30));
    assert_eq!(
        cache.cached_record("orc.prefab").map(|r| r.asset_type()),
        Some(AssetType::of::<Prefab>())
    );

    // A cached part also satisfies a typed load.
    assert_eq!(*cache.load::<Health>("orc.prefab").await?, Health(30));
    Ok(())
}

#[tokio::test]
async fn dropping_a_waiter_keeps_the_fetch_alive() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new().with_asset("map.bin", 7u32).gated());
    let cache = ResourceCache::new(backend.clone());

    let first = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.load::<u32>("map.bin").await })
    };
    let second = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.load::<u32>("map.bin").await })
    };
    wait_until(|| cache.waiters("map.bin") == 2).await;

    first.abort();
    wait_until(|| cache.waiters("map.bin") == 1).await;
    assert!(cache.is_pending("map.bin"));

    backend.open_gate();
    assert_eq!(*second.await??, 7);
    assert_eq!(backend.fetch_count("map.bin"), 1);
    Ok(())
}

#[tokio::test]
async fn fetch_completes_after_every_waiter_left() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new().with_asset("music.ogg", 3u32).gated());
    let cache = ResourceCache::new(backend.clone());

    let abandoned = tokio::time::timeout(Duration::from_millis(20), cache.load::<u32>("music.ogg")).await;
    assert!(abandoned.is_err());
    assert!(cache.is_pending("music.ogg"));

    backend.open_gate();
    wait_until(|| cache.is_cached("music.ogg")).await;
    assert_eq!(*cache.load::<u32>("music.ogg").await?, 3);
    assert_eq!(backend.total_fetches(), 1);
    Ok(())
}

#[tokio::test]
async fn panicking_fetch_aborts_waiters() {
    let backend = Arc::new(MockBackend::new().panicking("cursed.bin"));
    let cache = ResourceCache::new(backend.clone());

    let err = cache.load::<u32>("cursed.bin").await.unwrap_err();
    assert!(matches!(err, LoadError::Aborted { .. }));
    assert!(err.is_retryable());
    assert!(!cache.is_pending("cursed.bin"));
    assert!(!cache.is_cached("cursed.bin"));
}

#[tokio::test]
async fn handles_released_at_teardown() -> anyhow::Result<()> {
    let backend = Arc::new(MockBackend::new().with_asset("a", 1u32).with_asset("b", 2u32));
    let cache = ResourceCache::new(backend.clone());

    let a = cache.load::<u32>("a").await?;
    let b = cache.load::<u32>("b").await?;
    let handles = [
        cache.cached_record("a").map(|r| r.handle()),
        cache.cached_record("b").map(|r| r.handle()),
    ];

    assert!(backend.released().is_empty());
    drop(cache);

    let mut released = backend.released();
    released.sort_by_key(|h| h.0);
    let mut expected: Vec<_> = handles.into_iter().flatten().collect();
    expected.sort_by_key(|h| h.0);
    assert_eq!(released, expected);

    // Values handed out earlier stay valid.
    assert_eq!((*a, *b), (1, 2));
    Ok(())
}
