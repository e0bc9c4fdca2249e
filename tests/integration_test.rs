//! Integration tests for redis-object-cache with the in-memory and Redis backends.

use futures::future::join_all;
use redis_object_cache::{
    Backend, CacheConfig, ConnectionState, InMemoryBackend, ObjectCache, PolicyConfig,
    RedisBackend,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Test Types
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Post {
    id: u64,
    title: String,
    tags: Vec<String>,
}

fn sample_post() -> Post {
    Post {
        id: 1,
        title: "Hello".into(),
        tags: vec!["news".into()],
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Route engine logs to the test output. Filter with `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(prefix: &str, tenant: u64) -> CacheConfig {
    CacheConfig {
        prefix: prefix.into(),
        tenant: tenant.into(),
        ..CacheConfig::default()
    }
}

async fn connected(config: CacheConfig) -> (Arc<InMemoryBackend>, ObjectCache) {
    init_tracing();
    let backend = Arc::new(InMemoryBackend::new());
    let cache = ObjectCache::builder(config)
        .backend(backend.clone())
        .build()
        .await;
    backend.clear_calls().await;
    (backend, cache)
}

async fn memory_only() -> ObjectCache {
    ObjectCache::builder(CacheConfig {
        disabled: true,
        ..CacheConfig::default()
    })
    .build()
    .await
}

// ============================================================================
// Read-your-writes
// ============================================================================

#[tokio::test]
async fn test_read_your_writes_connected() {
    let (_, cache) = connected(config("wp_", 1)).await;

    for (group, value) in [
        ("posts", json!({"title": "x"})),
        ("", json!([1, 2, 3])),
        ("options", json!(false)),
        ("options", Value::Null),
    ] {
        assert!(cache.set("k", value.clone(), group, 0).await);
        assert_eq!(cache.get("k", group, false).await, Some(value));
    }
}

#[tokio::test]
async fn test_read_your_writes_while_disconnected() {
    let cache = memory_only().await;
    assert_eq!(
        cache.connection_state().await,
        ConnectionState::Disconnected
    );

    cache.set("k", json!({"a": 1}), "posts", 60).await;
    assert_eq!(cache.get("k", "posts", false).await, Some(json!({"a": 1})));
    assert_eq!(cache.remote_calls(), 0);
}

#[tokio::test]
async fn test_stored_false_is_distinguishable_from_miss() {
    let cache = memory_only().await;
    cache.set("flag", json!(false), "options", 0).await;

    assert_eq!(cache.get("flag", "options", false).await, Some(json!(false)));
    assert_eq!(cache.get("other", "options", false).await, None);
}

#[tokio::test]
async fn test_values_are_copied_across_the_boundary() {
    let (_, cache) = connected(config("", 0)).await;
    let mut value = json!({"tags": ["a"]});
    cache.set("p", value.clone(), "posts", 0).await;

    // Mutating the caller's copy after set changes nothing.
    value["tags"] = json!(["mutated"]);
    let mut fetched = cache.get("p", "posts", false).await.unwrap();
    assert_eq!(fetched, json!({"tags": ["a"]}));

    // Neither does mutating what get returned.
    fetched["tags"] = json!([]);
    assert_eq!(cache.get("p", "posts", false).await, Some(json!({"tags": ["a"]})));
}

#[tokio::test]
async fn test_typed_round_trip_through_backend() {
    let (_, cache) = connected(config("wp_", 1)).await;
    cache.set_as("1", &sample_post(), "posts", 0).await;
    cache.flush_runtime().await;

    // Memory is empty, so this comes back from the backend.
    assert_eq!(cache.get_as::<Post>("1", "posts").await, Some(sample_post()));
}

// ============================================================================
// Non-persistent groups
// ============================================================================

#[tokio::test]
async fn test_non_persistent_group_never_calls_backend() {
    let (backend, cache) = connected(config("wp_", 1)).await;
    cache.add_non_persistent_groups(["cart"]).await;

    cache.set("item", json!(3), "cart", 60).await;
    assert_eq!(cache.get("item", "cart", false).await, Some(json!(3)));
    assert_eq!(cache.get("missing", "cart", false).await, None);
    assert_eq!(cache.get("item", "cart", true).await, None);
    cache.get_multiple(&["item", "missing"], "cart", false).await;
    assert!(cache.exists("item", "cart").await);
    assert_eq!(cache.incr("item", 2, "cart").await, Some(5));
    cache.delete("item", "cart").await;

    assert_eq!(backend.call_count().await, 0);
    assert_eq!(cache.remote_calls(), 0);
}

#[tokio::test]
async fn test_non_persistent_entries_do_not_survive_flush() {
    let (backend, cache) = connected(config("t7_", 0)).await;
    cache.add_non_persistent_groups(["sessions"]).await;

    cache.set("abc", json!("payload"), "sessions", 0).await;
    assert!(backend.keys().await.is_empty());
    assert_eq!(
        cache.get("abc", "sessions", false).await,
        Some(json!("payload"))
    );

    assert!(cache.flush().await);
    assert_eq!(cache.get("abc", "sessions", false).await, None);
}

// ============================================================================
// Hash-packed groups and tenants
// ============================================================================

#[tokio::test]
async fn test_hash_packed_fields_are_isolated() {
    let (backend, cache) = connected(config("wp_", 3)).await;
    cache.add_hash_groups(["meta"]).await;

    cache.set("k1", json!("one"), "meta", 0).await;
    cache.set("k2", json!("two"), "meta", 0).await;
    assert_eq!(backend.keys().await, vec!["wp_3:meta"]);

    cache.delete("k1", "meta").await;
    cache.flush_runtime().await;

    assert_eq!(cache.get("k1", "meta", false).await, None);
    assert_eq!(cache.get("k2", "meta", false).await, Some(json!("two")));
    assert_eq!(
        backend.hash_get("wp_3:meta", "k2").await.unwrap().as_deref(),
        Some("\"two\"")
    );
}

#[tokio::test]
async fn test_tenants_do_not_see_each_others_hash_entries() {
    let (backend, cache) = connected(config("wp_", 3)).await;
    cache.add_hash_groups(["meta"]).await;

    cache.set("post_1", json!({"title": "x"}), "meta", 0).await;
    cache.switch_tenant(4u64).await;
    assert_eq!(cache.get("post_1", "meta", false).await, None);
    cache.set("post_1", json!({"title": "y"}), "meta", 0).await;

    assert_eq!(backend.keys().await, vec!["wp_3:meta", "wp_4:meta"]);

    cache.switch_tenant(3u64).await;
    assert_eq!(
        cache.get("post_1", "meta", true).await,
        Some(json!({"title": "x"}))
    );
    assert_eq!(
        cache.get("post_1", "meta", false).await,
        Some(json!({"title": "x"}))
    );
}

#[tokio::test]
async fn test_global_group_is_shared_across_tenants() {
    let (backend, cache) = connected(config("wp_", 1)).await;
    cache.add_global_groups(["users"]).await;

    cache.set("u1", json!("alice"), "users", 0).await;
    cache.switch_tenant(2u64).await;

    assert_eq!(cache.get("u1", "users", false).await, Some(json!("alice")));
    assert_eq!(backend.keys().await, vec!["wp_users:u1"]);
}

// ============================================================================
// Flushing
// ============================================================================

#[tokio::test]
async fn test_flush_group_then_get_misses() {
    let (_, cache) = connected(config("wp_", 1)).await;
    cache.add_hash_groups(["meta"]).await;

    for group in ["posts", "meta"] {
        cache.set("a", json!(1), group, 0).await;
        cache.set("b", json!(2), group, 0).await;

        assert!(cache.flush_group(group).await);

        assert_eq!(cache.get("a", group, false).await, None);
        assert_eq!(cache.get("b", group, true).await, None);
    }
}

#[tokio::test]
async fn test_flush_only_removes_this_tenant_on_shared_database() {
    let (backend, cache) = connected(config("t7_", 1)).await;
    cache.set("a", json!(1), "posts", 0).await;
    cache.switch_tenant(2u64).await;
    cache.set("a", json!(2), "posts", 0).await;
    cache.switch_tenant(1u64).await;

    assert!(cache.flush().await);

    assert_eq!(backend.keys().await, vec!["t7_2:posts:a"]);
    cache.switch_tenant(2u64).await;
    assert_eq!(cache.get("a", "posts", false).await, Some(json!(2)));
}

#[tokio::test]
async fn test_flush_on_shared_nonzero_database_keeps_foreign_keys() {
    let (backend, cache) = connected(CacheConfig {
        database: 15,
        dedicated_database: Some(false),
        ..config("roc_", 0)
    })
    .await;
    backend.set("someone_else", "1", 0).await.unwrap();
    cache.set("a", json!(1), "posts", 0).await;
    backend.clear_calls().await;

    assert!(cache.flush().await);

    assert!(!backend.calls().await.contains(&"FLUSHDB".to_string()));
    assert_eq!(backend.keys().await, vec!["someone_else"]);
}

#[tokio::test]
async fn test_flush_runtime_keeps_backend() {
    let (_, cache) = connected(config("wp_", 1)).await;
    cache.set("a", json!(1), "posts", 0).await;
    cache.flush_runtime().await;

    assert_eq!(cache.get("a", "posts", false).await, Some(json!(1)));
    assert_eq!(cache.hits(), 1);
}

// ============================================================================
// Counters
// ============================================================================

#[tokio::test]
async fn test_incr_then_decr() {
    let (backend, cache) = connected(config("wp_", 1)).await;
    cache.set("n", json!(10), "counts", 0).await;

    assert_eq!(cache.incr("n", 5, "counts").await, Some(15));
    assert_eq!(cache.decr("n", 3, "counts").await, Some(12));
    assert_eq!(cache.get("n", "counts", false).await, Some(json!(12)));
    assert_eq!(
        backend.get("wp_1:counts:n").await.unwrap().as_deref(),
        Some("12")
    );
}

#[tokio::test]
async fn test_decr_clamps_at_zero() {
    let (backend, cache) = connected(config("wp_", 1)).await;
    cache.add_hash_groups(["meta"]).await;

    for group in ["counts", "meta"] {
        cache.set("n", json!(2), group, 0).await;
        assert_eq!(cache.decr("n", 5, group).await, Some(0));
        assert_eq!(cache.get("n", group, true).await, Some(json!(0)));
    }
    assert_eq!(
        backend.hash_get("wp_1:meta", "n").await.unwrap().as_deref(),
        Some("0")
    );

    let offline = memory_only().await;
    offline.set("n", json!(1), "counts", 0).await;
    assert_eq!(offline.decr("n", 10, "counts").await, Some(0));
}

#[tokio::test]
async fn test_incr_uses_atomic_increment() {
    let (backend, cache) = connected(config("wp_", 1)).await;
    cache.set("n", json!(1), "counts", 0).await;
    backend.clear_calls().await;

    cache.incr("n", 1, "counts").await;

    assert_eq!(backend.calls().await, vec!["INCRBY wp_1:counts:n"]);
}

#[tokio::test]
async fn test_hit_miss_and_remote_call_counters() {
    let (_, cache) = connected(config("wp_", 1)).await;

    cache.set("a", json!(1), "posts", 0).await; // SET
    cache.get("a", "posts", false).await; // memory hit
    cache.get("b", "posts", false).await; // GET, miss
    cache
        .get_multiple(&["a", "c", "d"], "posts", false)
        .await; // 1 hit, MGET, 2 misses

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 3);
    assert_eq!(stats.remote_calls, 3);
    assert_eq!(stats.connection, ConnectionState::Connected);
}

// ============================================================================
// Expiry
// ============================================================================

#[tokio::test]
async fn test_ttl_expiry_is_only_observed_remotely() {
    let (backend, cache) = connected(config("wp_", 1)).await;
    cache.set("k", json!("v"), "posts", 60).await;

    backend.advance(Duration::from_secs(61)).await;

    assert_eq!(cache.get("k", "posts", true).await, None);
    assert_eq!(cache.get("k", "posts", false).await, Some(json!("v")));
}

#[tokio::test]
async fn test_group_ttl_applies_to_hash_groups() {
    let (backend, cache) = connected(config("wp_", 1)).await;
    cache
        .apply_policies(&PolicyConfig::from_text("", "", "meta", "meta:30"))
        .await;

    cache.set("a", json!(1), "meta", 0).await;
    assert_eq!(backend.ttl("wp_1:meta").await.unwrap(), 30);

    backend.advance(Duration::from_secs(31)).await;
    assert_eq!(cache.get("a", "meta", true).await, None);
}

// ============================================================================
// Degraded mode
// ============================================================================

#[tokio::test]
async fn test_backend_failure_degrades_and_keeps_serving() {
    let (backend, cache) = connected(config("wp_", 1)).await;
    cache.set("before", json!(1), "posts", 0).await;

    backend.set_failing(true).await;
    assert!(cache.set("during", json!(2), "posts", 0).await);
    assert_eq!(cache.connection_state().await, ConnectionState::Degraded);

    // Backend recovers, but the engine does not reconnect.
    backend.set_failing(false).await;
    backend.clear_calls().await;

    assert_eq!(cache.get("during", "posts", false).await, Some(json!(2)));
    assert_eq!(cache.get("before", "posts", false).await, Some(json!(1)));
    assert_eq!(cache.get("never", "posts", false).await, None);
    assert!(cache.delete("before", "posts").await);
    assert!(cache.flush().await);
    assert_eq!(backend.call_count().await, 0);

    let info = cache.info().await;
    assert_eq!(info.errors.len(), 1);
    assert!(info.server.is_none());
}

#[tokio::test]
async fn test_failure_during_get_is_a_miss() {
    let (backend, cache) = connected(config("wp_", 1)).await;
    backend.set("wp_1:posts:a", "1", 0).await.unwrap();
    backend.set_failing(true).await;

    assert_eq!(cache.get("a", "posts", false).await, None);
    assert_eq!(cache.misses(), 1);
    assert_eq!(cache.remote_calls(), 1);
    assert_eq!(cache.connection_state().await, ConnectionState::Degraded);
}

#[tokio::test]
async fn test_failure_during_flush_group_reports_false() {
    let (backend, cache) = connected(config("wp_", 1)).await;
    cache.set("a", json!(1), "posts", 0).await;
    backend.set_failing(true).await;

    assert!(!cache.flush_group("posts").await);
    assert_eq!(cache.get("a", "posts", false).await, None);
}

// ============================================================================
// Batch operations
// ============================================================================

#[tokio::test]
async fn test_multiple_operations() {
    let (_, cache) = connected(config("wp_", 1)).await;

    let set = cache
        .set_multiple([("a", json!(1)), ("b", json!(2))], "posts", 0)
        .await;
    assert!(set.values().all(|stored| *stored));

    let added = cache
        .add_multiple([("b", json!(20)), ("c", json!(3))], "posts", 0)
        .await;
    assert!(!added["b"]);
    assert!(added["c"]);

    let deleted = cache.delete_multiple(&["a", "c"], "posts").await;
    assert_eq!(deleted.len(), 2);

    let values = cache.get_multiple(&["a", "b", "c"], "posts", true).await;
    assert_eq!(
        values,
        vec![
            ("a".to_string(), None),
            ("b".to_string(), Some(json!(2))),
            ("c".to_string(), None),
        ]
    );
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_increments_are_serialized() {
    let (backend, cache) = connected(config("wp_", 1)).await;
    let cache = Arc::new(cache);
    cache.set("n", json!(0), "counts", 0).await;

    let tasks = (0..50).map(|_| {
        let cache = cache.clone();
        async move { cache.incr("n", 1, "counts").await }
    });
    let results = join_all(tasks).await;

    assert!(results.iter().all(Option::is_some));
    assert_eq!(cache.get("n", "counts", false).await, Some(json!(50)));
    assert_eq!(
        backend.get("wp_1:counts:n").await.unwrap().as_deref(),
        Some("50")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_engine_across_tasks() {
    let (_, cache) = connected(config("wp_", 1)).await;
    let cache = Arc::new(cache);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cache = cache.clone();
            tokio::spawn(async move {
                let key = format!("k{i}");
                cache.set(&key, json!(i), "posts", 0).await;
                cache.get(&key, "posts", false).await
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), Some(json!(i)));
    }
}

// ============================================================================
// Redis
// ============================================================================

// Note: These tests require a running Redis instance on localhost:6379.
// Run with: cargo test -- --ignored

/// Database 15, treated as shared so `flush()` only removes `prefix` keys.
fn redis_config(prefix: &str) -> CacheConfig {
    CacheConfig {
        prefix: prefix.into(),
        database: 15,
        dedicated_database: Some(false),
        ..CacheConfig::default()
    }
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_redis_two_tier_round_trip() {
    let cache = ObjectCache::connect(redis_config("roc_it_")).await;
    assert_eq!(cache.connection_state().await, ConnectionState::Connected);
    cache.flush().await;

    cache.set("p", json!({"title": "x"}), "posts", 60).await;
    cache.flush_runtime().await;
    assert_eq!(
        cache.get("p", "posts", false).await,
        Some(json!({"title": "x"}))
    );

    cache.set("n", json!(10), "counts", 0).await;
    assert_eq!(cache.incr("n", 5, "counts").await, Some(15));
    assert_eq!(cache.decr("n", 20, "counts").await, Some(0));

    assert!(cache.flush().await);
    assert_eq!(cache.get("p", "posts", true).await, None);
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_redis_hash_group_and_info() {
    let config = redis_config("roc_hash_");
    let raw = RedisBackend::connect(&config).await.unwrap();
    let cache = ObjectCache::connect(config).await;
    cache.add_hash_groups(["meta"]).await;

    cache.set("a", json!(1), "meta", 120).await;
    assert!(raw.ttl("roc_hash_0:meta").await.unwrap() > 0);
    assert!(cache.flush_group("meta").await);
    assert!(!raw.exists("roc_hash_0:meta").await.unwrap());

    let info = cache.info().await;
    assert!(info.server.and_then(|s| s.version).is_some());
}
