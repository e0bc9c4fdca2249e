//! redis-object-cache - A two-tier object cache engine for Rust
//!
//! This library caches arbitrary values under `(group, key)` pairs in two
//! layers:
//! - A process-local memory layer consulted first
//! - A remote key-value backend (Redis) shared between processes
//!
//! Groups carry policies that change the routing: non-persistent groups never
//! leave the memory layer, global groups are shared across tenants, and
//! hash-packed groups store all their keys as fields of one remote hash.
//!
//! A backend outage never becomes an application error. The engine records the
//! failure, switches to degraded mode and keeps serving from memory.
//!
//! # Example
//!
//! ```ignore
//! use redis_object_cache::{CacheConfig, ObjectCache};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = ObjectCache::connect(CacheConfig::load()?).await;
//!
//!     cache.add_non_persistent_groups(["cart"]).await;
//!     cache.add_hash_groups(["post_meta"]).await;
//!
//!     cache.set("post_1", json!({"title": "hello"}), "posts", 300).await;
//!     let post = cache.get("post_1", "posts", false).await;
//!
//!     cache.set("views", json!(10), "counters", 0).await;
//!     cache.incr("views", 1, "counters").await;
//!
//!     println!("{:?} {:?}", post, cache.stats().await);
//!     Ok(())
//! }
//! ```

mod builder;
mod cache;
mod codec;
mod config;
mod error;
mod groups;
mod namespace;
mod stats;
mod store;
pub mod stores;
mod utils;

// Re-export public API
pub use builder::ObjectCacheBuilder;
pub use cache::ObjectCache;
pub use codec::{Serializer, counter_value};
pub use self::config::CacheConfig;
pub use error::{BackendError, ConfigError};
pub use groups::{
    DEFAULT_GROUP, GroupFlag, GroupPolicy, GroupRegistry, PolicyConfig, parse_groups, parse_ttl,
};
pub use namespace::{KeyNamespacer, TenantId};
pub use stats::{CacheInfo, CacheStats, ConnectionState, Counters, Feature, UnknownFeature};
pub use store::{Backend, ServerInfo};
pub use stores::{InMemoryBackend, MemoryLayer, MeteredBackend, RedisBackend};
pub use utils::{escape_glob, glob_match};
