//! Builder API for creating an object cache engine.
//!
//! The builder sanitizes the configuration, applies group policies, then
//! attempts the backend connection. A failed attempt leaves the engine
//! memory-only instead of returning an error.

use std::sync::Arc;

use crate::cache::ObjectCache;
use crate::config::CacheConfig;
use crate::error::BackendError;
use crate::groups::{GroupRegistry, PolicyConfig};
use crate::stats::{ConnectionState, Counters};
use crate::store::Backend;
use crate::stores::redis::RedisBackend;

/// Builder for [`ObjectCache`].
///
/// # Example
///
/// ```ignore
/// use redis_object_cache::{CacheConfig, ObjectCache, PolicyConfig};
///
/// let policies = PolicyConfig {
///     non_persistent_groups: vec!["cart".into()],
///     hash_groups: vec!["post_meta".into()],
///     ..PolicyConfig::default()
/// };
///
/// let cache = ObjectCache::builder(CacheConfig::load()?)
///     .policies(policies)
///     .build()
///     .await;
/// ```
pub struct ObjectCacheBuilder {
    config: CacheConfig,
    policies: PolicyConfig,
    backend: Option<Arc<dyn Backend>>,
}

impl ObjectCacheBuilder {
    pub fn new(config: CacheConfig) -> Self {
        ObjectCacheBuilder {
            config,
            policies: PolicyConfig::default(),
            backend: None,
        }
    }

    /// Group policies applied before the engine serves its first operation.
    pub fn policies(mut self, policies: PolicyConfig) -> Self {
        self.policies = policies;
        self
    }

    /// Use `backend` instead of connecting to Redis.
    ///
    /// The backend is still pinged within the connect timeout.
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Build the engine.
    ///
    /// Never fails. If the configuration disables the backend, or connecting
    /// fails, the engine starts `Disconnected` and serves from memory only.
    pub async fn build(self) -> ObjectCache {
        let config = self.config.sanitized();
        let mut groups = GroupRegistry::new();
        self.policies.apply_to(&mut groups);
        let counters = Arc::new(Counters::default());

        if config.disabled {
            tracing::info!("object cache backend disabled, running memory-only");
            return ObjectCache::from_parts(&config, groups, counters, ConnectionState::Disconnected);
        }

        let cache = ObjectCache::from_parts(&config, groups, counters, ConnectionState::Connecting);
        let outcome = match self.backend {
            Some(backend) => verify(backend, &config).await,
            None => RedisBackend::connect(&config)
                .await
                .map(|backend| Arc::new(backend) as Arc<dyn Backend>),
        };
        cache.attach(outcome).await;
        cache
    }
}

impl Default for ObjectCacheBuilder {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Ping an injected backend within the connect timeout.
async fn verify(
    backend: Arc<dyn Backend>,
    config: &CacheConfig,
) -> Result<Arc<dyn Backend>, BackendError> {
    let connect_timeout = config.connect_timeout();
    tokio::time::timeout(connect_timeout, backend.ping())
        .await
        .map_err(|_| BackendError::Timeout {
            op: "PING",
            after: connect_timeout,
        })??;
    Ok(backend)
}
