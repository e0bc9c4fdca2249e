use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::builder::ObjectCacheBuilder;
use crate::codec::{Serializer, counter_value};
use crate::config::CacheConfig;
use crate::error::BackendError;
use crate::groups::{GroupFlag, GroupPolicy, GroupRegistry, PolicyConfig, normalize_group};
use crate::namespace::{KeyNamespacer, TenantId};
use crate::stats::{CacheInfo, CacheStats, ConnectionState, Counters, Feature};
use crate::store::Backend;
use crate::stores::memory::MemoryLayer;
use crate::stores::metrics::MeteredBackend;

/// Largest TTL in seconds Redis accepts; its expiry in milliseconds must fit
/// in an `i64`.
const MAX_TTL_SECS: u64 = i64::MAX as u64 / 1000;

/// Mutable engine state. Guarded by one mutex for the whole
/// memory-then-backend sequence of each operation.
struct CacheState {
    memory: MemoryLayer,
    groups: GroupRegistry,
    tenant: TenantId,
    connection: ConnectionState,
    backend: Option<Arc<MeteredBackend>>,
    errors: Vec<String>,
}

impl CacheState {
    /// The backend, if it may be used.
    fn remote(&self) -> Option<Arc<MeteredBackend>> {
        match self.connection {
            ConnectionState::Connected => self.backend.clone(),
            _ => None,
        }
    }

    /// Record a failed backend call and stop using the backend.
    fn degrade(&mut self, key: &str, err: BackendError) {
        tracing::warn!(
            key,
            error = %err,
            connection_lost = err.is_connection(),
            "backend call failed, continuing memory-only"
        );
        self.errors.push(err.to_string());
        self.connection = ConnectionState::Degraded;
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

/// Two-tier object cache.
///
/// Every operation reads and writes the process-local memory layer first and
/// then, unless the group is non-persistent or the backend is unusable, the
/// remote backend. Backend failures never reach the caller: the engine moves
/// to [`ConnectionState::Degraded`] and keeps answering from memory.
///
/// An empty group name means `"default"`.
///
/// Memory entries are keyed by the tenant-scoped key, so after
/// [`switch_tenant`](Self::switch_tenant) the previous tenant's entries are
/// unreachable but not purged.
///
/// # Example
///
/// ```ignore
/// let cache = ObjectCache::connect(CacheConfig::load()?).await;
/// cache.add_global_groups(["users"]).await;
///
/// cache.set("post_1", json!({"title": "x"}), "posts", 300).await;
/// assert_eq!(cache.get("post_1", "posts", false).await, Some(json!({"title": "x"})));
/// ```
pub struct ObjectCache {
    state: Mutex<CacheState>,
    counters: Arc<Counters>,
    namespacer: KeyNamespacer,
    serializer: Serializer,
    max_ttl: u64,
    database: i64,
    dedicated_database: bool,
    scan_count: usize,
    scan_max_iterations: usize,
}

impl ObjectCache {
    /// Start building an engine from `config`.
    pub fn builder(config: CacheConfig) -> ObjectCacheBuilder {
        ObjectCacheBuilder::new(config)
    }

    /// Build an engine connected to the Redis server described by `config`.
    ///
    /// Never fails: if the connection cannot be established the engine runs
    /// memory-only.
    pub async fn connect(config: CacheConfig) -> Self {
        Self::builder(config).build().await
    }

    pub(crate) fn from_parts(
        config: &CacheConfig,
        groups: GroupRegistry,
        counters: Arc<Counters>,
        connection: ConnectionState,
    ) -> Self {
        ObjectCache {
            state: Mutex::new(CacheState {
                memory: MemoryLayer::new(),
                groups,
                tenant: config.tenant.clone(),
                connection,
                backend: None,
                errors: Vec::new(),
            }),
            counters,
            namespacer: KeyNamespacer::new(config.prefix.clone()),
            serializer: config.serializer,
            max_ttl: config.max_ttl,
            database: config.database,
            dedicated_database: config.is_dedicated_database(),
            scan_count: config.scan_count,
            scan_max_iterations: config.scan_max_iterations,
        }
    }

    /// Finish the `Connecting` phase with the outcome of the connection
    /// attempt.
    pub(crate) async fn attach(&self, outcome: Result<Arc<dyn Backend>, BackendError>) {
        let mut state = self.state.lock().await;
        match outcome {
            Ok(backend) => {
                tracing::debug!(backend = backend.name(), "backend attached");
                state.backend = Some(Arc::new(MeteredBackend::new(
                    backend,
                    self.counters.clone(),
                )));
                state.connection = ConnectionState::Connected;
            }
            Err(err) => {
                tracing::warn!(error = %err, "backend unavailable, running memory-only");
                state.errors.push(err.to_string());
                state.connection = ConnectionState::Disconnected;
            }
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Look up one value.
    ///
    /// With `force`, the memory layer is bypassed and the backend consulted
    /// directly.
    pub async fn get(&self, key: &str, group: &str, force: bool) -> Option<Value> {
        let mut state = self.state.lock().await;
        self.get_locked(&mut state, key, normalize_group(group), force)
            .await
    }

    /// Look up one value and deserialize it into `T`.
    ///
    /// A value that does not fit `T` is reported as `None`.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str, group: &str) -> Option<T> {
        let value = self.get(key, group, false).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                tracing::warn!(key, group, error = %e, "cached value has an unexpected shape");
                None
            }
        }
    }

    /// Look up several keys of one group with at most one backend round-trip.
    ///
    /// Results follow the order of `keys`; a repeated key is answered once, at
    /// its first position.
    pub async fn get_multiple<K: AsRef<str>>(
        &self,
        keys: &[K],
        group: &str,
        force: bool,
    ) -> Vec<(String, Option<Value>)> {
        let group = normalize_group(group);
        let mut seen = HashSet::new();
        let order: Vec<&str> = keys
            .iter()
            .map(|key| key.as_ref())
            .filter(|key| seen.insert(*key))
            .collect();

        let mut guard = self.state.lock().await;
        let mut found = self.get_multiple_locked(&mut guard, &order, group, force).await;

        order
            .into_iter()
            .map(|key| {
                let value = found.remove(key).flatten();
                (key.to_owned(), value)
            })
            .collect()
    }

    async fn get_multiple_locked(
        &self,
        state: &mut CacheState,
        keys: &[&str],
        group: &str,
        force: bool,
    ) -> HashMap<String, Option<Value>> {
        let policy = state.groups.classify(group);

        let mut found = HashMap::with_capacity(keys.len());
        let mut pending: Vec<String> = Vec::new();
        let mut pending_scoped: Vec<String> = Vec::new();

        for &key in keys {
            let scoped = self.namespacer.build_key(&state.tenant, group, &policy, key);
            if !force && let Some(value) = state.memory.get(group, &scoped) {
                self.counters.record_hit();
                found.insert(key.to_owned(), Some(value));
            } else {
                pending.push(key.to_owned());
                pending_scoped.push(scoped);
            }
        }

        if pending.is_empty() {
            return found;
        }

        let remote = if policy.non_persistent {
            None
        } else {
            state.remote()
        };
        let Some(backend) = remote else {
            for key in pending {
                self.counters.record_miss();
                found.insert(key, None);
            }
            return found;
        };

        let fetched = if policy.hash_packed {
            let hash_id = self.namespacer.build_hash_id(&state.tenant, group, &policy);
            backend.hash_get_many(&hash_id, &pending).await
        } else {
            backend.get_many(&pending_scoped).await
        };

        let raw_values = match fetched {
            Ok(values) => values,
            Err(err) => {
                state.degrade(group, err);
                vec![None; pending.len()]
            }
        };

        for ((key, scoped), raw) in pending.into_iter().zip(pending_scoped).zip(raw_values) {
            let value = raw.and_then(|raw| self.decode(&key, group, &raw));
            match value {
                Some(value) => {
                    self.counters.record_hit();
                    state.memory.set(group, &scoped, value.clone());
                    found.insert(key, Some(value));
                }
                None => {
                    self.counters.record_miss();
                    found.insert(key, None);
                }
            }
        }

        found
    }

    /// Whether a key is cached, in memory or remotely. Does not populate the
    /// memory layer or touch the hit/miss counters.
    pub async fn exists(&self, key: &str, group: &str) -> bool {
        let mut state = self.state.lock().await;
        self.exists_locked(&mut state, key, normalize_group(group))
            .await
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Store a value. `ttl` is in seconds; `0` falls back to the group's TTL
    /// override or no expiry.
    ///
    /// Always succeeds once the value is in the memory layer, even if the
    /// backend write fails.
    pub async fn set(&self, key: &str, value: Value, group: &str, ttl: u64) -> bool {
        let mut state = self.state.lock().await;
        self.set_locked(&mut state, key, value, normalize_group(group), ttl)
            .await
    }

    /// Serialize `value` and store it.
    pub async fn set_as<T: Serialize>(&self, key: &str, value: &T, group: &str, ttl: u64) -> bool {
        match serde_json::to_value(value) {
            Ok(value) => self.set(key, value, group, ttl).await,
            Err(e) => {
                tracing::warn!(key, group, error = %e, "value cannot be cached");
                false
            }
        }
    }

    /// Store a value only if the key does not exist yet.
    pub async fn add(&self, key: &str, value: Value, group: &str, ttl: u64) -> bool {
        let group = normalize_group(group);
        let mut state = self.state.lock().await;
        self.add_locked(&mut state, key, value, group, ttl).await
    }

    /// Store a value only if the key already exists.
    pub async fn replace(&self, key: &str, value: Value, group: &str, ttl: u64) -> bool {
        let group = normalize_group(group);
        let mut state = self.state.lock().await;
        if !self.exists_locked(&mut state, key, group).await {
            return false;
        }
        self.set_locked(&mut state, key, value, group, ttl).await
    }

    /// Remove a key. Returns `true` once it is gone from the memory layer.
    pub async fn delete(&self, key: &str, group: &str) -> bool {
        let mut state = self.state.lock().await;
        self.delete_locked(&mut state, key, normalize_group(group))
            .await
    }

    /// Store several values of one group, reporting the outcome per key.
    pub async fn set_multiple<I, K>(&self, items: I, group: &str, ttl: u64) -> HashMap<String, bool>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let group = normalize_group(group);
        let mut state = self.state.lock().await;
        let mut results = HashMap::new();
        for (key, value) in items {
            let key = key.into();
            let stored = self.set_locked(&mut state, &key, value, group, ttl).await;
            results.insert(key, stored);
        }
        results
    }

    /// Add several values of one group, reporting the outcome per key.
    pub async fn add_multiple<I, K>(&self, items: I, group: &str, ttl: u64) -> HashMap<String, bool>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let group = normalize_group(group);
        let mut state = self.state.lock().await;
        let mut results = HashMap::new();
        for (key, value) in items {
            let key = key.into();
            let added = self.add_locked(&mut state, &key, value, group, ttl).await;
            results.insert(key, added);
        }
        results
    }

    /// Delete several keys of one group, reporting the outcome per key.
    pub async fn delete_multiple<K: AsRef<str>>(
        &self,
        keys: &[K],
        group: &str,
    ) -> HashMap<String, bool> {
        let group = normalize_group(group);
        let mut state = self.state.lock().await;
        let mut results = HashMap::new();
        for key in keys {
            let key = key.as_ref();
            let deleted = self.delete_locked(&mut state, key, group).await;
            results.insert(key.to_owned(), deleted);
        }
        results
    }

    /// Add `offset` to an integer value. Returns `None` if the key is absent.
    ///
    /// The result never drops below zero.
    pub async fn incr(&self, key: &str, offset: i64, group: &str) -> Option<i64> {
        let mut state = self.state.lock().await;
        self.adjust_locked(&mut state, key, offset, normalize_group(group), Direction::Up)
            .await
    }

    /// Subtract `offset` from an integer value, clamping at zero. Returns
    /// `None` if the key is absent.
    pub async fn decr(&self, key: &str, offset: i64, group: &str) -> Option<i64> {
        let mut state = self.state.lock().await;
        self.adjust_locked(&mut state, key, offset, normalize_group(group), Direction::Down)
            .await
    }

    // ========================================================================
    // Flushing
    // ========================================================================

    /// Drop everything this tenant can see.
    ///
    /// Clears the memory layer. With a dedicated database the whole database
    /// is flushed; otherwise the tenant's keys and the global groups' keys are
    /// found with `SCAN` and deleted, so other tenants sharing the database
    /// keep their data. Returns `false` if the backend part failed.
    pub async fn flush(&self) -> bool {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.memory.clear();

        let Some(backend) = state.remote() else {
            return true;
        };

        let result = if self.dedicated_database {
            backend.flush_db().await
        } else {
            self.flush_shared(state, &backend).await
        };

        match result {
            Ok(()) => {
                tracing::info!(tenant = %state.tenant, "cache flushed");
                true
            }
            Err(err) => {
                state.degrade("flush", err);
                false
            }
        }
    }

    async fn flush_shared(
        &self,
        state: &CacheState,
        backend: &MeteredBackend,
    ) -> Result<(), BackendError> {
        let removed = self
            .scan_delete(backend, &self.namespacer.tenant_pattern(&state.tenant))
            .await?;
        tracing::debug!(tenant = %state.tenant, removed, "tenant keys flushed");

        for group in state.groups.groups_with(GroupFlag::Global) {
            let policy = state.groups.classify(&group);
            if !policy.non_persistent {
                self.flush_remote_group(state, backend, &group, &policy).await?;
            }
        }
        Ok(())
    }

    /// Drop every entry of one group. Returns `false` for an empty group name
    /// or if the backend part failed.
    ///
    /// The memory layer loses the group for every tenant; the backend only for
    /// the current one.
    pub async fn flush_group(&self, group: &str) -> bool {
        if group.is_empty() {
            return false;
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.memory.delete_group(group);

        let policy = state.groups.classify(group);
        if policy.non_persistent {
            return true;
        }
        let Some(backend) = state.remote() else {
            return true;
        };

        match self.flush_remote_group(state, &backend, group, &policy).await {
            Ok(()) => true,
            Err(err) => {
                state.degrade(group, err);
                false
            }
        }
    }

    async fn flush_remote_group(
        &self,
        state: &CacheState,
        backend: &MeteredBackend,
        group: &str,
        policy: &GroupPolicy,
    ) -> Result<(), BackendError> {
        if policy.hash_packed {
            let hash_id = self.namespacer.build_hash_id(&state.tenant, group, policy);
            backend.delete(&[hash_id]).await?;
        } else {
            let pattern = self.namespacer.group_pattern(&state.tenant, group, policy);
            let removed = self.scan_delete(backend, &pattern).await?;
            tracing::debug!(group, removed, "group keys flushed");
        }
        Ok(())
    }

    /// Clear the memory layer only.
    pub async fn flush_runtime(&self) -> bool {
        self.state.lock().await.memory.clear();
        true
    }

    /// Delete every key matching `pattern`, one `SCAN` page at a time.
    ///
    /// Stops when the cursor returns to 0. `scan_max_iterations` bounds the
    /// number of pages as a safety net; hitting it leaves keys behind.
    async fn scan_delete(&self, backend: &MeteredBackend, pattern: &str) -> Result<u64, BackendError> {
        let mut cursor = 0;
        let mut removed = 0;

        for _ in 0..self.scan_max_iterations {
            let (next, keys) = backend.scan(cursor, pattern, self.scan_count).await?;
            if !keys.is_empty() {
                removed += backend.delete(&keys).await?;
            }
            if next == 0 {
                return Ok(removed);
            }
            cursor = next;
        }

        tracing::warn!(
            pattern,
            iterations = self.scan_max_iterations,
            "scan iteration cap reached before the cursor was exhausted"
        );
        Ok(removed)
    }

    // ========================================================================
    // Context and policies
    // ========================================================================

    /// Change the tenant used for subsequent operations. Memory entries of the
    /// previous tenant are kept.
    pub async fn switch_tenant(&self, tenant: impl Into<TenantId>) {
        let tenant = tenant.into();
        let mut state = self.state.lock().await;
        tracing::debug!(from = %state.tenant, to = %tenant, "switching tenant");
        state.tenant = tenant;
    }

    pub async fn tenant(&self) -> TenantId {
        self.state.lock().await.tenant.clone()
    }

    /// Stop using the backend. Later operations are memory-only.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.backend.take().is_some() {
            tracing::info!("backend connection closed");
        }
        state.connection = ConnectionState::Disconnected;
    }

    pub async fn add_non_persistent_groups<I, S>(&self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        state.groups.register(groups, GroupFlag::NonPersistent);
    }

    pub async fn add_global_groups<I, S>(&self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        state.groups.register(groups, GroupFlag::Global);
    }

    pub async fn add_hash_groups<I, S>(&self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        state.groups.register(groups, GroupFlag::HashPacked);
    }

    /// Set per-group TTL overrides in seconds. `0` clears an override.
    pub async fn set_group_ttl<I, S>(&self, ttls: I)
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        state.groups.set_ttl(ttls);
    }

    /// Apply a whole policy configuration. Idempotent.
    pub async fn apply_policies(&self, policies: &PolicyConfig) {
        let mut state = self.state.lock().await;
        policies.apply_to(&mut state.groups);
    }

    /// The classification of one group.
    pub async fn group_policy(&self, group: &str) -> GroupPolicy {
        self.state
            .lock()
            .await
            .groups
            .classify(normalize_group(group))
    }

    // ========================================================================
    // Observability
    // ========================================================================

    pub fn hits(&self) -> u64 {
        self.counters.hits()
    }

    pub fn misses(&self) -> u64 {
        self.counters.misses()
    }

    pub fn remote_calls(&self) -> u64 {
        self.counters.remote_calls()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.state.lock().await.connection
    }

    pub async fn stats(&self) -> CacheStats {
        let connection = self.connection_state().await;
        CacheStats {
            hits: self.counters.hits(),
            misses: self.counters.misses(),
            remote_calls: self.counters.remote_calls(),
            connection,
        }
    }

    /// Diagnostic snapshot. Queries the server's `INFO` while connected; a
    /// failure there is ignored.
    pub async fn info(&self) -> CacheInfo {
        let state = self.state.lock().await;

        let server = match state.remote() {
            Some(backend) => backend.info().await.ok(),
            None => None,
        };

        let stats = CacheStats {
            hits: self.counters.hits(),
            misses: self.counters.misses(),
            remote_calls: self.counters.remote_calls(),
            connection: state.connection,
        };

        CacheInfo {
            hit_ratio: stats.hit_ratio(),
            stats,
            backend: state.backend.as_ref().map(|b| b.name()),
            prefix: self.namespacer.prefix().to_owned(),
            tenant: state.tenant.to_string(),
            database: self.database,
            memory_entries: state.memory.len(),
            errors: state.errors.clone(),
            non_persistent_groups: state.groups.groups_with(GroupFlag::NonPersistent),
            global_groups: state.groups.groups_with(GroupFlag::Global),
            hash_groups: state.groups.groups_with(GroupFlag::HashPacked),
            group_ttl: state.groups.ttl_overrides(),
            server,
        }
    }

    /// Whether the optional operation `feature` is available.
    pub fn supports(&self, feature: &str) -> bool {
        feature.parse::<Feature>().is_ok()
    }

    // ========================================================================
    // Locked implementations
    // ========================================================================

    async fn get_locked(
        &self,
        state: &mut CacheState,
        key: &str,
        group: &str,
        force: bool,
    ) -> Option<Value> {
        let policy = state.groups.classify(group);
        let scoped = self.namespacer.build_key(&state.tenant, group, &policy, key);

        if !force && let Some(value) = state.memory.get(group, &scoped) {
            self.counters.record_hit();
            tracing::debug!(key, group, "memory hit");
            return Some(value);
        }

        let remote = if policy.non_persistent {
            None
        } else {
            state.remote()
        };
        let Some(backend) = remote else {
            self.counters.record_miss();
            return None;
        };

        let fetched = if policy.hash_packed {
            let hash_id = self.namespacer.build_hash_id(&state.tenant, group, &policy);
            backend.hash_get(&hash_id, key).await
        } else {
            backend.get(&scoped).await
        };

        let value = match fetched {
            Ok(raw) => raw.and_then(|raw| self.decode(key, group, &raw)),
            Err(err) => {
                state.degrade(key, err);
                None
            }
        };

        match value {
            Some(value) => {
                self.counters.record_hit();
                tracing::debug!(key, group, "remote hit");
                state.memory.set(group, &scoped, value.clone());
                Some(value)
            }
            None => {
                self.counters.record_miss();
                tracing::debug!(key, group, "miss");
                None
            }
        }
    }

    async fn exists_locked(&self, state: &mut CacheState, key: &str, group: &str) -> bool {
        let policy = state.groups.classify(group);
        let scoped = self.namespacer.build_key(&state.tenant, group, &policy, key);
        if state.memory.contains(group, &scoped) {
            return true;
        }

        if policy.non_persistent {
            return false;
        }
        let Some(backend) = state.remote() else {
            return false;
        };

        let result = if policy.hash_packed {
            let hash_id = self.namespacer.build_hash_id(&state.tenant, group, &policy);
            backend.hash_exists(&hash_id, key).await
        } else {
            backend.exists(&scoped).await
        };

        result.unwrap_or_else(|err| {
            state.degrade(key, err);
            false
        })
    }

    async fn set_locked(
        &self,
        state: &mut CacheState,
        key: &str,
        value: Value,
        group: &str,
        ttl: u64,
    ) -> bool {
        let policy = state.groups.classify(group);
        let scoped = self.namespacer.build_key(&state.tenant, group, &policy, key);
        let remote = if policy.non_persistent {
            None
        } else {
            state.remote()
        };

        let encoded = match &remote {
            Some(_) => match self.serializer.encode(&value) {
                Ok(encoded) => Some(encoded),
                Err(e) => {
                    tracing::warn!(key, group, error = %e, "value kept in memory only");
                    None
                }
            },
            None => None,
        };
        state.memory.set(group, &scoped, value);

        let (Some(backend), Some(encoded)) = (remote, encoded) else {
            return true;
        };

        let ttl = self.effective_ttl(ttl, &policy);
        let result = if policy.hash_packed {
            let hash_id = self.namespacer.build_hash_id(&state.tenant, group, &policy);
            self.write_hash_field(&backend, &hash_id, key, &encoded, ttl)
                .await
        } else {
            backend.set(&scoped, &encoded, ttl).await
        };

        if let Err(err) = result {
            state.degrade(key, err);
        }
        true
    }

    /// Write one field of a hash-packed group and extend the hash's TTL.
    ///
    /// The TTL is only ever raised: a hash without expiry (or with a shorter
    /// one) gets `ttl`, a hash that already lives longer keeps its TTL.
    async fn write_hash_field(
        &self,
        backend: &MeteredBackend,
        hash_id: &str,
        field: &str,
        encoded: &str,
        ttl: u64,
    ) -> Result<(), BackendError> {
        backend.hash_set(hash_id, field, encoded).await?;
        if ttl == 0 {
            return Ok(());
        }

        let current = backend.ttl(hash_id).await?;
        let ttl_as_i64 = i64::try_from(ttl).unwrap_or(i64::MAX);
        if current < 0 || current < ttl_as_i64 {
            backend.expire(hash_id, ttl).await?;
        }
        Ok(())
    }

    async fn add_locked(
        &self,
        state: &mut CacheState,
        key: &str,
        value: Value,
        group: &str,
        ttl: u64,
    ) -> bool {
        if self.exists_locked(state, key, group).await {
            return false;
        }
        self.set_locked(state, key, value, group, ttl).await
    }

    async fn delete_locked(&self, state: &mut CacheState, key: &str, group: &str) -> bool {
        let policy = state.groups.classify(group);
        let scoped = self.namespacer.build_key(&state.tenant, group, &policy, key);
        state.memory.delete(group, &scoped);

        if policy.non_persistent {
            return true;
        }
        let Some(backend) = state.remote() else {
            return true;
        };

        let result = if policy.hash_packed {
            let hash_id = self.namespacer.build_hash_id(&state.tenant, group, &policy);
            backend.hash_delete(&hash_id, key).await.map(|_| ())
        } else {
            backend.delete(&[scoped]).await.map(|_| ())
        };

        if let Err(err) = result {
            state.degrade(key, err);
        }
        true
    }

    async fn adjust_locked(
        &self,
        state: &mut CacheState,
        key: &str,
        offset: i64,
        group: &str,
        direction: Direction,
    ) -> Option<i64> {
        let current = self.get_locked(state, key, group, false).await?;
        let delta = match direction {
            Direction::Up => offset,
            Direction::Down => offset.saturating_neg(),
        };
        let local = counter_value(&current).saturating_add(delta).max(0);
        let policy = state.groups.classify(group);
        let scoped = self.namespacer.build_key(&state.tenant, group, &policy, key);
        state.memory.set(group, &scoped, Value::from(local));

        if policy.non_persistent {
            return Some(local);
        }
        let Some(backend) = state.remote() else {
            return Some(local);
        };

        match self
            .adjust_remote(state, &backend, key, group, &policy, offset, direction)
            .await
        {
            Ok(remote) => {
                state.memory.set(group, &scoped, Value::from(remote));
                Some(remote)
            }
            Err(err) => {
                state.degrade(key, err);
                Some(local)
            }
        }
    }

    /// Apply the offset with the backend's atomic increment, clamping a
    /// negative result back to zero.
    #[allow(clippy::too_many_arguments)]
    async fn adjust_remote(
        &self,
        state: &CacheState,
        backend: &MeteredBackend,
        key: &str,
        group: &str,
        policy: &GroupPolicy,
        offset: i64,
        direction: Direction,
    ) -> Result<i64, BackendError> {
        if policy.hash_packed {
            let hash_id = self.namespacer.build_hash_id(&state.tenant, group, policy);
            let delta = match direction {
                Direction::Up => offset,
                Direction::Down => offset.saturating_neg(),
            };
            let value = backend.hash_incr_by(&hash_id, key, delta).await?;
            if value < 0 {
                backend.hash_set(&hash_id, key, "0").await?;
                return Ok(0);
            }
            return Ok(value);
        }

        let remote_key = self.namespacer.build_key(&state.tenant, group, policy, key);
        let value = match direction {
            Direction::Up => backend.incr_by(&remote_key, offset).await?,
            Direction::Down => backend.decr_by(&remote_key, offset).await?,
        };
        if value < 0 {
            backend
                .set(&remote_key, "0", self.effective_ttl(0, policy))
                .await?;
            return Ok(0);
        }
        Ok(value)
    }

    /// TTL for a write: the explicit TTL if positive, else the group's
    /// override, else none; then capped by `max_ttl`, which also applies to
    /// writes that would otherwise never expire, and by the largest TTL the
    /// backend accepts.
    fn effective_ttl(&self, requested: u64, policy: &GroupPolicy) -> u64 {
        let ttl = if requested > 0 {
            requested
        } else {
            policy.ttl.unwrap_or(0)
        };
        let ttl = if self.max_ttl > 0 && (ttl == 0 || ttl > self.max_ttl) {
            self.max_ttl
        } else {
            ttl
        };
        ttl.min(MAX_TTL_SECS)
    }

    fn decode(&self, key: &str, group: &str, raw: &str) -> Option<Value> {
        match self.serializer.decode(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, group, error = %e, "undecodable remote value treated as a miss");
                None
            }
        }
    }
}
