//! Remote-call accounting for backends.
//!
//! `MeteredBackend` wraps any [`Backend`] and counts every invocation in the
//! engine's [`Counters`], whether the call succeeds or fails. Each call also
//! emits a `tracing` event with its latency.
//!
//! # Example
//!
//! ```ignore
//! let counters = Arc::new(Counters::default());
//! let inner: Arc<dyn Backend> = Arc::new(InMemoryBackend::new());
//! let backend = MeteredBackend::new(inner, counters.clone());
//!
//! backend.get("t7_3:posts:1").await?;
//! assert_eq!(counters.remote_calls(), 1);
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use crate::error::BackendError;
use crate::stats::Counters;
use crate::store::{Backend, ServerInfo};

/// A backend wrapper that counts remote calls.
pub struct MeteredBackend {
    inner: Arc<dyn Backend>,
    counters: Arc<Counters>,
}

impl MeteredBackend {
    pub fn new(inner: Arc<dyn Backend>, counters: Arc<Counters>) -> Self {
        MeteredBackend { inner, counters }
    }

    fn start(&self) -> Instant {
        self.counters.record_remote_call();
        Instant::now()
    }

    fn observe<T>(
        &self,
        op: &'static str,
        start: Instant,
        result: Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(_) => tracing::trace!(backend = self.inner.name(), op, latency_ms, "remote call"),
            Err(e) => tracing::debug!(
                backend = self.inner.name(),
                op,
                latency_ms,
                error = %e,
                "remote call failed"
            ),
        }
        result
    }
}

#[async_trait]
impl Backend for MeteredBackend {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let start = self.start();
        let result = self.inner.ping().await;
        self.observe("PING", start, result)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let start = self.start();
        let result = self.inner.get(key).await;
        self.observe("GET", start, result)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, BackendError> {
        let start = self.start();
        let result = self.inner.get_many(keys).await;
        self.observe("MGET", start, result)
    }

    async fn set(&self, key: &str, value: &str, ttl: u64) -> Result<(), BackendError> {
        let start = self.start();
        let result = self.inner.set(key, value, ttl).await;
        self.observe("SET", start, result)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError> {
        let start = self.start();
        let result = self.inner.delete(keys).await;
        self.observe("DEL", start, result)
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let start = self.start();
        let result = self.inner.exists(key).await;
        self.observe("EXISTS", start, result)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, BackendError> {
        let start = self.start();
        let result = self.inner.incr_by(key, delta).await;
        self.observe("INCRBY", start, result)
    }

    async fn decr_by(&self, key: &str, delta: i64) -> Result<i64, BackendError> {
        let start = self.start();
        let result = self.inner.decr_by(key, delta).await;
        self.observe("DECRBY", start, result)
    }

    async fn hash_get(&self, hash_id: &str, field: &str) -> Result<Option<String>, BackendError> {
        let start = self.start();
        let result = self.inner.hash_get(hash_id, field).await;
        self.observe("HGET", start, result)
    }

    async fn hash_get_many(
        &self,
        hash_id: &str,
        fields: &[String],
    ) -> Result<Vec<Option<String>>, BackendError> {
        let start = self.start();
        let result = self.inner.hash_get_many(hash_id, fields).await;
        self.observe("HMGET", start, result)
    }

    async fn hash_set(&self, hash_id: &str, field: &str, value: &str) -> Result<(), BackendError> {
        let start = self.start();
        let result = self.inner.hash_set(hash_id, field, value).await;
        self.observe("HSET", start, result)
    }

    async fn hash_delete(&self, hash_id: &str, field: &str) -> Result<bool, BackendError> {
        let start = self.start();
        let result = self.inner.hash_delete(hash_id, field).await;
        self.observe("HDEL", start, result)
    }

    async fn hash_exists(&self, hash_id: &str, field: &str) -> Result<bool, BackendError> {
        let start = self.start();
        let result = self.inner.hash_exists(hash_id, field).await;
        self.observe("HEXISTS", start, result)
    }

    async fn hash_incr_by(
        &self,
        hash_id: &str,
        field: &str,
        delta: i64,
    ) -> Result<i64, BackendError> {
        let start = self.start();
        let result = self.inner.hash_incr_by(hash_id, field, delta).await;
        self.observe("HINCRBY", start, result)
    }

    async fn ttl(&self, key: &str) -> Result<i64, BackendError> {
        let start = self.start();
        let result = self.inner.ttl(key).await;
        self.observe("TTL", start, result)
    }

    async fn expire(&self, key: &str, ttl: u64) -> Result<bool, BackendError> {
        let start = self.start();
        let result = self.inner.expire(key, ttl).await;
        self.observe("EXPIRE", start, result)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), BackendError> {
        let start = self.start();
        let result = self.inner.scan(cursor, pattern, count).await;
        self.observe("SCAN", start, result)
    }

    async fn flush_db(&self) -> Result<(), BackendError> {
        let start = self.start();
        let result = self.inner.flush_db().await;
        self.observe("FLUSHDB", start, result)
    }

    async fn info(&self) -> Result<ServerInfo, BackendError> {
        let start = self.start();
        let result = self.inner.info().await;
        self.observe("INFO", start, result)
    }
}
