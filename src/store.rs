use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::BackendError;

/// A backend is the remote key-value store behind the memory layer.
///
/// It speaks in raw encoded strings; encoding and key derivation happen in the
/// engine. Implementations report every failure as a [`BackendError`] and the
/// engine decides what it means for the connection.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A name for logs.
    ///
    /// # Example
    /// - "redis"
    /// - "in-memory"
    fn name(&self) -> &'static str;

    /// Verify the backend is reachable.
    async fn ping(&self) -> Result<(), BackendError>;

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Fetch several keys in one round-trip (`MGET`). The result has one slot
    /// per requested key, in order.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, BackendError>;

    /// Store a value. `ttl` is in seconds; `0` means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: u64) -> Result<(), BackendError>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError>;

    async fn exists(&self, key: &str) -> Result<bool, BackendError>;

    /// Atomically add `delta` to an integer value, creating it at 0 if absent.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, BackendError>;

    async fn decr_by(&self, key: &str, delta: i64) -> Result<i64, BackendError> {
        self.incr_by(key, delta.saturating_neg()).await
    }

    async fn hash_get(&self, hash_id: &str, field: &str) -> Result<Option<String>, BackendError>;

    /// Fetch several fields of one hash in one round-trip (`HMGET`).
    async fn hash_get_many(
        &self,
        hash_id: &str,
        fields: &[String],
    ) -> Result<Vec<Option<String>>, BackendError>;

    async fn hash_set(&self, hash_id: &str, field: &str, value: &str) -> Result<(), BackendError>;

    /// Remove one field, returning whether it existed.
    async fn hash_delete(&self, hash_id: &str, field: &str) -> Result<bool, BackendError>;

    async fn hash_exists(&self, hash_id: &str, field: &str) -> Result<bool, BackendError>;

    async fn hash_incr_by(&self, hash_id: &str, field: &str, delta: i64)
    -> Result<i64, BackendError>;

    /// Remaining TTL in seconds. `-1` when the key has no expiry, `-2` when it
    /// does not exist.
    async fn ttl(&self, key: &str) -> Result<i64, BackendError>;

    /// Set a key's TTL, returning whether the key existed.
    async fn expire(&self, key: &str, ttl: u64) -> Result<bool, BackendError>;

    /// One `SCAN` step. Returns the next cursor (0 when the iteration is
    /// complete) and the keys matched in this step.
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), BackendError>;

    /// Remove every key in the selected database.
    async fn flush_db(&self) -> Result<(), BackendError>;

    async fn info(&self) -> Result<ServerInfo, BackendError>;
}

/// A subset of the server's `INFO` report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub version: Option<String>,
    pub used_memory_human: Option<String>,
    pub uptime_seconds: Option<u64>,
    /// Every `field:value` pair of the report.
    pub raw: HashMap<String, String>,
}

impl ServerInfo {
    /// Parse the text returned by `INFO`. Section headers and blank lines are
    /// skipped.
    pub fn parse(text: &str) -> Self {
        let raw: HashMap<String, String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once(':'))
            .map(|(field, value)| (field.to_owned(), value.to_owned()))
            .collect();

        ServerInfo {
            version: raw.get("redis_version").cloned(),
            used_memory_human: raw.get("used_memory_human").cloned(),
            uptime_seconds: raw.get("uptime_in_seconds").and_then(|v| v.parse().ok()),
            raw,
        }
    }
}
