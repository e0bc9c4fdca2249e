//! Counters, connection state and capability names exposed to statistics
//! consumers.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::store::ServerInfo;

/// Lifetime counters of one engine. Monotonic; never reset.
#[derive(Debug, Default)]
pub struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    remote_calls: AtomicU64,
}

impl Counters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_call(&self) {
        self.remote_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn remote_calls(&self) -> u64 {
        self.remote_calls.load(Ordering::Relaxed)
    }
}

/// Connection lifecycle of the engine's backend.
///
/// `Disconnected -> Connecting -> Connected -> Degraded`. Once degraded, the
/// backend stays unused until the engine is rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot for the statistics consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub remote_calls: u64,
    pub connection: ConnectionState,
}

impl CacheStats {
    /// Hits as a percentage of all lookups, rounded to one decimal.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        (self.hits as f64 / total as f64 * 1000.0).round() / 10.0
    }
}

/// Full diagnostic snapshot of an engine.
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub stats: CacheStats,
    pub hit_ratio: f64,
    pub backend: Option<&'static str>,
    pub prefix: String,
    pub tenant: String,
    pub database: i64,
    /// Entries currently held by the memory layer, across tenants.
    pub memory_entries: usize,
    /// Backend errors recorded during this engine's lifetime.
    pub errors: Vec<String>,
    pub non_persistent_groups: Vec<String>,
    pub global_groups: Vec<String>,
    pub hash_groups: Vec<String>,
    pub group_ttl: BTreeMap<String, u64>,
    /// Present only while connected and the server answered `INFO`.
    pub server: Option<ServerInfo>,
}

/// Optional operations a caller can check for with
/// [`ObjectCache::supports`](crate::ObjectCache::supports).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    AddMultiple,
    SetMultiple,
    GetMultiple,
    DeleteMultiple,
    FlushRuntime,
    FlushGroup,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::AddMultiple,
        Feature::SetMultiple,
        Feature::GetMultiple,
        Feature::DeleteMultiple,
        Feature::FlushRuntime,
        Feature::FlushGroup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::AddMultiple => "add_multiple",
            Feature::SetMultiple => "set_multiple",
            Feature::GetMultiple => "get_multiple",
            Feature::DeleteMultiple => "delete_multiple",
            Feature::FlushRuntime => "flush_runtime",
            Feature::FlushGroup => "flush_group",
        }
    }
}

impl FromStr for Feature {
    type Err = UnknownFeature;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .into_iter()
            .find(|feature| feature.as_str() == name)
            .ok_or_else(|| UnknownFeature(name.to_owned()))
    }
}

/// A feature name the engine does not recognize.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown cache feature: {0}")]
pub struct UnknownFeature(pub String);
