use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::BackendError;
use crate::store::{Backend, ServerInfo};
use crate::utils::glob_match;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_AN_INTEGER: &str = "value is not an integer or out of range";

#[derive(Debug, Clone)]
enum Slot {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct StoredSlot {
    slot: Slot,
    expires_at: Option<Instant>,
    /// Creation order; `SCAN` cursors walk this so deletes never skip keys.
    seq: u64,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, StoredSlot>,
    /// Added to the wall clock when checking expiry.
    offset: Duration,
    failing: bool,
    calls: Vec<String>,
    next_seq: u64,
}

impl State {
    fn now(&self) -> Instant {
        Instant::now() + self.offset
    }

    /// Deadline `ttl` seconds from now. Rejected like Redis rejects an
    /// out-of-range `EXPIRE`.
    fn deadline(&self, op: &'static str, ttl: u64) -> Result<Instant, BackendError> {
        self.now()
            .checked_add(Duration::from_secs(ttl))
            .ok_or_else(|| BackendError::command(op, "invalid expire time"))
    }

    /// The live entry under `key`, dropping it first if it has expired.
    fn live(&mut self, key: &str) -> Option<&mut StoredSlot> {
        let now = self.now();
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    /// Insert or overwrite a key. An overwritten key keeps its scan position.
    fn insert(&mut self, key: &str, slot: Slot, expires_at: Option<Instant>) {
        let seq = match self.live(key) {
            Some(existing) => existing.seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.entries.insert(
            key.to_owned(),
            StoredSlot {
                slot,
                expires_at,
                seq,
            },
        );
    }

    fn string(&mut self, key: &str, op: &'static str) -> Result<Option<&mut String>, BackendError> {
        match self.live(key) {
            None => Ok(None),
            Some(StoredSlot {
                slot: Slot::Str(value),
                ..
            }) => Ok(Some(value)),
            Some(_) => Err(BackendError::command(op, WRONGTYPE)),
        }
    }

    fn hash(
        &mut self,
        hash_id: &str,
        op: &'static str,
    ) -> Result<Option<&mut HashMap<String, String>>, BackendError> {
        match self.live(hash_id) {
            None => Ok(None),
            Some(StoredSlot {
                slot: Slot::Hash(fields),
                ..
            }) => Ok(Some(fields)),
            Some(_) => Err(BackendError::command(op, WRONGTYPE)),
        }
    }

    fn hash_or_create(
        &mut self,
        hash_id: &str,
        op: &'static str,
    ) -> Result<&mut HashMap<String, String>, BackendError> {
        if self.hash(hash_id, op)?.is_none() {
            self.insert(hash_id, Slot::Hash(HashMap::new()), None);
        }
        self.hash(hash_id, op)?
            .ok_or_else(|| BackendError::command(op, "hash vanished"))
    }

    fn purge_expired(&mut self) {
        let now = self.now();
        self.entries
            .retain(|_, e| e.expires_at.is_none_or(|at| at > now));
    }

    fn live_keys(&mut self) -> Vec<String> {
        self.purge_expired();
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

fn add_to(current: Option<&str>, delta: i64, op: &'static str) -> Result<i64, BackendError> {
    let current = match current {
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| BackendError::command(op, NOT_AN_INTEGER))?,
        None => 0,
    };
    current
        .checked_add(delta)
        .ok_or_else(|| BackendError::command(op, "increment or decrement would overflow"))
}

/// In-process [`Backend`] with Redis semantics.
///
/// Supports strings, hashes, TTLs and `SCAN` with glob patterns. Time can be
/// moved forward with [`advance`](Self::advance) to observe expiry without
/// sleeping, failures can be injected with
/// [`set_failing`](Self::set_failing), and every command is recorded in a
/// call log.
///
/// Suitable for tests and for running the engine without a server.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move this backend's clock forward.
    pub async fn advance(&self, by: Duration) {
        self.state.lock().await.offset += by;
    }

    /// When `true`, every command fails with a connection error.
    pub async fn set_failing(&self, failing: bool) {
        self.state.lock().await.failing = failing;
    }

    /// Commands received so far, as `"{COMMAND} {key}"`.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.state.lock().await.calls.len()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Sorted list of live keys. Not recorded in the call log.
    pub async fn keys(&self) -> Vec<String> {
        self.state.lock().await.live_keys()
    }

    /// Record a command and fail it if failures are injected.
    async fn begin(&self, op: &'static str, key: &str) -> Result<MutexGuard<'_, State>, BackendError> {
        let mut state = self.state.lock().await;
        state.calls.push(if key.is_empty() {
            op.to_owned()
        } else {
            format!("{op} {key}")
        });
        if state.failing {
            return Err(BackendError::Connection(format!("{op}: injected failure")));
        }
        Ok(state)
    }

    async fn add_to_string(
        &self,
        op: &'static str,
        key: &str,
        delta: i64,
    ) -> Result<i64, BackendError> {
        let mut state = self.begin(op, key).await?;
        if let Some(value) = state.string(key, op)? {
            let next = add_to(Some(value.as_str()), delta, op)?;
            *value = next.to_string();
            return Ok(next);
        }
        state.insert(key, Slot::Str(delta.to_string()), None);
        Ok(delta)
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.begin("PING", "").await.map(|_| ())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut state = self.begin("GET", key).await?;
        Ok(state.string(key, "GET")?.cloned())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, BackendError> {
        let mut state = self.begin("MGET", &keys.join(" ")).await?;
        Ok(keys
            .iter()
            .map(|key| state.string(key, "MGET").ok().flatten().cloned())
            .collect())
    }

    async fn set(&self, key: &str, value: &str, ttl: u64) -> Result<(), BackendError> {
        let op = if ttl > 0 { "SETEX" } else { "SET" };
        let mut state = self.begin(op, key).await?;
        let expires_at = match ttl {
            0 => None,
            ttl => Some(state.deadline(op, ttl)?),
        };
        state.insert(key, Slot::Str(value.to_owned()), expires_at);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError> {
        let mut state = self.begin("DEL", &keys.join(" ")).await?;
        let mut removed = 0;
        for key in keys {
            if state.live(key).is_some() {
                state.entries.remove(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let mut state = self.begin("EXISTS", key).await?;
        Ok(state.live(key).is_some())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, BackendError> {
        self.add_to_string("INCRBY", key, delta).await
    }

    async fn decr_by(&self, key: &str, delta: i64) -> Result<i64, BackendError> {
        self.add_to_string("DECRBY", key, delta.saturating_neg()).await
    }

    async fn hash_get(&self, hash_id: &str, field: &str) -> Result<Option<String>, BackendError> {
        let mut state = self.begin("HGET", &format!("{hash_id} {field}")).await?;
        Ok(state
            .hash(hash_id, "HGET")?
            .and_then(|fields| fields.get(field).cloned()))
    }

    async fn hash_get_many(
        &self,
        hash_id: &str,
        fields: &[String],
    ) -> Result<Vec<Option<String>>, BackendError> {
        let mut state = self
            .begin("HMGET", &format!("{hash_id} {}", fields.join(" ")))
            .await?;
        let hash = state.hash(hash_id, "HMGET")?;
        Ok(fields
            .iter()
            .map(|field| hash.as_ref().and_then(|h| h.get(field).cloned()))
            .collect())
    }

    async fn hash_set(&self, hash_id: &str, field: &str, value: &str) -> Result<(), BackendError> {
        let mut state = self.begin("HSET", &format!("{hash_id} {field}")).await?;
        state
            .hash_or_create(hash_id, "HSET")?
            .insert(field.to_owned(), value.to_owned());
        Ok(())
    }

    async fn hash_delete(&self, hash_id: &str, field: &str) -> Result<bool, BackendError> {
        let mut state = self.begin("HDEL", &format!("{hash_id} {field}")).await?;
        let Some(fields) = state.hash(hash_id, "HDEL")? else {
            return Ok(false);
        };
        let removed = fields.remove(field).is_some();
        if fields.is_empty() {
            state.entries.remove(hash_id);
        }
        Ok(removed)
    }

    async fn hash_exists(&self, hash_id: &str, field: &str) -> Result<bool, BackendError> {
        let mut state = self.begin("HEXISTS", &format!("{hash_id} {field}")).await?;
        Ok(state
            .hash(hash_id, "HEXISTS")?
            .is_some_and(|fields| fields.contains_key(field)))
    }

    async fn hash_incr_by(
        &self,
        hash_id: &str,
        field: &str,
        delta: i64,
    ) -> Result<i64, BackendError> {
        let mut state = self.begin("HINCRBY", &format!("{hash_id} {field}")).await?;
        let fields = state.hash_or_create(hash_id, "HINCRBY")?;
        let next = add_to(fields.get(field).map(String::as_str), delta, "HINCRBY")?;
        fields.insert(field.to_owned(), next.to_string());
        Ok(next)
    }

    async fn ttl(&self, key: &str) -> Result<i64, BackendError> {
        let mut state = self.begin("TTL", key).await?;
        let now = state.now();
        Ok(match state.live(key) {
            None => -2,
            Some(StoredSlot {
                expires_at: None, ..
            }) => -1,
            Some(StoredSlot {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(now);
                i64::try_from((remaining.as_millis() + 500) / 1000).unwrap_or(i64::MAX)
            }
        })
    }

    async fn expire(&self, key: &str, ttl: u64) -> Result<bool, BackendError> {
        let mut state = self.begin("EXPIRE", key).await?;
        let expires_at = match ttl {
            0 => None,
            ttl => Some(state.deadline("EXPIRE", ttl)?),
        };
        let Some(entry) = state.live(key) else {
            return Ok(false);
        };
        match expires_at {
            Some(at) => entry.expires_at = Some(at),
            None => {
                state.entries.remove(key);
            }
        }
        Ok(true)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), BackendError> {
        let mut state = self.begin("SCAN", pattern).await?;
        state.purge_expired();

        let mut page: Vec<(u64, &String)> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.seq >= cursor)
            .map(|(key, entry)| (entry.seq, key))
            .collect();
        page.sort_unstable();

        let count = count.max(1);
        let next = match page.get(count) {
            Some((seq, _)) => *seq,
            None => 0,
        };
        let matched = page
            .into_iter()
            .take(count)
            .filter(|(_, key)| glob_match(pattern, key))
            .map(|(_, key)| key.clone())
            .collect();
        Ok((next, matched))
    }

    async fn flush_db(&self) -> Result<(), BackendError> {
        let mut state = self.begin("FLUSHDB", "").await?;
        state.entries.clear();
        Ok(())
    }

    async fn info(&self) -> Result<ServerInfo, BackendError> {
        let mut state = self.begin("INFO", "").await?;
        let keys = state.live_keys().len();
        Ok(ServerInfo::parse(&format!(
            "# Server\r\nredis_version:in-memory\r\nuptime_in_seconds:0\r\n# Keyspace\r\nkeys:{keys}\r\n"
        )))
    }
}
