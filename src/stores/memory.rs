use serde_json::Value;
use std::collections::HashMap;

/// Process-local first-level cache keyed by `(group, key)`.
///
/// Values are owned: `set` takes the caller's value and `get` hands back a
/// clone, so a caller mutating what it got (or what it stored) can never
/// change the cached copy.
///
/// The layer has no notion of TTL. An entry lives until it is deleted, its
/// group is flushed or the layer is cleared.
#[derive(Debug, Default)]
pub struct MemoryLayer {
    groups: HashMap<String, HashMap<String, Value>>,
}

impl MemoryLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, group: &str, key: &str) -> Option<Value> {
        self.groups.get(group)?.get(key).cloned()
    }

    pub fn contains(&self, group: &str, key: &str) -> bool {
        self.groups
            .get(group)
            .is_some_and(|entries| entries.contains_key(key))
    }

    pub fn set(&mut self, group: &str, key: &str, value: Value) {
        self.groups
            .entry(group.to_owned())
            .or_default()
            .insert(key.to_owned(), value);
    }

    /// Remove one entry, returning whether it was present.
    pub fn delete(&mut self, group: &str, key: &str) -> bool {
        let Some(entries) = self.groups.get_mut(group) else {
            return false;
        };
        let removed = entries.remove(key).is_some();
        if entries.is_empty() {
            self.groups.remove(group);
        }
        removed
    }

    /// Drop every entry of one group.
    pub fn delete_group(&mut self, group: &str) {
        self.groups.remove(group);
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }

    /// Total number of entries across all groups.
    pub fn len(&self) -> usize {
        self.groups.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
