//! Group policy registry.
//!
//! Every cache group carries three independent policy bits plus an optional
//! TTL override. Unknown groups classify as all-false with no override.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Name used when a caller passes an empty group.
pub const DEFAULT_GROUP: &str = "default";

/// Normalize an empty group name to [`DEFAULT_GROUP`].
pub fn normalize_group(group: &str) -> &str {
    if group.is_empty() { DEFAULT_GROUP } else { group }
}

/// A policy bit that can be attached to a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupFlag {
    /// Memory layer only; never written to or read from the backend.
    NonPersistent,
    /// Shared across all tenants (no tenant segment in the remote key).
    Global,
    /// Logical keys are packed as fields of a single remote hash.
    HashPacked,
}

/// The classification of one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupPolicy {
    pub non_persistent: bool,
    pub global: bool,
    pub hash_packed: bool,
    /// TTL override in seconds. `None` means use the per-call TTL or no expiry.
    pub ttl: Option<u64>,
}

impl GroupPolicy {
    fn has(&self, flag: GroupFlag) -> bool {
        match flag {
            GroupFlag::NonPersistent => self.non_persistent,
            GroupFlag::Global => self.global,
            GroupFlag::HashPacked => self.hash_packed,
        }
    }

    fn set(&mut self, flag: GroupFlag) {
        match flag {
            GroupFlag::NonPersistent => self.non_persistent = true,
            GroupFlag::Global => self.global = true,
            GroupFlag::HashPacked => self.hash_packed = true,
        }
    }
}

/// Registry of group policies.
///
/// Policies only accumulate; nothing is removed except a TTL override reset
/// to zero.
#[derive(Debug, Clone, Default)]
pub struct GroupRegistry {
    policies: HashMap<String, GroupPolicy>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every group in `groups` with `flag`. Idempotent.
    pub fn register<I, S>(&mut self, groups: I, flag: GroupFlag)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for group in groups {
            self.policies.entry(group.into()).or_default().set(flag);
        }
    }

    /// Store per-group TTL overrides. A value of `0` clears the override.
    pub fn set_ttl<I, S>(&mut self, ttls: I)
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        for (group, seconds) in ttls {
            let policy = self.policies.entry(group.into()).or_default();
            policy.ttl = (seconds > 0).then_some(seconds);
        }
    }

    /// Classify a group. Never fails.
    pub fn classify(&self, group: &str) -> GroupPolicy {
        self.policies.get(group).copied().unwrap_or_default()
    }

    /// Sorted names of all groups carrying `flag`.
    pub fn groups_with(&self, flag: GroupFlag) -> Vec<String> {
        let mut groups: Vec<String> = self
            .policies
            .iter()
            .filter(|(_, policy)| policy.has(flag))
            .map(|(name, _)| name.clone())
            .collect();
        groups.sort();
        groups
    }

    /// All active TTL overrides.
    pub fn ttl_overrides(&self) -> BTreeMap<String, u64> {
        self.policies
            .iter()
            .filter_map(|(name, policy)| policy.ttl.map(|ttl| (name.clone(), ttl)))
            .collect()
    }
}

/// Group policy lists as supplied by the host at startup.
///
/// Applying the same `PolicyConfig` twice leaves the registry unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub non_persistent_groups: Vec<String>,
    pub global_groups: Vec<String>,
    pub hash_groups: Vec<String>,
    pub group_ttl: BTreeMap<String, u64>,
}

impl PolicyConfig {
    /// Build a policy config from the newline-delimited textual form the
    /// host's settings store keeps (one group per line, `group:seconds` for
    /// TTLs).
    pub fn from_text(non_persistent: &str, global: &str, hash: &str, ttl: &str) -> Self {
        PolicyConfig {
            non_persistent_groups: parse_groups(non_persistent),
            global_groups: parse_groups(global),
            hash_groups: parse_groups(hash),
            group_ttl: parse_ttl(ttl),
        }
    }

    /// Apply every list to a registry.
    pub fn apply_to(&self, registry: &mut GroupRegistry) {
        registry.register(self.non_persistent_groups.iter().cloned(), GroupFlag::NonPersistent);
        registry.register(self.global_groups.iter().cloned(), GroupFlag::Global);
        registry.register(self.hash_groups.iter().cloned(), GroupFlag::HashPacked);
        registry.set_ttl(self.group_ttl.iter().map(|(g, s)| (g.clone(), *s)));
    }
}

/// Parse one group name per line; blank lines are dropped.
pub fn parse_groups(input: &str) -> Vec<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parse `group:seconds` lines. Lines without a colon, with an empty group or
/// with a non-positive duration are dropped.
pub fn parse_ttl(input: &str) -> BTreeMap<String, u64> {
    input
        .lines()
        .filter_map(|line| line.split_once(':'))
        .filter_map(|(group, seconds)| {
            let group = group.trim();
            let seconds = seconds.trim().parse::<i64>().ok()?;
            (!group.is_empty() && seconds > 0).then(|| (group.to_owned(), seconds as u64))
        })
        .collect()
}
