//! Remote key derivation.
//!
//! Standard groups map `(tenant, group, key)` to one top-level key:
//! `{prefix}{tenant}:{group}:{key}`. Hash-packed groups map the whole group to
//! one hash id, `{prefix}{tenant}:{group}`, with the logical key as the field.
//! Global groups drop the tenant segment.

use serde::Deserialize;
use std::fmt;

use crate::groups::GroupPolicy;
use crate::utils::escape_glob;

/// Identifies the logical sub-store sharing one physical backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "RawTenant")]
pub struct TenantId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTenant {
    Numeric(i64),
    Named(String),
}

impl From<RawTenant> for TenantId {
    fn from(raw: RawTenant) -> Self {
        match raw {
            RawTenant::Numeric(n) => TenantId(n.to_string()),
            RawTenant::Named(s) => TenantId(s),
        }
    }
}

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        TenantId("0".to_owned())
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for TenantId {
    fn from(id: u64) -> Self {
        TenantId(id.to_string())
    }
}

impl From<i64> for TenantId {
    fn from(id: i64) -> Self {
        TenantId(id.to_string())
    }
}

impl From<u32> for TenantId {
    fn from(id: u32) -> Self {
        TenantId(id.to_string())
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        TenantId(id.to_owned())
    }
}

impl From<String> for TenantId {
    fn from(id: String) -> Self {
        TenantId(id)
    }
}

/// Derives remote keys and hash ids from a fixed prefix.
///
/// The prefix is set once at construction; build a new engine to change it.
#[derive(Debug, Clone, Default)]
pub struct KeyNamespacer {
    prefix: String,
}

impl KeyNamespacer {
    pub fn new(prefix: impl Into<String>) -> Self {
        KeyNamespacer {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `{prefix}[{tenant}:]`
    fn scope(&self, tenant: &TenantId, policy: &GroupPolicy) -> String {
        if policy.global {
            self.prefix.clone()
        } else {
            format!("{}{}:", self.prefix, tenant)
        }
    }

    /// Remote key for a standard group entry.
    pub fn build_key(
        &self,
        tenant: &TenantId,
        group: &str,
        policy: &GroupPolicy,
        key: &str,
    ) -> String {
        format!("{}{}:{}", self.scope(tenant, policy), group, key)
    }

    /// Hash id holding every field of a hash-packed group.
    pub fn build_hash_id(&self, tenant: &TenantId, group: &str, policy: &GroupPolicy) -> String {
        format!("{}{}", self.scope(tenant, policy), group)
    }

    /// `SCAN MATCH` pattern covering every top-level key of a standard group.
    pub fn group_pattern(&self, tenant: &TenantId, group: &str, policy: &GroupPolicy) -> String {
        format!("{}:*", escape_glob(&self.build_hash_id(tenant, group, policy)))
    }

    /// `SCAN MATCH` pattern covering every key owned by one tenant,
    /// including the hash ids of its hash-packed groups.
    pub fn tenant_pattern(&self, tenant: &TenantId) -> String {
        format!("{}{}:*", escape_glob(&self.prefix), escape_glob(tenant.as_str()))
    }
}
