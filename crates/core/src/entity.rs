// SPDX-License-Identifier: MIT

//! In-memory snapshots of the entity tables.
//!
//! The relational row is the source of truth; these structs are copies
//! handed around between handlers, the retrieval manager and the
//! notification collector. Mutations visible to other connections must go
//! through a transactional write on the data store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Id;

/// Three-valued collection preference (sync/display/index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Tristate {
    True,
    False,
    #[default]
    Default,
}

impl Tristate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tristate::True => "TRUE",
            Tristate::False => "FALSE",
            Tristate::Default => "DEFAULT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TRUE" => Some(Tristate::True),
            "FALSE" => Some(Tristate::False),
            "DEFAULT" => Some(Tristate::Default),
            _ => None,
        }
    }
}

/// Per-collection payload caching rules, inheritable from the parent chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Use the parent's (or the global default) policy instead of this one.
    pub inherit: bool,
    /// Minutes between resource check intervals; -1 disables.
    pub check_interval: i32,
    /// Minutes until cached payloads may be evicted; -1 keeps forever.
    pub cache_timeout: i32,
    /// Fetch payloads only when a client asks for them.
    pub sync_on_demand: bool,
    /// Part types that are always kept locally (e.g. `ENVELOPE`).
    pub local_parts: Vec<String>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            inherit: true,
            check_interval: -1,
            cache_timeout: -1,
            sync_on_demand: false,
            local_parts: Vec::new(),
        }
    }
}

/// A hierarchical container of [`PimItem`]s. Forms a tree per resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: Id,
    /// None for resource top-level collections.
    pub parent_id: Option<Id>,
    pub resource_id: Id,
    pub name: String,
    /// Identifier assigned by the owning resource; opaque to the server.
    pub remote_id: String,
    pub remote_revision: String,
    /// Membership defined by a stored query instead of direct parenting.
    pub is_virtual: bool,
    pub enabled: bool,
    pub sync_pref: Tristate,
    pub display_pref: Tristate,
    pub index_pref: Tristate,
    /// Non-empty for persistent searches.
    pub query_string: String,
    pub query_attributes: String,
    /// Space-separated collection ids the query is scoped to.
    pub query_collections: String,
    pub query_language: String,
    pub cache_policy: CachePolicy,
}

impl Collection {
    /// True if this collection is defined by a stored query.
    pub fn is_persistent_search(&self) -> bool {
        !self.query_string.is_empty()
    }
}

/// One PIM object (mail, contact, event) with parts and flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PimItem {
    pub id: Id,
    /// Bumped on every payload or flag modification.
    pub rev: i32,
    pub remote_id: String,
    /// Globally unique identifier extracted from the payload, if any.
    pub gid: String,
    pub collection_id: Id,
    pub mime_type_id: Id,
    pub datetime: DateTime<Utc>,
    pub atime: DateTime<Utc>,
    pub size: i64,
    /// Local changes not yet reported to the owning resource.
    pub dirty: bool,
    /// Set only while an item awaits pre-processing.
    pub hidden: bool,
}

/// Namespaced payload fragment type, e.g. `PLD:RFC822` or `ATR:header`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartType {
    pub id: Id,
    pub ns: String,
    pub name: String,
}

impl PartType {
    /// Splits a fully-qualified part name (`NS:NAME`) into its components.
    /// Names without a namespace default to the payload namespace `PLD`.
    pub fn split_fq(fq: &str) -> (&str, &str) {
        match fq.split_once(':') {
            Some((ns, name)) => (ns, name),
            None => ("PLD", fq),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}:{}", self.ns, self.name)
    }
}

/// A named payload fragment of a [`PimItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: Id,
    pub pim_item_id: Id,
    pub part_type_id: Id,
    /// Payload bytes, or the bare external filename when `external` is set.
    /// `None` when the payload has been evicted from the cache.
    pub data: Option<Vec<u8>>,
    pub datasize: i64,
    /// Data lives as a file under the external payload directory.
    pub external: bool,
}

/// Message flag (`\Seen`, `\Flagged`, ...). Looked up by name, cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    pub id: Id,
    pub name: String,
}

/// Content type of items a collection may hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MimeType {
    pub id: Id,
    pub name: String,
}

/// A back-end process syncing a collection tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Id,
    pub name: String,
    pub is_virtual: bool,
}

/// User-visible label attached to items across collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Id,
    /// Globally unique identifier, stable across devices.
    pub gid: String,
    pub parent_id: Option<Id>,
    pub type_name: String,
}

/// Type of a directed item-to-item relation (e.g. `GENERIC`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationType {
    pub id: Id,
    pub name: String,
}

/// Directed typed link between two items. `(left, right, type)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub left_id: Id,
    pub right_id: Id,
    pub type_id: Id,
    pub remote_id: String,
}

#[cfg(test)]
#[path = "entity_tests.rs"]
mod tests;
