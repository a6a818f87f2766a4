// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! satchel-core: entity model and notification types for the satchel
//! PIM storage daemon.

pub mod entity;
pub mod notification;

pub use entity::{
    CachePolicy, Collection, Flag, MimeType, Part, PartType, PimItem, Relation, RelationType,
    Resource, Tag, Tristate,
};
pub use notification::{
    compress, EntityKind, ItemNotice, Notification, NotificationBatch, Operation,
};

/// Database primary key. All entity tables use 64-bit rowids.
pub type Id = i64;

/// Id of the search resource owning all persistent-search collections.
pub const SEARCH_RESOURCE_ID: Id = 1;

/// Id of the collection all persistent searches are parented under.
pub const SEARCH_ROOT_COLLECTION_ID: Id = 1;
