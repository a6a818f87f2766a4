// SPDX-License-Identifier: MIT

//! Change notification model.
//!
//! Handlers record intent into a collector while their transaction runs;
//! the collector compresses the recorded notifications and hands them to
//! the bus as one [`NotificationBatch`] when the transaction commits.
//! Rolled-back transactions emit nothing.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::Id;

/// What kind of entity a notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Items,
    Collections,
    Tags,
    Relations,
}

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Add,
    Modify,
    Remove,
    /// Tag membership of an item changed; the part set carries the delta.
    ModifyTags,
    /// Relations of an item changed; the part set carries the delta.
    ModifyRelations,
}

/// Identifying fields of an item carried inside a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ItemNotice {
    pub id: Id,
    pub remote_id: String,
    pub mime_type: String,
}

/// One entity change. Fields not known at record time are completed by the
/// collector at flush time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    Item {
        op: Operation,
        item: ItemNotice,
        /// Parent collection at the time of the change.
        collection: Id,
        resource: String,
        /// Changed part names, or tag/relation delta descriptors.
        parts: BTreeSet<String>,
    },
    Collection {
        op: Operation,
        id: Id,
        name: String,
        resource: String,
        parts: BTreeSet<String>,
    },
    Tag {
        op: Operation,
        id: Id,
    },
    Relation {
        op: Operation,
        left: Id,
        right: Id,
        type_name: String,
        remote_id: String,
    },
}

impl Notification {
    pub fn kind(&self) -> EntityKind {
        match self {
            Notification::Item { .. } => EntityKind::Items,
            Notification::Collection { .. } => EntityKind::Collections,
            Notification::Tag { .. } => EntityKind::Tags,
            Notification::Relation { .. } => EntityKind::Relations,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Notification::Item { op, .. }
            | Notification::Collection { op, .. }
            | Notification::Tag { op, .. }
            | Notification::Relation { op, .. } => *op,
        }
    }

    /// Resource name the change belongs to, if carried.
    pub fn resource(&self) -> Option<&str> {
        match self {
            Notification::Item { resource, .. } | Notification::Collection { resource, .. } => {
                Some(resource.as_str())
            }
            _ => None,
        }
    }
}

/// The compressed image of one committed transaction's changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NotificationBatch {
    /// Session that produced the change; subscribers may ignore their own.
    pub session_id: String,
    pub notifications: Vec<Notification>,
    /// Number of batches this subscriber lost to back-pressure before this
    /// one. Filled in by the bus on delivery, zero at emission.
    pub missed: u64,
}

/// Key identifying "the same entity" for compression purposes.
#[derive(PartialEq, Eq, Hash, Clone)]
enum EntityKey {
    Item(Id),
    Collection(Id),
}

fn entity_key(n: &Notification) -> Option<EntityKey> {
    match n {
        Notification::Item { item, .. } => Some(EntityKey::Item(item.id)),
        Notification::Collection { id, .. } => Some(EntityKey::Collection(*id)),
        // Tag and relation notifications are not compressed.
        _ => None,
    }
}

fn op_of(n: &Notification) -> Operation {
    n.operation()
}

fn set_op(n: &mut Notification, new_op: Operation) {
    match n {
        Notification::Item { op, .. }
        | Notification::Collection { op, .. }
        | Notification::Tag { op, .. }
        | Notification::Relation { op, .. } => *op = new_op,
    }
}

fn merge_parts(into: &mut Notification, from: &Notification) {
    let from_parts = match from {
        Notification::Item { parts, .. } | Notification::Collection { parts, .. } => parts.clone(),
        _ => return,
    };
    match into {
        Notification::Item { parts, .. } | Notification::Collection { parts, .. } => {
            parts.extend(from_parts);
        }
        _ => {}
    }
}

/// Compresses a notification list in place, merging consecutive
/// notifications on the same entity:
///
/// - `Add + Modify` → `Add` (merged parts)
/// - `Add + Remove` → dropped
/// - `Modify + Modify` → `Modify` (union of parts)
/// - `Modify + Remove` → `Remove`
/// - `Remove + Add` → `Modify`
///
/// `ModifyTags`/`ModifyRelations` and tag/relation notifications pass
/// through untouched. Insertion order across distinct entities is kept.
pub fn compress(notifications: Vec<Notification>) -> Vec<Notification> {
    let mut out: Vec<Option<Notification>> = Vec::with_capacity(notifications.len());

    for next in notifications {
        let key = entity_key(&next);
        let compressible = key.is_some()
            && matches!(op_of(&next), Operation::Add | Operation::Modify | Operation::Remove);

        let prev_idx = if compressible {
            out.iter().enumerate().rev().find_map(|(i, slot)| {
                slot.as_ref().and_then(|prev| {
                    (entity_key(prev) == key
                        && matches!(
                            op_of(prev),
                            Operation::Add | Operation::Modify | Operation::Remove
                        ))
                    .then_some(i)
                })
            })
        } else {
            None
        };

        let Some(i) = prev_idx else {
            out.push(Some(next));
            continue;
        };
        let Some(prev) = out[i].as_mut() else {
            out.push(Some(next));
            continue;
        };

        match (op_of(prev), op_of(&next)) {
            (Operation::Add, Operation::Modify) => merge_parts(prev, &next),
            // The entity appeared and vanished within one transaction:
            // nobody outside needs to hear about it.
            (Operation::Add, Operation::Remove) => out[i] = None,
            (Operation::Modify, Operation::Modify) => merge_parts(prev, &next),
            (Operation::Modify, Operation::Remove) => set_op(prev, Operation::Remove),
            (Operation::Remove, Operation::Add) => {
                merge_parts(prev, &next);
                set_op(prev, Operation::Modify);
            }
            // Add+Add, Remove+Modify, Remove+Remove should not occur; keep
            // the later record so nothing is silently lost.
            _ => out.push(Some(next)),
        }
    }

    out.into_iter().flatten().collect()
}

#[cfg(test)]
#[path = "notification_tests.rs"]
mod tests;
