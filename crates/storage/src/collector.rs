// SPDX-License-Identifier: MIT

//! Transaction-scoped notification buffer.
//!
//! Store operations record *intent* here while the transaction runs.
//! Records may be incomplete: a mime-type or resource name that was not
//! at hand is filled in by the data store at flush time, while the
//! transaction's rows are still visible. Removal records must be complete
//! at record time: by flush the rows are gone.

use std::collections::BTreeSet;

use satchel_core::notification::Operation;
use satchel_core::{Collection, Id, PimItem, Relation};

/// A recorded change, possibly missing lazily-completable fields.
#[derive(Debug, Clone)]
pub(crate) enum Pending {
    Item {
        op: Operation,
        item: PimItem,
        collection: Id,
        mime_type: Option<String>,
        resource: Option<String>,
        parts: BTreeSet<String>,
    },
    Collection {
        op: Operation,
        id: Id,
        name: String,
        resource: Option<String>,
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

/// Collects change notifications for the duration of one transaction.
#[derive(Default)]
pub struct NotificationCollector {
    pending: Vec<Pending>,
}

impl NotificationCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn take(&mut self) -> Vec<Pending> {
        std::mem::take(&mut self.pending)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn item_added(&mut self, item: &PimItem, mime_type: Option<&str>, resource: Option<&str>) {
        self.pending.push(Pending::Item {
            op: Operation::Add,
            item: item.clone(),
            collection: item.collection_id,
            mime_type: mime_type.map(str::to_string),
            resource: resource.map(str::to_string),
            parts: BTreeSet::new(),
        });
    }

    pub fn item_changed(&mut self, item: &PimItem, parts: BTreeSet<String>) {
        self.pending.push(Pending::Item {
            op: Operation::Modify,
            item: item.clone(),
            collection: item.collection_id,
            mime_type: None,
            resource: None,
            parts,
        });
    }

    /// `mime_type` and `resource` are required: the row is gone by flush.
    pub fn item_removed(&mut self, item: &PimItem, mime_type: &str, resource: &str) {
        self.pending.push(Pending::Item {
            op: Operation::Remove,
            item: item.clone(),
            collection: item.collection_id,
            mime_type: Some(mime_type.to_string()),
            resource: Some(resource.to_string()),
            parts: BTreeSet::new(),
        });
    }

    /// Tag membership of `item` changed; `delta` describes added/removed
    /// tags as `+<id>` / `-<id>` entries.
    pub fn item_tags_changed(&mut self, item: &PimItem, delta: BTreeSet<String>) {
        self.pending.push(Pending::Item {
            op: Operation::ModifyTags,
            item: item.clone(),
            collection: item.collection_id,
            mime_type: None,
            resource: None,
            parts: delta,
        });
    }

    /// Relations of `item` changed; `delta` carries
    /// `RELATION <type> <left> <right>` descriptors.
    pub fn item_relations_changed(&mut self, item: &PimItem, delta: BTreeSet<String>) {
        self.pending.push(Pending::Item {
            op: Operation::ModifyRelations,
            item: item.clone(),
            collection: item.collection_id,
            mime_type: None,
            resource: None,
            parts: delta,
        });
    }

    /// Item gained membership in a virtual collection; notified as an add
    /// against that collection.
    pub fn item_linked(&mut self, item: &PimItem, collection: Id) {
        self.pending.push(Pending::Item {
            op: Operation::Add,
            item: item.clone(),
            collection,
            mime_type: None,
            resource: None,
            parts: BTreeSet::new(),
        });
    }

    /// Item lost membership in a virtual collection.
    pub fn item_unlinked(&mut self, item: &PimItem, collection: Id) {
        self.pending.push(Pending::Item {
            op: Operation::Remove,
            item: item.clone(),
            collection,
            mime_type: None,
            resource: None,
            parts: BTreeSet::new(),
        });
    }

    pub fn collection_added(&mut self, collection: &Collection, resource: Option<&str>) {
        self.pending.push(Pending::Collection {
            op: Operation::Add,
            id: collection.id,
            name: collection.name.clone(),
            resource: resource.map(str::to_string),
            parts: BTreeSet::new(),
        });
    }

    pub fn collection_changed(&mut self, collection: &Collection, parts: BTreeSet<String>) {
        self.pending.push(Pending::Collection {
            op: Operation::Modify,
            id: collection.id,
            name: collection.name.clone(),
            resource: None,
            parts,
        });
    }

    /// `resource` is required: the row is gone by flush.
    pub fn collection_removed(&mut self, collection: &Collection, resource: &str) {
        self.pending.push(Pending::Collection {
            op: Operation::Remove,
            id: collection.id,
            name: collection.name.clone(),
            resource: Some(resource.to_string()),
            parts: BTreeSet::new(),
        });
    }

    pub fn tag_added(&mut self, id: Id) {
        self.pending.push(Pending::Tag { op: Operation::Add, id });
    }

    pub fn tag_changed(&mut self, id: Id) {
        self.pending.push(Pending::Tag { op: Operation::Modify, id });
    }

    pub fn tag_removed(&mut self, id: Id) {
        self.pending.push(Pending::Tag { op: Operation::Remove, id });
    }

    pub fn relation_added(&mut self, relation: &Relation, type_name: &str) {
        self.pending.push(Pending::Relation {
            op: Operation::Add,
            left: relation.left_id,
            right: relation.right_id,
            type_name: type_name.to_string(),
            remote_id: relation.remote_id.clone(),
        });
    }

    pub fn relation_removed(&mut self, relation: &Relation, type_name: &str) {
        self.pending.push(Pending::Relation {
            op: Operation::Remove,
            left: relation.left_id,
            right: relation.right_id,
            type_name: type_name.to_string(),
            remote_id: relation.remote_id.clone(),
        });
    }
}

#[cfg(test)]
#[path = "collector_tests.rs"]
mod tests;
