// SPDX-License-Identifier: MIT

use std::collections::BTreeSet;

use satchel_core::notification::{Notification, Operation};

use super::*;
use crate::datastore::StorageError;

#[test]
fn append_assigns_id_and_notifies() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();

    fx.db.begin_transaction().unwrap();
    let col = make_collection(&mut fx.db, res.id, "inbox");
    fx.db.commit_transaction().unwrap();

    assert!(col.id > 1);
    let batch = fx.subscriber.try_recv().unwrap();
    assert!(batch.notifications.iter().any(|n| matches!(
        n,
        Notification::Collection { op: Operation::Add, name, .. } if name == "inbox"
    )));
}

#[test]
fn sibling_name_collision_is_unique_violation() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let parent = make_collection(&mut fx.db, res.id, "inbox");

    let mut a = parent.clone();
    a.id = 0;
    a.parent_id = Some(parent.id);
    a.name = "child".into();
    fx.db.append_collection(&mut a).unwrap();

    let mut b = a.clone();
    b.id = 0;
    let err = fx.db.append_collection(&mut b).unwrap_err();
    assert!(matches!(err, StorageError::UniqueViolation(_)));
}

#[test]
fn parent_must_share_resource() {
    let mut fx = fixture();
    let res1 = fx.db.create_resource("res1", false).unwrap();
    let res2 = fx.db.create_resource("res2", false).unwrap();
    let parent = make_collection(&mut fx.db, res1.id, "inbox");

    let mut child = parent.clone();
    child.id = 0;
    child.parent_id = Some(parent.id);
    child.resource_id = res2.id;
    child.name = "child".into();
    let err = fx.db.append_collection(&mut child).unwrap_err();
    assert!(matches!(err, StorageError::InvalidData(_)));
}

#[test]
fn move_rejects_cross_resource_and_cycles() {
    let mut fx = fixture();
    let res1 = fx.db.create_resource("res1", false).unwrap();
    let res2 = fx.db.create_resource("res2", false).unwrap();
    let a = make_collection(&mut fx.db, res1.id, "a");
    let other = make_collection(&mut fx.db, res2.id, "other");

    let mut b = a.clone();
    b.id = 0;
    b.parent_id = Some(a.id);
    b.name = "b".into();
    fx.db.append_collection(&mut b).unwrap();

    // Cross-resource move.
    let err = fx.db.move_collection(b.id, Some(other.id)).unwrap_err();
    assert!(matches!(err, StorageError::InvalidData(_)));

    // Moving a below its own child creates a cycle.
    let err = fx.db.move_collection(a.id, Some(b.id)).unwrap_err();
    assert!(matches!(err, StorageError::InvalidData(_)));
}

#[test]
fn delete_cascades_to_children_and_items() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let parent = make_collection(&mut fx.db, res.id, "parent");
    let mut child = parent.clone();
    child.id = 0;
    child.parent_id = Some(parent.id);
    child.name = "child".into();
    fx.db.append_collection(&mut child).unwrap();
    let item = make_item(&mut fx.db, child.id, "r1");
    while fx.subscriber.try_recv().is_some() {}

    fx.db.begin_transaction().unwrap();
    fx.db.delete_collection(parent.id).unwrap();
    fx.db.commit_transaction().unwrap();

    assert!(fx.db.collection_by_id(parent.id).unwrap().is_none());
    assert!(fx.db.collection_by_id(child.id).unwrap().is_none());
    assert!(fx.db.item_by_id(item.id).unwrap().is_none());

    let batch = fx.subscriber.try_recv().unwrap();
    let removed_collections = batch
        .notifications
        .iter()
        .filter(|n| {
            matches!(n, Notification::Collection { op: Operation::Remove, .. })
        })
        .count();
    assert_eq!(removed_collections, 2);
    assert!(batch.notifications.iter().any(|n| matches!(
        n,
        Notification::Item { op: Operation::Remove, .. }
    )));
}

#[test]
fn resolves_by_parent_and_name() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let root = make_collection(&mut fx.db, res.id, "root");
    let mut sub = root.clone();
    sub.id = 0;
    sub.parent_id = Some(root.id);
    sub.name = "sub".into();
    fx.db.append_collection(&mut sub).unwrap();

    let found = fx.db.collection_by_parent_and_name(Some(root.id), "sub").unwrap().unwrap();
    assert_eq!(found.id, sub.id);
    let missing = fx.db.collection_by_parent_and_name(Some(root.id), "nope").unwrap();
    assert!(missing.is_none());
}

#[test]
fn virtual_membership_links_and_statistics() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let col = make_collection(&mut fx.db, res.id, "inbox");
    let item = make_item(&mut fx.db, col.id, "r1");

    let mut search = col.clone();
    search.id = 0;
    search.parent_id = Some(1);
    search.resource_id = 1;
    search.name = "mysearch".into();
    search.is_virtual = true;
    search.query_string = "subject:foo".into();
    fx.db.append_collection(&mut search).unwrap();

    assert!(fx.db.link_virtual_item(search.id, item.id).unwrap());
    // Linking twice is a no-op.
    assert!(!fx.db.link_virtual_item(search.id, item.id).unwrap());

    let (count, _) = fx.db.collection_statistics(&search).unwrap();
    assert_eq!(count, 1);
    assert_eq!(fx.db.virtual_collection_items(search.id).unwrap(), vec![item.id]);

    assert!(fx.db.unlink_virtual_item(search.id, item.id).unwrap());
    let (count, _) = fx.db.collection_statistics(&search).unwrap();
    assert_eq!(count, 0);
}

#[test]
fn update_records_changed_parts() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let mut col = make_collection(&mut fx.db, res.id, "inbox");
    while fx.subscriber.try_recv().is_some() {}

    fx.db.begin_transaction().unwrap();
    col.name = "renamed".into();
    fx.db.update_collection(&col, BTreeSet::from(["NAME".to_string()])).unwrap();
    fx.db.commit_transaction().unwrap();

    let batch = fx.subscriber.try_recv().unwrap();
    assert!(batch.notifications.iter().any(|n| matches!(
        n,
        Notification::Collection { op: Operation::Modify, parts, .. }
            if parts.contains("NAME")
    )));
    assert_eq!(fx.db.collection_by_id(col.id).unwrap().unwrap().name, "renamed");
}
