// SPDX-License-Identifier: MIT

use satchel_core::notification::{EntityKind, Notification, Operation};

use super::*;
use crate::datastore::StorageError;

fn two_items(fx: &mut Fixture) -> (satchel_core::PimItem, satchel_core::PimItem) {
    let res = fx.db.create_resource("testresource", false).unwrap();
    let col = make_collection(&mut fx.db, res.id, "col1");
    let left = make_item(&mut fx.db, col.id, "item1");
    let right = make_item(&mut fx.db, col.id, "item2");
    while fx.subscriber.try_recv().is_some() {}
    (left, right)
}

#[test]
fn store_relation_notifies_both_sides() {
    let mut fx = fixture();
    let (left, right) = two_items(&mut fx);

    fx.db.begin_transaction().unwrap();
    let rel = fx.db.insert_relation(left.id, right.id, "type", None).unwrap();
    fx.db.commit_transaction().unwrap();

    assert_eq!(rel.left_id, left.id);
    assert_eq!(rel.right_id, right.id);

    let batch = fx.subscriber.try_recv().unwrap();
    let relation_adds = batch
        .notifications
        .iter()
        .filter(|n| n.kind() == EntityKind::Relations && n.operation() == Operation::Add)
        .count();
    assert_eq!(relation_adds, 1);
    let modify_relations: Vec<_> = batch
        .notifications
        .iter()
        .filter(|n| n.operation() == Operation::ModifyRelations)
        .collect();
    assert_eq!(modify_relations.len(), 2);
    for n in modify_relations {
        let Notification::Item { parts, .. } = n else { panic!("not an item") };
        assert!(parts.contains(&format!("RELATION type {} {}", left.id, right.id)));
    }
}

#[test]
fn duplicate_relation_is_unique_violation() {
    let mut fx = fixture();
    let (left, right) = two_items(&mut fx);

    fx.db.insert_relation(left.id, right.id, "type", None).unwrap();
    let err = fx.db.insert_relation(left.id, right.id, "type", None).unwrap_err();
    assert!(matches!(err, StorageError::UniqueViolation(_)));
}

#[test]
fn relation_requires_existing_items() {
    let mut fx = fixture();
    let (left, _right) = two_items(&mut fx);
    let err = fx.db.insert_relation(left.id, 9999, "type", None).unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[test]
fn remove_with_type_removes_exactly_one() {
    let mut fx = fixture();
    let (left, right) = two_items(&mut fx);
    fx.db.insert_relation(left.id, right.id, "type", None).unwrap();
    fx.db.insert_relation(left.id, right.id, "type2", None).unwrap();

    let removed = fx.db.remove_relations(left.id, right.id, Some("type")).unwrap();
    assert_eq!(removed, 1);

    let left_over = fx.db.relations_matching(Some(left.id), Some(right.id), None, None).unwrap();
    assert_eq!(left_over.len(), 1);
    assert_eq!(left_over[0].1, "type2");
}

#[test]
fn remove_without_type_removes_all_and_notifies_once_per_side() {
    let mut fx = fixture();
    let (left, right) = two_items(&mut fx);
    fx.db.insert_relation(left.id, right.id, "type", None).unwrap();
    fx.db.insert_relation(left.id, right.id, "type2", None).unwrap();
    while fx.subscriber.try_recv().is_some() {}

    fx.db.begin_transaction().unwrap();
    let removed = fx.db.remove_relations(left.id, right.id, None).unwrap();
    fx.db.commit_transaction().unwrap();
    assert_eq!(removed, 2);

    let batch = fx.subscriber.try_recv().unwrap();
    let relation_removes = batch
        .notifications
        .iter()
        .filter(|n| n.kind() == EntityKind::Relations && n.operation() == Operation::Remove)
        .count();
    assert_eq!(relation_removes, 2);

    // One ModifyRelations per item side, each carrying both descriptors.
    let modify_relations: Vec<_> = batch
        .notifications
        .iter()
        .filter(|n| n.operation() == Operation::ModifyRelations)
        .collect();
    assert_eq!(modify_relations.len(), 2);
    for n in modify_relations {
        let Notification::Item { parts, .. } = n else { panic!("not an item") };
        assert_eq!(parts.len(), 2);
    }

    assert!(fx
        .db
        .relations_matching(Some(left.id), Some(right.id), None, None)
        .unwrap()
        .is_empty());
}

#[test]
fn removing_missing_relation_is_not_found() {
    let mut fx = fixture();
    let (left, right) = two_items(&mut fx);
    let err = fx.db.remove_relations(left.id, right.id, None).unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[test]
fn fetch_filters_by_side_and_type() {
    let mut fx = fixture();
    let (left, right) = two_items(&mut fx);
    let res = fx.db.resource_by_name("testresource").unwrap().unwrap();
    let col = fx.db.collections_by_resource(res.id).unwrap().remove(0);
    let third = make_item(&mut fx.db, col.id, "item3");

    fx.db.insert_relation(left.id, right.id, "type", None).unwrap();
    fx.db.insert_relation(third.id, left.id, "type2", None).unwrap();

    let by_left = fx.db.relations_matching(Some(left.id), None, None, None).unwrap();
    assert_eq!(by_left.len(), 1);

    let by_side = fx.db.relations_matching(None, None, Some(left.id), None).unwrap();
    assert_eq!(by_side.len(), 2);

    let by_type = fx.db.relations_matching(None, None, None, Some("type2")).unwrap();
    assert_eq!(by_type.len(), 1);
    assert_eq!(by_type[0].0.left_id, third.id);
}

#[test]
fn item_removal_drops_its_relations() {
    let mut fx = fixture();
    let (left, right) = two_items(&mut fx);
    fx.db.insert_relation(left.id, right.id, "type", None).unwrap();

    fx.db.remove_item(&left).unwrap();
    assert!(fx.db.relations_matching(None, None, Some(right.id), None).unwrap().is_empty());
}
