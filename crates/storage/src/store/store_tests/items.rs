// SPDX-License-Identifier: MIT

use satchel_core::notification::{Notification, Operation};
use satchel_wire::ImapSet;

use super::*;

#[test]
fn flag_round_trip_restores_pre_state() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let col = make_collection(&mut fx.db, res.id, "inbox");
    let mut item = make_item(&mut fx.db, col.id, "r1");

    let before: Vec<String> =
        fx.db.item_flags(item.id).unwrap().into_iter().map(|f| f.name).collect();

    let flag = fx.db.flag_find_or_create("\\FLAGGED").unwrap();
    assert!(fx.db.add_item_flags(&mut item, &[flag.clone()], true).unwrap());
    assert!(fx.db.remove_item_flags(&mut item, &[flag], true).unwrap());

    let after: Vec<String> =
        fx.db.item_flags(item.id).unwrap().into_iter().map(|f| f.name).collect();
    assert_eq!(before, after);
}

#[test]
fn adding_present_flag_is_a_noop() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let col = make_collection(&mut fx.db, res.id, "inbox");
    let mut item = make_item(&mut fx.db, col.id, "r1");

    let flag = fx.db.flag_find_or_create("\\SEEN").unwrap();
    assert!(fx.db.add_item_flags(&mut item, &[flag.clone()], true).unwrap());
    let rev = item.rev;
    assert!(!fx.db.add_item_flags(&mut item, &[flag], true).unwrap());
    assert_eq!(item.rev, rev);
}

#[test]
fn set_resolution_by_ids_and_collection() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let col1 = make_collection(&mut fx.db, res.id, "a");
    let col2 = make_collection(&mut fx.db, res.id, "b");
    let i1 = make_item(&mut fx.db, col1.id, "r1");
    let i2 = make_item(&mut fx.db, col1.id, "r2");
    let i3 = make_item(&mut fx.db, col2.id, "r3");

    let set = ImapSet::parse(&format!("{}:{}", i1.id, i3.id)).unwrap();
    let all = fx.db.items_by_set(&set, None).unwrap();
    assert_eq!(all.len(), 3);

    let scoped = fx.db.items_by_set(&set, Some(&col1)).unwrap();
    let ids: Vec<_> = scoped.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![i1.id, i2.id]);

    let open = ImapSet::parse("1:*").unwrap();
    let everything = fx.db.items_by_set(&open, None).unwrap();
    assert_eq!(everything.len(), 3);
}

#[test]
fn remote_id_resolution_scopes_to_resource() {
    let mut fx = fixture();
    let res1 = fx.db.create_resource("res1", false).unwrap();
    let res2 = fx.db.create_resource("res2", false).unwrap();
    let col1 = make_collection(&mut fx.db, res1.id, "a");
    let col2 = make_collection(&mut fx.db, res2.id, "b");
    let i1 = make_item(&mut fx.db, col1.id, "shared-rid");
    let _i2 = make_item(&mut fx.db, col2.id, "shared-rid");

    let scoped = fx.db.items_by_remote_id("shared-rid", Some(res1.id)).unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].id, i1.id);

    let global = fx.db.items_by_remote_id("shared-rid", None).unwrap();
    assert_eq!(global.len(), 2);
}

#[test]
fn move_changes_collection_and_notifies_parent_part() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let col1 = make_collection(&mut fx.db, res.id, "a");
    let col2 = make_collection(&mut fx.db, res.id, "b");
    let mut item = make_item(&mut fx.db, col1.id, "r1");
    while fx.subscriber.try_recv().is_some() {}

    fx.db.begin_transaction().unwrap();
    fx.db.move_item(&mut item, col2.id).unwrap();
    fx.db.commit_transaction().unwrap();

    assert_eq!(fx.db.item_by_id(item.id).unwrap().unwrap().collection_id, col2.id);
    let batch = fx.subscriber.try_recv().unwrap();
    assert!(batch.notifications.iter().any(|n| matches!(
        n,
        Notification::Item { op: Operation::Modify, parts, .. } if parts.contains("PARENT")
    )));
}

#[test]
fn remove_cascades_and_notifies_with_captured_fields() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let col = make_collection(&mut fx.db, res.id, "inbox");
    let mut item = make_item(&mut fx.db, col.id, "r1");
    let flag = fx.db.flag_find_or_create("\\SEEN").unwrap();
    fx.db.add_item_flags(&mut item, &[flag], false).unwrap();
    while fx.subscriber.try_recv().is_some() {}

    fx.db.begin_transaction().unwrap();
    fx.db.remove_item(&item).unwrap();
    fx.db.commit_transaction().unwrap();

    assert!(fx.db.item_by_id(item.id).unwrap().is_none());
    let batch = fx.subscriber.try_recv().unwrap();
    let Notification::Item { op, item: notice, resource, .. } = &batch.notifications[0] else {
        panic!("expected item notification");
    };
    assert_eq!(*op, Operation::Remove);
    assert_eq!(notice.mime_type, "message/rfc822");
    assert_eq!(resource, "res1");
}

#[test]
fn unhide_clears_hidden_bits() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let col = make_collection(&mut fx.db, res.id, "inbox");
    let mut item = make_item(&mut fx.db, col.id, "r1");
    item.hidden = true;
    fx.db.update_item_meta(&item).unwrap();

    assert_eq!(fx.db.unhide_all_items().unwrap(), 1);
    assert!(!fx.db.item_by_id(item.id).unwrap().unwrap().hidden);
}
