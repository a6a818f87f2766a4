// SPDX-License-Identifier: MIT

use satchel_core::notification::{EntityKind, Notification, Operation};
use satchel_core::Tag;
use satchel_wire::ImapSet;

use super::*;

fn make_tag(fx: &mut Fixture, gid: &str) -> Tag {
    let mut tag = Tag { id: 0, gid: gid.into(), parent_id: None, type_name: "PLAIN".into() };
    fx.db.append_tag(&mut tag).unwrap();
    tag
}

#[test]
fn append_and_fetch_by_set_and_gid() {
    let mut fx = fixture();
    let t1 = make_tag(&mut fx, "important");
    let t2 = make_tag(&mut fx, "work");

    let set = ImapSet::parse(&format!("{},{}", t1.id, t2.id)).unwrap();
    let found = fx.db.tags_by_set(&set).unwrap();
    assert_eq!(found.len(), 2);

    let by_gid = fx.db.tags_by_gid("work").unwrap();
    assert_eq!(by_gid.len(), 1);
    assert_eq!(by_gid[0].id, t2.id);
}

#[test]
fn item_tagging_emits_delta() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let col = make_collection(&mut fx.db, res.id, "inbox");
    let mut item = make_item(&mut fx.db, col.id, "r1");
    let tag = make_tag(&mut fx, "important");
    while fx.subscriber.try_recv().is_some() {}

    fx.db.begin_transaction().unwrap();
    assert!(fx.db.add_item_tags(&mut item, &[tag.clone()], true).unwrap());
    fx.db.commit_transaction().unwrap();

    let batch = fx.subscriber.try_recv().unwrap();
    let Notification::Item { op, parts, .. } = &batch.notifications[0] else {
        panic!("expected item notification");
    };
    assert_eq!(*op, Operation::ModifyTags);
    assert!(parts.contains(&format!("+{}", tag.id)));

    assert_eq!(fx.db.item_tags(item.id).unwrap().len(), 1);
}

#[test]
fn set_item_tags_computes_two_sided_delta() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let col = make_collection(&mut fx.db, res.id, "inbox");
    let mut item = make_item(&mut fx.db, col.id, "r1");
    let keep = make_tag(&mut fx, "keep");
    let drop_ = make_tag(&mut fx, "drop");
    let add = make_tag(&mut fx, "add");
    fx.db.add_item_tags(&mut item, &[keep.clone(), drop_.clone()], false).unwrap();
    while fx.subscriber.try_recv().is_some() {}

    fx.db.begin_transaction().unwrap();
    fx.db.set_item_tags(&mut item, &[keep.clone(), add.clone()], false).unwrap();
    fx.db.commit_transaction().unwrap();

    let batch = fx.subscriber.try_recv().unwrap();
    let Notification::Item { parts, .. } = &batch.notifications[0] else {
        panic!("expected item notification");
    };
    assert!(parts.contains(&format!("+{}", add.id)));
    assert!(parts.contains(&format!("-{}", drop_.id)));
    assert_eq!(parts.len(), 2);
}

#[test]
fn removing_tag_unlinks_items_and_notifies() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let col = make_collection(&mut fx.db, res.id, "inbox");
    let mut item = make_item(&mut fx.db, col.id, "r1");
    let tag = make_tag(&mut fx, "important");
    fx.db.add_item_tags(&mut item, &[tag.clone()], false).unwrap();
    while fx.subscriber.try_recv().is_some() {}

    fx.db.begin_transaction().unwrap();
    fx.db.remove_tags(&[tag.clone()]).unwrap();
    fx.db.commit_transaction().unwrap();

    assert!(fx.db.tag_by_id(tag.id).unwrap().is_none());
    assert!(fx.db.item_tags(item.id).unwrap().is_empty());

    let batch = fx.subscriber.try_recv().unwrap();
    assert!(batch
        .notifications
        .iter()
        .any(|n| n.kind() == EntityKind::Tags && n.operation() == Operation::Remove));
    assert!(batch.notifications.iter().any(|n| n.operation() == Operation::ModifyTags));
}
