// SPDX-License-Identifier: MIT

use crate::external::EXTERNAL_PAYLOAD_THRESHOLD;

use super::*;

#[test]
fn small_payload_stays_inline() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let col = make_collection(&mut fx.db, res.id, "inbox");
    let item = make_item(&mut fx.db, col.id, "r1");
    let pt = fx.db.part_type_find_or_create("PLD", "RFC822").unwrap();

    let part = fx.db.store_part_payload(item.id, &pt, b"short body".to_vec()).unwrap();
    assert!(!part.external);
    assert_eq!(part.datasize, 10);
    assert_eq!(fx.db.part_payload(&part).unwrap().unwrap(), b"short body");
}

#[test]
fn large_payload_goes_external() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let col = make_collection(&mut fx.db, res.id, "inbox");
    let item = make_item(&mut fx.db, col.id, "r1");
    let pt = fx.db.part_type_find_or_create("PLD", "RFC822").unwrap();

    let payload = vec![b'x'; (EXTERNAL_PAYLOAD_THRESHOLD + 1) as usize];
    let part = fx.db.store_part_payload(item.id, &pt, payload.clone()).unwrap();
    assert!(part.external);

    // The row stores the bare filename; the file holds the payload.
    let name = String::from_utf8(part.data.clone().unwrap()).unwrap();
    assert!(fx.dir.path().join(&name).exists());
    assert_eq!(fx.db.part_payload(&part).unwrap().unwrap(), payload);
}

#[test]
fn replacing_external_payload_drops_old_file_after_commit() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let col = make_collection(&mut fx.db, res.id, "inbox");
    let mut item = make_item(&mut fx.db, col.id, "r1");
    let pt = fx.db.part_type_find_or_create("PLD", "RFC822").unwrap();

    let payload = vec![b'x'; (EXTERNAL_PAYLOAD_THRESHOLD + 1) as usize];
    let first = fx.db.store_part_payload(item.id, &pt, payload.clone()).unwrap();
    let first_name = String::from_utf8(first.data.unwrap()).unwrap();
    fx.db.bump_item_rev(&mut item, false).unwrap();

    fx.db.begin_transaction().unwrap();
    let second = fx.db.store_part_payload(item.id, &pt, payload).unwrap();
    let second_name = String::from_utf8(second.data.unwrap()).unwrap();
    assert_ne!(first_name, second_name);
    // Old file survives until the commit.
    assert!(fx.dir.path().join(&first_name).exists());
    fx.db.commit_transaction().unwrap();

    assert!(!fx.dir.path().join(&first_name).exists());
    assert!(fx.dir.path().join(&second_name).exists());
}

#[test]
fn rollback_leaves_file_for_janitor() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let col = make_collection(&mut fx.db, res.id, "inbox");
    let item = make_item(&mut fx.db, col.id, "r1");
    let pt = fx.db.part_type_find_or_create("PLD", "RFC822").unwrap();

    fx.db.begin_transaction().unwrap();
    let payload = vec![b'x'; (EXTERNAL_PAYLOAD_THRESHOLD + 1) as usize];
    let part = fx.db.store_part_payload(item.id, &pt, payload).unwrap();
    let name = String::from_utf8(part.data.unwrap()).unwrap();
    fx.db.rollback_transaction().unwrap();

    // The row is gone but the written file stays on disk.
    assert!(fx.db.part_by_type(item.id, pt.id).unwrap().is_none());
    assert!(fx.dir.path().join(&name).exists());
}

#[test]
fn eviction_clears_data_but_keeps_row() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let col = make_collection(&mut fx.db, res.id, "inbox");
    let item = make_item(&mut fx.db, col.id, "r1");
    let pt = fx.db.part_type_find_or_create("PLD", "RFC822").unwrap();

    let part = fx.db.store_part_payload(item.id, &pt, b"body".to_vec()).unwrap();
    fx.db.evict_part_payload(&part).unwrap();

    let evicted = fx.db.part_by_type(item.id, pt.id).unwrap().unwrap();
    assert!(evicted.data.is_none());
    assert_eq!(evicted.datasize, 0);
}

#[test]
fn delete_parts_schedules_external_file_removal() {
    let mut fx = fixture();
    let res = fx.db.create_resource("res1", false).unwrap();
    let col = make_collection(&mut fx.db, res.id, "inbox");
    let item = make_item(&mut fx.db, col.id, "r1");
    let pt = fx.db.part_type_find_or_create("PLD", "RFC822").unwrap();

    let payload = vec![b'x'; (EXTERNAL_PAYLOAD_THRESHOLD + 1) as usize];
    let part = fx.db.store_part_payload(item.id, &pt, payload).unwrap();
    let name = String::from_utf8(part.data.unwrap()).unwrap();

    fx.db.begin_transaction().unwrap();
    fx.db.remove_item(&item).unwrap();
    fx.db.commit_transaction().unwrap();

    assert!(!fx.dir.path().join(&name).exists());
    assert!(fx.db.parts_of_item(item.id).unwrap().is_empty());
}
