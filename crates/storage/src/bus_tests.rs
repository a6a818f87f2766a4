// SPDX-License-Identifier: MIT

//! Fan-out, filtering and back-pressure tests for the notification bus.

use std::collections::{BTreeSet, HashSet};

use satchel_core::notification::{
    EntityKind, ItemNotice, Notification, NotificationBatch, Operation,
};

use super::*;

fn item_batch(session: &str, id: i64, op: Operation) -> NotificationBatch {
    NotificationBatch {
        session_id: session.to_string(),
        notifications: vec![Notification::Item {
            op,
            item: ItemNotice { id, remote_id: format!("r{id}"), mime_type: "message/rfc822".into() },
            collection: 4,
            resource: "res1".into(),
            parts: BTreeSet::new(),
        }],
        missed: 0,
    }
}

#[test]
fn delivers_to_matching_subscriber() {
    let bus = NotificationBus::new();
    let sub = bus.subscribe(SubscriberFilter::default());

    bus.emit(item_batch("s1", 1, Operation::Add));
    let batch = sub.try_recv().unwrap();
    assert_eq!(batch.notifications.len(), 1);
    assert_eq!(batch.missed, 0);
}

#[test]
fn own_session_can_be_ignored() {
    let bus = NotificationBus::new();
    let sub = bus.subscribe(SubscriberFilter {
        ignore_session: Some("mine".into()),
        ..Default::default()
    });

    bus.emit(item_batch("mine", 1, Operation::Add));
    assert!(sub.try_recv().is_none());

    bus.emit(item_batch("theirs", 2, Operation::Add));
    assert!(sub.try_recv().is_some());
}

#[test]
fn kind_and_op_filters_apply_per_notification() {
    let bus = NotificationBus::new();
    let sub = bus.subscribe(SubscriberFilter {
        kinds: Some(HashSet::from([EntityKind::Items])),
        ops: Some(HashSet::from([Operation::Remove])),
        ..Default::default()
    });

    bus.emit(item_batch("s1", 1, Operation::Add));
    assert!(sub.try_recv().is_none());

    bus.emit(item_batch("s1", 1, Operation::Remove));
    assert!(sub.try_recv().is_some());
}

#[test]
fn collection_filter_matches_item_parent() {
    let bus = NotificationBus::new();
    let matching = bus.subscribe(SubscriberFilter { collection: Some(4), ..Default::default() });
    let other = bus.subscribe(SubscriberFilter { collection: Some(99), ..Default::default() });

    bus.emit(item_batch("s1", 1, Operation::Add));
    assert!(matching.try_recv().is_some());
    assert!(other.try_recv().is_none());
}

#[test]
fn overflow_drops_oldest_and_counts_missed() {
    let bus = NotificationBus::new();
    let sub = bus.subscribe_with_depth(SubscriberFilter::default(), 2);

    bus.emit(item_batch("s1", 1, Operation::Add));
    bus.emit(item_batch("s1", 2, Operation::Add));
    bus.emit(item_batch("s1", 3, Operation::Add));

    // Batch for item 1 was dropped; the next delivery reports the loss.
    let batch = sub.try_recv().unwrap();
    let Notification::Item { item, .. } = &batch.notifications[0] else { panic!("not an item") };
    assert_eq!(item.id, 2);
    assert_eq!(batch.missed, 1);

    let batch = sub.try_recv().unwrap();
    let Notification::Item { item, .. } = &batch.notifications[0] else { panic!("not an item") };
    assert_eq!(item.id, 3);
    assert_eq!(batch.missed, 1);
    assert_eq!(sub.missed(), 1);
}

#[test]
fn dropped_subscriber_is_pruned() {
    let bus = NotificationBus::new();
    let sub = bus.subscribe(SubscriberFilter::default());
    drop(sub);
    // Emitting to a dead subscription must not panic or leak.
    bus.emit(item_batch("s1", 1, Operation::Add));
}

#[tokio::test]
async fn recv_wakes_on_emit() {
    let bus = NotificationBus::new();
    let sub = bus.subscribe(SubscriberFilter::default());

    let emitter = tokio::spawn({
        let bus = bus.clone();
        async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            bus.emit(item_batch("s1", 7, Operation::Add));
        }
    });

    let batch = sub.recv().await;
    let Notification::Item { item, .. } = &batch.notifications[0] else { panic!("not an item") };
    assert_eq!(item.id, 7);
    emitter.await.unwrap();
}
