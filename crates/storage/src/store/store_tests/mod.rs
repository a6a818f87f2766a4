// SPDX-License-Identifier: MIT

//! Entity accessor tests over an in-memory database.

mod collections;
mod items;
mod parts;
mod relations;
mod tags;

use chrono::Utc;
use tempfile::TempDir;

use satchel_core::{Collection, Id, PimItem};

use crate::bus::{NotificationBus, Subscriber, SubscriberFilter};
use crate::datastore::DataStore;

pub(crate) struct Fixture {
    pub db: DataStore,
    pub subscriber: Subscriber,
    // Keeps the external payload directory alive for the test.
    pub dir: TempDir,
}

pub(crate) fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let bus = NotificationBus::new();
    let subscriber = bus.subscribe(SubscriberFilter::default());
    let db = DataStore::open_in_memory("test-session", dir.path(), bus).unwrap();
    Fixture { db, subscriber, dir }
}

pub(crate) fn make_collection(db: &mut DataStore, resource_id: Id, name: &str) -> Collection {
    let mut col = Collection {
        id: 0,
        parent_id: None,
        resource_id,
        name: name.to_string(),
        remote_id: String::new(),
        remote_revision: String::new(),
        is_virtual: false,
        enabled: true,
        sync_pref: Default::default(),
        display_pref: Default::default(),
        index_pref: Default::default(),
        query_string: String::new(),
        query_attributes: String::new(),
        query_collections: String::new(),
        query_language: String::new(),
        cache_policy: Default::default(),
    };
    db.append_collection(&mut col).unwrap();
    col
}

pub(crate) fn make_item(db: &mut DataStore, collection_id: Id, remote_id: &str) -> PimItem {
    let mime = db.mime_type_find_or_create("message/rfc822").unwrap();
    let mut item = PimItem {
        id: 0,
        rev: 0,
        remote_id: remote_id.to_string(),
        gid: String::new(),
        collection_id,
        mime_type_id: mime.id,
        datetime: Utc::now(),
        atime: Utc::now(),
        size: 0,
        dirty: false,
        hidden: false,
    };
    db.append_item(&mut item).unwrap();
    item
}
